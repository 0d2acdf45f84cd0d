//! Mock Driver
//!
//! In-memory [`Driver`] implementation with real byte storage, used for
//! headless operation and for exercising the resource core without a GPU.
//! Copies and fills move actual bytes, so tests can assert on contents, and
//! failure injection knobs simulate missing adapters, refused devices,
//! compile errors and device loss.

use slotmap::SlotMap;

use crate::driver::{
    AdapterInfo, AdapterRequestOptions, BufferId, BufferUsages, ComputePipelineId, CopyRegion,
    DeviceReply, DeviceRequest, Driver, Features, Limits, LossNotice, LossReason, MapMode,
    RenderPipelineId,
};
use crate::errors::{GpuError, Result};
use crate::pipeline::{ComputePipelineDesc, RenderPipelineDesc};

struct MockBuffer {
    data: Vec<u8>,
    #[allow(dead_code)]
    usage: BufferUsages,
    mapped: bool,
    label: Option<String>,
}

struct MockRenderPipeline {
    label: Option<String>,
}

struct MockComputePipeline {
    label: Option<String>,
}

/// In-memory GPU backend.
pub struct MockDriver {
    adapter: AdapterInfo,
    device_alive: bool,
    loss_sender: Option<flume::Sender<LossNotice>>,

    buffers: SlotMap<BufferId, MockBuffer>,
    render_pipelines: SlotMap<RenderPipelineId, MockRenderPipeline>,
    compute_pipelines: SlotMap<ComputePipelineId, MockComputePipeline>,

    // Failure injection
    adapter_failures: u32,
    device_failures: u32,
    compile_error: Option<String>,
    copy_failures: u32,

    // Counters
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub submissions: u64,
    pub devices_created: u64,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl MockDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            adapter: AdapterInfo {
                name: "Mock GPU".to_string(),
                backend: "mock".to_string(),
                features: Features::all(),
                limits: Limits::default(),
            },
            device_alive: false,
            loss_sender: None,
            buffers: SlotMap::with_key(),
            render_pipelines: SlotMap::with_key(),
            compute_pipelines: SlotMap::with_key(),
            adapter_failures: 0,
            device_failures: 0,
            compile_error: None,
            copy_failures: 0,
            buffers_created: 0,
            buffers_destroyed: 0,
            submissions: 0,
            devices_created: 0,
        }
    }

    /// Restricts the mock adapter's capabilities.
    #[must_use]
    pub fn with_adapter(mut self, features: Features, limits: Limits) -> Self {
        self.adapter.features = features;
        self.adapter.limits = limits;
        self
    }

    /// Makes the next `n` adapter requests report "no adapter available".
    pub fn fail_next_adapter_requests(&mut self, n: u32) {
        self.adapter_failures = n;
    }

    /// Makes the next `n` device requests fail.
    pub fn fail_next_device_requests(&mut self, n: u32) {
        self.device_failures = n;
    }

    /// Makes the next pipeline compilation fail with `message`.
    pub fn fail_next_compile(&mut self, message: impl Into<String>) {
        self.compile_error = Some(message.into());
    }

    /// Makes the next `n` copy submissions fail after validation.
    pub fn fail_next_copies(&mut self, n: u32) {
        self.copy_failures = n;
    }

    /// Delivers a device-loss notification on the channel installed by the
    /// last device request.
    pub fn lose_device(&mut self, reason: LossReason, message: impl Into<String>) {
        if let Some(sender) = &self.loss_sender {
            let _ = sender.send(LossNotice {
                reason,
                message: message.into(),
            });
        }
    }

    /// Bytes currently stored for a buffer, for test assertions.
    #[must_use]
    pub fn buffer_contents(&self, id: BufferId) -> Option<&[u8]> {
        self.buffers.get(id).map(|b| b.data.as_slice())
    }

    /// Live driver-side buffer count.
    #[must_use]
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    #[must_use]
    pub fn render_pipeline_count(&self) -> usize {
        self.render_pipelines.len()
    }

    #[must_use]
    pub fn compute_pipeline_count(&self) -> usize {
        self.compute_pipelines.len()
    }

    fn expect_device(&self) -> Result<()> {
        if self.device_alive {
            Ok(())
        } else {
            Err(GpuError::DriverError("no device".to_string()))
        }
    }

    fn buffer(&self, id: BufferId) -> Result<&MockBuffer> {
        self.buffers
            .get(id)
            .ok_or_else(|| GpuError::DriverError(format!("dangling buffer handle {id:?}")))
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut MockBuffer> {
        self.buffers
            .get_mut(id)
            .ok_or_else(|| GpuError::DriverError(format!("dangling buffer handle {id:?}")))
    }
}

impl Driver for MockDriver {
    async fn request_adapter(
        &mut self,
        _options: &AdapterRequestOptions,
    ) -> Result<Option<AdapterInfo>> {
        if self.adapter_failures > 0 {
            self.adapter_failures -= 1;
            return Ok(None);
        }
        Ok(Some(self.adapter.clone()))
    }

    async fn request_device(&mut self, request: &DeviceRequest) -> Result<DeviceReply> {
        if self.device_failures > 0 {
            self.device_failures -= 1;
            return Err(GpuError::DeviceRequestFailed(
                "mock device refusal".to_string(),
            ));
        }
        let (sender, receiver) = flume::unbounded();
        self.loss_sender = Some(sender);
        self.device_alive = true;
        self.devices_created += 1;
        Ok(DeviceReply {
            features: request.required_features,
            limits: request.required_limits,
            losses: receiver,
        })
    }

    fn release_device(&mut self) {
        self.device_alive = false;
        self.loss_sender = None;
        self.buffers.clear();
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<BufferId> {
        self.expect_device()?;
        self.buffers_created += 1;
        Ok(self.buffers.insert(MockBuffer {
            data: vec![0; size as usize],
            usage,
            mapped: false,
            label: label.map(str::to_owned),
        }))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if self.buffers.remove(buffer).is_some() {
            self.buffers_destroyed += 1;
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        self.expect_device()?;
        let buf = self.buffer_mut(buffer)?;
        let start = offset as usize;
        let end = start + data.len();
        if end > buf.data.len() {
            return Err(GpuError::DriverError(format!(
                "write past end of {:?}",
                buf.label
            )));
        }
        buf.data[start..end].copy_from_slice(data);
        Ok(())
    }

    async fn map_buffer(&mut self, buffer: BufferId, _mode: MapMode) -> Result<()> {
        self.expect_device()?;
        let buf = self.buffer_mut(buffer)?;
        if buf.mapped {
            return Err(GpuError::DriverError("buffer already mapped".to_string()));
        }
        buf.mapped = true;
        Ok(())
    }

    fn mapped_range(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let buf = self.buffer(buffer)?;
        if !buf.mapped {
            return Err(GpuError::DriverError("buffer not mapped".to_string()));
        }
        let start = offset as usize;
        let end = start + size as usize;
        if end > buf.data.len() {
            return Err(GpuError::DriverError("mapped range out of bounds".to_string()));
        }
        Ok(buf.data[start..end].to_vec())
    }

    fn unmap(&mut self, buffer: BufferId) -> Result<()> {
        let buf = self.buffer_mut(buffer)?;
        if !buf.mapped {
            return Err(GpuError::DriverError("buffer not mapped".to_string()));
        }
        buf.mapped = false;
        Ok(())
    }

    fn submit_copies(&mut self, regions: &[CopyRegion]) -> Result<()> {
        self.expect_device()?;
        if self.copy_failures > 0 {
            self.copy_failures -= 1;
            return Err(GpuError::DriverError(
                "injected copy submission failure".to_string(),
            ));
        }
        self.submissions += 1;
        for region in regions {
            // The validator rejected overlapping self-copies, so staging the
            // source bytes first is always sound.
            let src = self.buffer(region.src)?;
            let start = region.src_offset as usize;
            let end = start + region.size as usize;
            if end > src.data.len() {
                return Err(GpuError::DriverError("copy source out of bounds".to_string()));
            }
            let bytes = src.data[start..end].to_vec();

            let dst = self.buffer_mut(region.dst)?;
            let start = region.dst_offset as usize;
            let end = start + region.size as usize;
            if end > dst.data.len() {
                return Err(GpuError::DriverError(
                    "copy destination out of bounds".to_string(),
                ));
            }
            dst.data[start..end].copy_from_slice(&bytes);
        }
        Ok(())
    }

    async fn on_submitted_work_done(&mut self) -> Result<()> {
        self.expect_device()
    }

    async fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
    ) -> Result<RenderPipelineId> {
        self.expect_device()?;
        if let Some(detail) = self.compile_error.take() {
            return Err(GpuError::PipelineCompileFailed {
                label: desc.label_or("<unlabeled>"),
                detail,
            });
        }
        Ok(self.render_pipelines.insert(MockRenderPipeline {
            label: desc.label.clone(),
        }))
    }

    async fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipelineId> {
        self.expect_device()?;
        if let Some(detail) = self.compile_error.take() {
            return Err(GpuError::PipelineCompileFailed {
                label: desc.label_or("<unlabeled>"),
                detail,
            });
        }
        Ok(self.compute_pipelines.insert(MockComputePipeline {
            label: desc.label.clone(),
        }))
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineId) {
        let removed = self.render_pipelines.remove(pipeline);
        if let Some(p) = removed {
            log::trace!("destroyed render pipeline {:?}", p.label);
        }
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineId) {
        let removed = self.compute_pipelines.remove(pipeline);
        if let Some(p) = removed {
            log::trace!("destroyed compute pipeline {:?}", p.label);
        }
    }
}
