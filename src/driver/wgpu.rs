//! wgpu Driver
//!
//! Maps the [`Driver`] trait onto `wgpu`. Behind the `wgpu-driver` feature;
//! the rest of the crate never touches `wgpu` types directly.
//!
//! Backend objects live in `SlotMap`s owned here, so the core's opaque ids
//! stay valid exactly as long as the driver keeps the object. Device loss is
//! forwarded from wgpu's lost callback onto the flume channel the
//! [`crate::device::DeviceManager`] drains.

use slotmap::SlotMap;

use crate::driver::{
    AdapterInfo, AdapterRequestOptions, BufferId, BufferUsages, ComputePipelineId, CopyRegion,
    DeviceReply, DeviceRequest, Driver, Features, Limits, LossNotice, LossReason, MapMode,
    PowerPreference, RenderPipelineId,
};
use crate::errors::{GpuError, Result};
use crate::pipeline::{
    BlendMode, CompareFunction, ComputePipelineDesc, CullMode, FrontFace, PrimitiveTopology,
    RenderPipelineDesc, TextureFormat, VertexFormat, VertexStepMode,
};

/// `wgpu`-backed GPU driver.
pub struct WgpuDriver {
    instance: wgpu::Instance,
    adapter: Option<wgpu::Adapter>,
    device: Option<wgpu::Device>,
    queue: Option<wgpu::Queue>,
    buffers: SlotMap<BufferId, wgpu::Buffer>,
    render_pipelines: SlotMap<RenderPipelineId, wgpu::RenderPipeline>,
    compute_pipelines: SlotMap<ComputePipelineId, wgpu::ComputePipeline>,
}

impl Default for WgpuDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl WgpuDriver {
    #[must_use]
    pub fn new() -> Self {
        Self {
            instance: wgpu::Instance::default(),
            adapter: None,
            device: None,
            queue: None,
            buffers: SlotMap::with_key(),
            render_pipelines: SlotMap::with_key(),
            compute_pipelines: SlotMap::with_key(),
        }
    }

    fn device(&self) -> Result<&wgpu::Device> {
        self.device
            .as_ref()
            .ok_or_else(|| GpuError::DriverError("no wgpu device".to_string()))
    }

    fn queue(&self) -> Result<&wgpu::Queue> {
        self.queue
            .as_ref()
            .ok_or_else(|| GpuError::DriverError("no wgpu queue".to_string()))
    }

    fn buffer(&self, id: BufferId) -> Result<&wgpu::Buffer> {
        self.buffers
            .get(id)
            .ok_or_else(|| GpuError::DriverError(format!("dangling buffer handle {id:?}")))
    }
}

// ─── Type Mapping ────────────────────────────────────────────────────────────

fn map_power_preference(pref: PowerPreference) -> wgpu::PowerPreference {
    match pref {
        PowerPreference::None => wgpu::PowerPreference::None,
        PowerPreference::LowPower => wgpu::PowerPreference::LowPower,
        PowerPreference::HighPerformance => wgpu::PowerPreference::HighPerformance,
    }
}

fn map_features(features: Features) -> wgpu::Features {
    let mut out = wgpu::Features::empty();
    let pairs = [
        (Features::TIMESTAMP_QUERY, wgpu::Features::TIMESTAMP_QUERY),
        (
            Features::DEPTH32FLOAT_STENCIL8,
            wgpu::Features::DEPTH32FLOAT_STENCIL8,
        ),
        (
            Features::FLOAT32_FILTERABLE,
            wgpu::Features::FLOAT32_FILTERABLE,
        ),
        (
            Features::INDIRECT_FIRST_INSTANCE,
            wgpu::Features::INDIRECT_FIRST_INSTANCE,
        ),
        (Features::SHADER_F16, wgpu::Features::SHADER_F16),
    ];
    for (ours, theirs) in pairs {
        if features.contains(ours) {
            out |= theirs;
        }
    }
    out
}

fn unmap_features(features: wgpu::Features) -> Features {
    let mut out = Features::empty();
    let pairs = [
        (Features::TIMESTAMP_QUERY, wgpu::Features::TIMESTAMP_QUERY),
        (
            Features::DEPTH32FLOAT_STENCIL8,
            wgpu::Features::DEPTH32FLOAT_STENCIL8,
        ),
        (
            Features::FLOAT32_FILTERABLE,
            wgpu::Features::FLOAT32_FILTERABLE,
        ),
        (
            Features::INDIRECT_FIRST_INSTANCE,
            wgpu::Features::INDIRECT_FIRST_INSTANCE,
        ),
        (Features::SHADER_F16, wgpu::Features::SHADER_F16),
    ];
    for (ours, theirs) in pairs {
        if features.contains(theirs) {
            out |= ours;
        }
    }
    out
}

fn map_limits(limits: &Limits) -> wgpu::Limits {
    wgpu::Limits {
        max_buffer_size: limits.max_buffer_size,
        max_bind_groups: limits.max_bind_groups,
        max_uniform_buffer_binding_size: u64::from(limits.max_uniform_buffer_binding_size),
        max_storage_buffer_binding_size: u64::from(limits.max_storage_buffer_binding_size),
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        max_vertex_buffers: limits.max_vertex_buffers,
        ..wgpu::Limits::default()
    }
}

fn unmap_limits(limits: &wgpu::Limits) -> Limits {
    Limits {
        max_buffer_size: limits.max_buffer_size,
        max_bind_groups: limits.max_bind_groups,
        max_uniform_buffer_binding_size: limits.max_uniform_buffer_binding_size as u32,
        max_storage_buffer_binding_size: limits.max_storage_buffer_binding_size as u32,
        max_texture_dimension_2d: limits.max_texture_dimension_2d,
        max_vertex_buffers: limits.max_vertex_buffers,
    }
}

fn map_usage(usage: BufferUsages) -> wgpu::BufferUsages {
    let mut out = wgpu::BufferUsages::empty();
    let pairs = [
        (BufferUsages::MAP_READ, wgpu::BufferUsages::MAP_READ),
        (BufferUsages::MAP_WRITE, wgpu::BufferUsages::MAP_WRITE),
        (BufferUsages::COPY_SRC, wgpu::BufferUsages::COPY_SRC),
        (BufferUsages::COPY_DST, wgpu::BufferUsages::COPY_DST),
        (BufferUsages::INDEX, wgpu::BufferUsages::INDEX),
        (BufferUsages::VERTEX, wgpu::BufferUsages::VERTEX),
        (BufferUsages::UNIFORM, wgpu::BufferUsages::UNIFORM),
        (BufferUsages::STORAGE, wgpu::BufferUsages::STORAGE),
        (BufferUsages::INDIRECT, wgpu::BufferUsages::INDIRECT),
    ];
    for (ours, theirs) in pairs {
        if usage.contains(ours) {
            out |= theirs;
        }
    }
    out
}

fn map_texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
        TextureFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
        TextureFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::Rgba32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R32Float => wgpu::TextureFormat::R32Float,
        TextureFormat::Depth24PlusStencil8 => wgpu::TextureFormat::Depth24PlusStencil8,
        TextureFormat::Depth32Float => wgpu::TextureFormat::Depth32Float,
    }
}

fn map_vertex_format(format: VertexFormat) -> wgpu::VertexFormat {
    match format {
        VertexFormat::Float32 => wgpu::VertexFormat::Float32,
        VertexFormat::Float32x2 => wgpu::VertexFormat::Float32x2,
        VertexFormat::Float32x3 => wgpu::VertexFormat::Float32x3,
        VertexFormat::Float32x4 => wgpu::VertexFormat::Float32x4,
        VertexFormat::Uint32 => wgpu::VertexFormat::Uint32,
        VertexFormat::Sint32 => wgpu::VertexFormat::Sint32,
        VertexFormat::Unorm8x4 => wgpu::VertexFormat::Unorm8x4,
    }
}

fn map_compare(compare: CompareFunction) -> wgpu::CompareFunction {
    match compare {
        CompareFunction::Never => wgpu::CompareFunction::Never,
        CompareFunction::Less => wgpu::CompareFunction::Less,
        CompareFunction::LessEqual => wgpu::CompareFunction::LessEqual,
        CompareFunction::Equal => wgpu::CompareFunction::Equal,
        CompareFunction::Greater => wgpu::CompareFunction::Greater,
        CompareFunction::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        CompareFunction::Always => wgpu::CompareFunction::Always,
    }
}

fn map_blend(blend: BlendMode) -> Option<wgpu::BlendState> {
    match blend {
        BlendMode::Replace => Some(wgpu::BlendState::REPLACE),
        BlendMode::AlphaBlend => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: wgpu::BlendFactor::One,
                dst_factor: wgpu::BlendFactor::One,
                operation: wgpu::BlendOperation::Add,
            },
            alpha: wgpu::BlendComponent::OVER,
        }),
    }
}

fn map_loss_reason(reason: wgpu::DeviceLostReason) -> LossReason {
    match reason {
        wgpu::DeviceLostReason::Destroyed => LossReason::Destroyed,
        _ => LossReason::Unknown,
    }
}

// ─── Driver Implementation ───────────────────────────────────────────────────

impl Driver for WgpuDriver {
    async fn request_adapter(
        &mut self,
        options: &AdapterRequestOptions,
    ) -> Result<Option<AdapterInfo>> {
        let Ok(adapter) = self
            .instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: map_power_preference(options.power_preference),
                compatible_surface: None,
                force_fallback_adapter: options.force_fallback,
            })
            .await
        else {
            return Ok(None);
        };

        let wgpu_info = adapter.get_info();
        let info = AdapterInfo {
            name: wgpu_info.name.clone(),
            backend: wgpu_info.backend.to_string(),
            features: unmap_features(adapter.features()),
            limits: unmap_limits(&adapter.limits()),
        };
        self.adapter = Some(adapter);
        Ok(Some(info))
    }

    async fn request_device(&mut self, request: &DeviceRequest) -> Result<DeviceReply> {
        let adapter = self
            .adapter
            .as_ref()
            .ok_or_else(|| GpuError::AdapterRequestFailed("no adapter selected".to_string()))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: request.label.as_deref(),
                required_features: map_features(request.required_features),
                required_limits: map_limits(&request.required_limits),
                memory_hints: wgpu::MemoryHints::Performance,
                ..Default::default()
            })
            .await
            .map_err(|e| GpuError::DeviceRequestFailed(e.to_string()))?;

        let (sender, receiver) = flume::unbounded();
        device.set_device_lost_callback(move |reason, message| {
            let _ = sender.send(LossNotice {
                reason: map_loss_reason(reason),
                message,
            });
        });

        let reply = DeviceReply {
            features: unmap_features(device.features()),
            limits: unmap_limits(&device.limits()),
            losses: receiver,
        };
        self.device = Some(device);
        self.queue = Some(queue);
        Ok(reply)
    }

    fn release_device(&mut self) {
        self.buffers.clear();
        self.render_pipelines.clear();
        self.compute_pipelines.clear();
        self.queue = None;
        self.device = None;
    }

    fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<BufferId> {
        let buffer = self.device()?.create_buffer(&wgpu::BufferDescriptor {
            label,
            size,
            usage: map_usage(usage),
            mapped_at_creation: false,
        });
        Ok(self.buffers.insert(buffer))
    }

    fn destroy_buffer(&mut self, buffer: BufferId) {
        if let Some(buffer) = self.buffers.remove(buffer) {
            buffer.destroy();
        }
    }

    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let queue = self
            .queue
            .as_ref()
            .ok_or_else(|| GpuError::DriverError("no wgpu queue".to_string()))?;
        let buffer = self
            .buffers
            .get(buffer)
            .ok_or_else(|| GpuError::DriverError(format!("dangling buffer handle {buffer:?}")))?;
        queue.write_buffer(buffer, offset, data);
        Ok(())
    }

    async fn map_buffer(&mut self, buffer: BufferId, mode: MapMode) -> Result<()> {
        let wgpu_mode = match mode {
            MapMode::Read => wgpu::MapMode::Read,
            MapMode::Write => wgpu::MapMode::Write,
        };
        let slice = self.buffer(buffer)?.slice(..);
        let (sender, receiver) = flume::bounded(1);
        slice.map_async(wgpu_mode, move |result| {
            let _ = sender.send(result);
        });
        let _ = self
            .device()?
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::DriverError(e.to_string()))?;
        receiver
            .recv_async()
            .await
            .map_err(|_| GpuError::DriverError("map_async callback dropped".to_string()))?
            .map_err(|e| GpuError::DriverError(e.to_string()))
    }

    fn mapped_range(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let slice = self.buffer(buffer)?.slice(offset..offset + size);
        Ok(slice.get_mapped_range().to_vec())
    }

    fn unmap(&mut self, buffer: BufferId) -> Result<()> {
        self.buffer(buffer)?.unmap();
        Ok(())
    }

    fn submit_copies(&mut self, regions: &[CopyRegion]) -> Result<()> {
        let device = self.device()?;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("copy-batch"),
        });
        for region in regions {
            let src = self.buffer(region.src)?;
            let dst = self.buffer(region.dst)?;
            encoder.copy_buffer_to_buffer(
                src,
                region.src_offset,
                dst,
                region.dst_offset,
                region.size,
            );
        }
        self.queue()?.submit(Some(encoder.finish()));
        Ok(())
    }

    async fn on_submitted_work_done(&mut self) -> Result<()> {
        let (sender, receiver) = flume::bounded(1);
        self.queue()?.on_submitted_work_done(move || {
            let _ = sender.send(());
        });
        let _ = self
            .device()?
            .poll(wgpu::PollType::wait_indefinitely())
            .map_err(|e| GpuError::DriverError(e.to_string()))?;
        receiver
            .recv_async()
            .await
            .map_err(|_| GpuError::DriverError("work-done callback dropped".to_string()))
    }

    async fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
    ) -> Result<RenderPipelineId> {
        let device = self.device()?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: desc.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(desc.shader_source.as_str().into()),
        });

        // Attribute arrays must outlive the layout slice wgpu borrows.
        let attributes: Vec<Vec<wgpu::VertexAttribute>> = desc
            .vertex_buffers
            .iter()
            .map(|vb| {
                vb.attributes
                    .iter()
                    .map(|a| wgpu::VertexAttribute {
                        format: map_vertex_format(a.format),
                        offset: a.offset,
                        shader_location: a.shader_location,
                    })
                    .collect()
            })
            .collect();
        let vertex_buffers: Vec<wgpu::VertexBufferLayout> = desc
            .vertex_buffers
            .iter()
            .zip(&attributes)
            .map(|(vb, attrs)| wgpu::VertexBufferLayout {
                array_stride: vb.stride,
                step_mode: match vb.step_mode {
                    VertexStepMode::Vertex => wgpu::VertexStepMode::Vertex,
                    VertexStepMode::Instance => wgpu::VertexStepMode::Instance,
                },
                attributes: attrs,
            })
            .collect();

        let color_targets: Vec<Option<wgpu::ColorTargetState>> = desc
            .color_targets
            .iter()
            .map(|t| {
                Some(wgpu::ColorTargetState {
                    format: map_texture_format(t.format),
                    blend: map_blend(t.blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect();

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: desc.label.as_deref(),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: Some(&desc.vertex_entry),
                buffers: &vertex_buffers,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: desc.fragment_entry.as_deref().map(|entry| wgpu::FragmentState {
                module: &module,
                entry_point: Some(entry),
                targets: &color_targets,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: match desc.primitive.topology {
                    PrimitiveTopology::PointList => wgpu::PrimitiveTopology::PointList,
                    PrimitiveTopology::LineList => wgpu::PrimitiveTopology::LineList,
                    PrimitiveTopology::TriangleList => wgpu::PrimitiveTopology::TriangleList,
                    PrimitiveTopology::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
                },
                front_face: match desc.primitive.front_face {
                    FrontFace::Ccw => wgpu::FrontFace::Ccw,
                    FrontFace::Cw => wgpu::FrontFace::Cw,
                },
                cull_mode: match desc.primitive.cull_mode {
                    CullMode::None => None,
                    CullMode::Front => Some(wgpu::Face::Front),
                    CullMode::Back => Some(wgpu::Face::Back),
                },
                ..Default::default()
            },
            depth_stencil: desc.depth_stencil.map(|ds| wgpu::DepthStencilState {
                format: map_texture_format(ds.format),
                depth_write_enabled: Some(ds.depth_write_enabled),
                depth_compare: Some(map_compare(ds.depth_compare)),
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: desc.multisample.count,
                mask: !0,
                alpha_to_coverage_enabled: desc.multisample.alpha_to_coverage_enabled,
            },
            multiview_mask: None,
            cache: None,
        });
        Ok(self.render_pipelines.insert(pipeline))
    }

    async fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipelineId> {
        let device = self.device()?;
        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: desc.label.as_deref(),
            source: wgpu::ShaderSource::Wgsl(desc.shader_source.as_str().into()),
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: desc.label.as_deref(),
            layout: None,
            module: &module,
            entry_point: Some(&desc.entry_point),
            compilation_options: wgpu::PipelineCompilationOptions::default(),
            cache: None,
        });
        Ok(self.compute_pipelines.insert(pipeline))
    }

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineId) {
        self.render_pipelines.remove(pipeline);
    }

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineId) {
        self.compute_pipelines.remove(pipeline);
    }
}
