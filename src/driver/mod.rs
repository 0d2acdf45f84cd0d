//! Driver Boundary
//!
//! The [`Driver`] trait is the narrow interface through which the resource
//! core reaches the native GPU backend. Everything above it — lifecycle,
//! pools, caches, validation — operates on the opaque handle ids defined
//! here and never touches backend objects directly.
//!
//! Two implementations ship with the crate:
//!
//! - [`mock::MockDriver`] — an in-memory backend with real byte storage,
//!   used for headless operation and tests.
//! - `WgpuDriver` (feature `wgpu-driver`) — maps the trait onto `wgpu`.
//!
//! Handles are `slotmap` keys. The driver owns the primary storage for each
//! resource kind; the [`crate::device::DeviceManager`] tracks metadata in
//! secondary maps keyed by the same ids, so a stale handle can never alias a
//! live backend object.

use bitflags::bitflags;
use slotmap::new_key_type;

use crate::errors::Result;
use crate::pipeline::{ComputePipelineDesc, RenderPipelineDesc};

pub mod mock;
#[cfg(feature = "wgpu-driver")]
pub mod wgpu;

new_key_type! {
    /// Opaque handle to a driver-owned buffer.
    pub struct BufferId;
    /// Opaque handle to a compiled render pipeline.
    pub struct RenderPipelineId;
    /// Opaque handle to a compiled compute pipeline.
    pub struct ComputePipelineId;
}

bitflags! {
    /// Buffer usage flags, mirroring the WebGPU usage model.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsages: u32 {
        const MAP_READ   = 1 << 0;
        const MAP_WRITE  = 1 << 1;
        const COPY_SRC   = 1 << 2;
        const COPY_DST   = 1 << 3;
        const INDEX      = 1 << 4;
        const VERTEX     = 1 << 5;
        const UNIFORM    = 1 << 6;
        const STORAGE    = 1 << 7;
        const INDIRECT   = 1 << 8;
    }
}

bitflags! {
    /// Optional device capabilities negotiated at initialization.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Features: u64 {
        const TIMESTAMP_QUERY         = 1 << 0;
        const DEPTH32FLOAT_STENCIL8   = 1 << 1;
        const FLOAT32_FILTERABLE      = 1 << 2;
        const INDIRECT_FIRST_INSTANCE = 1 << 3;
        const SHADER_F16              = 1 << 4;
    }
}

/// Device limits negotiated at initialization.
///
/// Defaults follow the WebGPU baseline guarantees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_buffer_size: u64,
    pub max_bind_groups: u32,
    pub max_uniform_buffer_binding_size: u32,
    pub max_storage_buffer_binding_size: u32,
    pub max_texture_dimension_2d: u32,
    pub max_vertex_buffers: u32,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_buffer_size: 256 << 20,
            max_bind_groups: 4,
            max_uniform_buffer_binding_size: 64 << 10,
            max_storage_buffer_binding_size: 128 << 20,
            max_texture_dimension_2d: 8192,
            max_vertex_buffers: 8,
        }
    }
}

impl Limits {
    /// Checks that every limit in `required` is within what `self` provides.
    ///
    /// Returns the first unsatisfiable limit as `(name, required, available)`.
    #[must_use]
    pub fn check_required(&self, required: &Limits) -> Option<(&'static str, u64, u64)> {
        macro_rules! check {
            ($field:ident) => {
                if required.$field as u64 > self.$field as u64 {
                    return Some((
                        stringify!($field),
                        required.$field as u64,
                        self.$field as u64,
                    ));
                }
            };
        }
        check!(max_buffer_size);
        check!(max_bind_groups);
        check!(max_uniform_buffer_binding_size);
        check!(max_storage_buffer_binding_size);
        check!(max_texture_dimension_2d);
        check!(max_vertex_buffers);
        None
    }
}

/// Adapter power preference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerPreference {
    #[default]
    None,
    LowPower,
    HighPerformance,
}

/// Options for [`Driver::request_adapter`].
#[derive(Debug, Clone, Default)]
pub struct AdapterRequestOptions {
    pub power_preference: PowerPreference,
    pub force_fallback: bool,
}

/// Description of the adapter the driver selected.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub backend: String,
    pub features: Features,
    pub limits: Limits,
}

/// Request for [`Driver::request_device`]. The feature set must already be
/// negotiated (required plus available optional features).
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub label: Option<String>,
    pub required_features: Features,
    pub required_limits: Limits,
}

/// Result of a successful device request.
pub struct DeviceReply {
    /// Features actually enabled on the device.
    pub features: Features,
    /// Limits actually in effect on the device.
    pub limits: Limits,
    /// Channel delivering asynchronous device-loss notifications.
    pub losses: flume::Receiver<LossNotice>,
}

/// Why a device was lost.
///
/// `Unknown` losses are considered transient and eligible for recovery;
/// `Destroyed` is terminal. The true recoverable/terminal boundary is
/// driver-specific; backends map their own taxonomy onto these two values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossReason {
    Unknown,
    Destroyed,
}

impl LossReason {
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Unknown)
    }
}

/// A device-loss notification delivered by the driver.
#[derive(Debug, Clone)]
pub struct LossNotice {
    pub reason: LossReason,
    pub message: String,
}

/// Mapping mode for [`Driver::map_buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapMode {
    Read,
    Write,
}

/// One buffer-to-buffer copy inside a command submission.
#[derive(Debug, Clone, Copy)]
pub struct CopyRegion {
    pub src: BufferId,
    pub src_offset: u64,
    pub dst: BufferId,
    pub dst_offset: u64,
    pub size: u64,
}

/// The narrow GPU backend interface.
///
/// All methods that wait on the GPU or the driver are `async` and suspend the
/// calling flow; bookkeeping methods are synchronous. The trait is consumed
/// generically (`DeviceManager<D: Driver>`) in a single-threaded cooperative
/// model, so implementations pay no dynamic-dispatch cost, need not be object
/// safe, and futures need not be `Send`.
#[allow(async_fn_in_trait)]
pub trait Driver {
    /// Requests an adapter. `Ok(None)` means no compatible adapter exists.
    async fn request_adapter(
        &mut self,
        options: &AdapterRequestOptions,
    ) -> Result<Option<AdapterInfo>>;

    /// Requests a device from the previously selected adapter.
    async fn request_device(&mut self, request: &DeviceRequest) -> Result<DeviceReply>;

    /// Drops the current device and every resource created from it.
    /// Outstanding handles become dangling; callers clear their own tables.
    fn release_device(&mut self);

    // ── Buffers ────────────────────────────────────────────────────────────

    fn create_buffer(&mut self, size: u64, usage: BufferUsages, label: Option<&str>)
    -> Result<BufferId>;

    fn destroy_buffer(&mut self, buffer: BufferId);

    /// Writes `data` through the queue's write path.
    fn write_buffer(&mut self, buffer: BufferId, offset: u64, data: &[u8]) -> Result<()>;

    /// Maps the buffer for CPU access. Suspends until the driver completes.
    async fn map_buffer(&mut self, buffer: BufferId, mode: MapMode) -> Result<()>;

    /// Copies out of a mapped range.
    fn mapped_range(&mut self, buffer: BufferId, offset: u64, size: u64) -> Result<Vec<u8>>;

    fn unmap(&mut self, buffer: BufferId) -> Result<()>;

    // ── Commands ───────────────────────────────────────────────────────────

    /// Encodes all regions into a single command submission and executes it.
    fn submit_copies(&mut self, regions: &[CopyRegion]) -> Result<()>;

    /// Suspends until all previously submitted work has completed.
    async fn on_submitted_work_done(&mut self) -> Result<()>;

    // ── Pipelines ──────────────────────────────────────────────────────────

    /// Compiles a render pipeline. Suspends while the driver reports
    /// compilation diagnostics.
    async fn create_render_pipeline(
        &mut self,
        desc: &RenderPipelineDesc,
    ) -> Result<RenderPipelineId>;

    /// Compiles a compute pipeline.
    async fn create_compute_pipeline(
        &mut self,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipelineId>;

    fn destroy_render_pipeline(&mut self, pipeline: RenderPipelineId);

    fn destroy_compute_pipeline(&mut self, pipeline: ComputePipelineId);
}
