#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

//! GPU resource core: device lifecycle, pooling, sub-allocation and pipeline
//! caching, layered directly above a narrow GPU driver boundary.
//!
//! The native backend is abstracted behind [`driver::Driver`]; everything in
//! this crate — the [`DeviceManager`] state machine, the [`StagingPool`],
//! [`MemoryAllocator`], [`StagingRing`], copy validation and the
//! [`PipelineManager`] — is backend-agnostic bookkeeping that talks to the
//! driver through opaque handles.

pub mod alloc;
pub mod buffer;
pub mod copy;
pub mod device;
pub mod driver;
pub mod errors;
pub mod memory;
pub mod pipeline;
pub mod pool;
pub mod ring;
pub mod settings;

pub use alloc::{Allocation, MemoryAllocator, MemoryUsage};
pub use buffer::{BufferInfo, MapState};
pub use copy::{BatchCopyResult, CopyDescriptor, CopyResult, batch_copy, clear_range, copy, fill};
pub use device::{DeviceContext, DeviceManager, DeviceState, DeviceStats, FeatureSnapshot};
pub use driver::{
    BufferId, BufferUsages, ComputePipelineId, Driver, Features, Limits, LossNotice, LossReason,
    MapMode, PowerPreference, RenderPipelineId,
};
pub use errors::{GpuError, Result, ValidationError, ValidationKind};
pub use memory::{MemoryConfig, MemoryManager};
pub use pipeline::{
    BlendMode, ColorTarget, CompareFunction, ComputePipelineDesc, CullMode, DepthStencilState,
    FrontFace, MultisampleState, PipelineCacheConfig, PipelineCacheStats, PipelineManager,
    PrimitiveState, PrimitiveTopology, RenderPipelineDesc, TextureFormat, VertexAttribute,
    VertexBufferLayout, VertexFormat, VertexStepMode,
};
pub use pool::{StagingPool, StagingPoolConfig, StagingPoolStats};
pub use ring::{RingSlice, StagingRing};
pub use settings::GpuSettings;
