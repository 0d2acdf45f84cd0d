//! Construction-Time Options
//!
//! [`GpuSettings`] is the single plain options structure supplied when
//! constructing the resource core: adapter selection, feature/limit
//! negotiation, recovery policy and the sub-configurations consumed by the
//! pooling components. There is no file, environment or CLI surface — callers
//! build the struct (usually via `..Default::default()`).

use crate::driver::{Features, Limits, PowerPreference};
use crate::memory::MemoryConfig;
use crate::pipeline::PipelineCacheConfig;
use crate::pool::StagingPoolConfig;

/// Options for the GPU resource core.
#[derive(Debug, Clone)]
pub struct GpuSettings {
    /// Adapter power preference passed through to the driver.
    pub power_preference: PowerPreference,

    /// Features that must be available; initialization fails naming the
    /// missing capability otherwise.
    pub required_features: Features,

    /// Features enabled only if the adapter supports them.
    pub optional_features: Features,

    /// Limits the device must provide. Initialization fails naming the first
    /// limit the adapter cannot satisfy.
    pub required_limits: Limits,

    /// Debug label attached to the device.
    pub label: Option<String>,

    /// Whether a transient device loss starts automatic recovery.
    pub auto_recover: bool,

    /// Maximum recovery attempts per loss episode. Once exceeded the device
    /// stays lost and the failure is reported through callbacks/log only.
    pub max_recovery_attempts: u32,

    /// Staging buffer pool configuration.
    pub staging_pool: StagingPoolConfig,

    /// Render/compute pipeline cache capacities.
    pub pipelines: PipelineCacheConfig,

    /// Staging ring and optional sub-allocator configuration.
    pub memory: MemoryConfig,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            power_preference: PowerPreference::None,
            required_features: Features::empty(),
            // Enabled opportunistically when the adapter has them.
            optional_features: Features::TIMESTAMP_QUERY | Features::DEPTH32FLOAT_STENCIL8,
            required_limits: Limits::default(),
            label: None,
            auto_recover: true,
            max_recovery_attempts: 3,
            staging_pool: StagingPoolConfig::default(),
            pipelines: PipelineCacheConfig::default(),
            memory: MemoryConfig::default(),
        }
    }
}
