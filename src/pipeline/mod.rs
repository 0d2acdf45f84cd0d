//! Pipeline Manager
//!
//! Descriptor-keyed caching of compiled render and compute pipelines. The
//! two kinds run structurally identical caches with independent key spaces
//! and capacities.
//!
//! `get_*_pipeline` computes a deterministic key from the descriptor's
//! semantically relevant fields (the label is excluded), returns the cached
//! handle on a hit, and otherwise compiles through the driver, recording the
//! compile duration and evicting the single least-recently-used entry when
//! the cache exceeds capacity. Evicted and cleared handles are not destroyed
//! by the manager — callers drain them via [`PipelineManager::drain_orphaned`]
//! and dispose of them once the GPU no longer references them.

mod cache;
mod descriptor;

pub use cache::PipelineCacheStats;
pub use descriptor::{
    BlendMode, ColorTarget, CompareFunction, ComputePipelineDesc, CullMode, DepthStencilState,
    FrontFace, MultisampleState, PrimitiveState, PrimitiveTopology, RenderPipelineDesc,
    TextureFormat, VertexAttribute, VertexBufferLayout, VertexFormat, VertexStepMode, fx_hash_key,
};

use std::time::Instant;

use crate::device::DeviceContext;
use crate::driver::{ComputePipelineId, Driver, RenderPipelineId};
use crate::errors::Result;

use cache::LruCache;

/// Capacities for the two pipeline caches.
#[derive(Debug, Clone, Copy)]
pub struct PipelineCacheConfig {
    pub render_capacity: usize,
    pub compute_capacity: usize,
}

impl Default for PipelineCacheConfig {
    fn default() -> Self {
        Self {
            render_capacity: 256,
            compute_capacity: 64,
        }
    }
}

/// Owner of the render and compute pipeline caches.
pub struct PipelineManager {
    render: LruCache<RenderPipelineId>,
    compute: LruCache<ComputePipelineId>,
}

impl PipelineManager {
    #[must_use]
    pub fn new(config: PipelineCacheConfig) -> Self {
        Self {
            render: LruCache::new(config.render_capacity),
            compute: LruCache::new(config.compute_capacity),
        }
    }

    /// Returns the cached render pipeline for `desc`, compiling on a miss.
    ///
    /// Suspends while the driver compiles; a compile failure is surfaced as
    /// a [`crate::errors::GpuError::PipelineCompileFailed`] and nothing is
    /// cached.
    pub async fn get_render_pipeline<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        desc: &RenderPipelineDesc,
    ) -> Result<RenderPipelineId> {
        let key = desc.key();
        if let Some(id) = self.render.lookup(key) {
            return Ok(id);
        }

        let started = Instant::now();
        let id = ctx.driver.create_render_pipeline(desc).await?;
        let compile_time = started.elapsed();
        ctx.stats.track_pipeline_created();
        log::debug!(
            "compiled render pipeline {} in {compile_time:?}",
            desc.label_or("<unlabeled>")
        );
        self.render.insert(key, id, desc.label.clone(), compile_time);
        Ok(id)
    }

    /// Returns the cached compute pipeline for `desc`, compiling on a miss.
    pub async fn get_compute_pipeline<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        desc: &ComputePipelineDesc,
    ) -> Result<ComputePipelineId> {
        let key = desc.key();
        if let Some(id) = self.compute.lookup(key) {
            return Ok(id);
        }

        let started = Instant::now();
        let id = ctx.driver.create_compute_pipeline(desc).await?;
        let compile_time = started.elapsed();
        ctx.stats.track_pipeline_created();
        log::debug!(
            "compiled compute pipeline {} in {compile_time:?}",
            desc.label_or("<unlabeled>")
        );
        self.compute
            .insert(key, id, desc.label.clone(), compile_time);
        Ok(id)
    }

    #[must_use]
    pub fn render_stats(&self) -> PipelineCacheStats {
        self.render.stats()
    }

    #[must_use]
    pub fn compute_stats(&self) -> PipelineCacheStats {
        self.compute.stats()
    }

    /// The `n` most-used render entries, hottest first:
    /// `(label, use_count, age)`.
    #[must_use]
    pub fn hottest_render(&self, n: usize) -> Vec<(Option<String>, u64, std::time::Duration)> {
        self.render.hottest(n)
    }

    /// Compile duration recorded for a render descriptor still in the cache.
    #[must_use]
    pub fn render_compile_time(&self, desc: &RenderPipelineDesc) -> Option<std::time::Duration> {
        self.render.compile_time_of(desc.key())
    }

    /// Drops all entries from both caches. Compiled handles are orphaned,
    /// not destroyed.
    pub fn clear(&mut self) {
        self.render.clear();
        self.compute.clear();
    }

    /// Handles dropped by eviction or [`Self::clear`], for the caller to
    /// destroy once the GPU is done with them.
    pub fn drain_orphaned(&mut self) -> (Vec<RenderPipelineId>, Vec<ComputePipelineId>) {
        (self.render.drain_orphaned(), self.compute.drain_orphaned())
    }

    #[must_use]
    pub fn render_len(&self) -> usize {
        self.render.len()
    }

    #[must_use]
    pub fn compute_len(&self) -> usize {
        self.compute.len()
    }
}
