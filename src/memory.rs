//! Memory Manager
//!
//! Thin facade composing the [`StagingPool`], the [`StagingRing`] and
//! (optionally) a [`MemoryAllocator`] behind one acquisition surface, so the
//! layers above deal with a single "give me upload memory" entry point.
//!
//! Each composed component keeps its own semantics; the facade adds no
//! policy beyond construction wiring and `end_frame` sequencing.

use crate::alloc::{Allocation, MemoryAllocator, MemoryUsage};
use crate::device::DeviceContext;
use crate::driver::{BufferId, BufferUsages, Driver};
use crate::errors::Result;
use crate::pool::{StagingPool, StagingPoolConfig, StagingPoolStats};
use crate::ring::{RingSlice, StagingRing};

/// Staging ring and optional sub-allocator configuration.
#[derive(Debug, Clone, Copy)]
pub struct MemoryConfig {
    /// Number of staging ring frame slots (frames in flight).
    pub ring_frames: usize,
    /// Capacity of each ring slot in bytes.
    pub ring_slot_capacity: u64,
    /// Capacity of the sub-allocator's backing buffer; `None` disables the
    /// allocator entirely.
    pub allocator_capacity: Option<u64>,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            ring_frames: 3,
            ring_slot_capacity: 2 << 20,
            allocator_capacity: None,
        }
    }
}

/// Combined snapshot across the composed components.
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub pool: StagingPoolStats,
    pub ring_frame: usize,
    pub ring_cursor: u64,
    pub allocator: Option<MemoryUsage>,
}

/// Facade over the staging pool, staging ring and optional sub-allocator.
pub struct MemoryManager {
    pool: StagingPool,
    ring: StagingRing,
    allocator: Option<MemoryAllocator>,
}

impl MemoryManager {
    /// Builds the composed components, creating the ring slot buffers and
    /// (if configured) the allocator's backing buffer.
    pub fn new<D: Driver>(
        ctx: &mut DeviceContext<'_, D>,
        pool_config: StagingPoolConfig,
        config: MemoryConfig,
    ) -> Result<Self> {
        let mut pool = StagingPool::new(pool_config);
        pool.prewarm(ctx)?;
        let ring = StagingRing::new(ctx, config.ring_frames, config.ring_slot_capacity)?;
        let allocator = match config.allocator_capacity {
            Some(capacity) => {
                let backing = ctx.create_buffer(
                    capacity,
                    BufferUsages::COPY_SRC | BufferUsages::COPY_DST | BufferUsages::STORAGE,
                    Some("sub-alloc-backing"),
                )?;
                Some(MemoryAllocator::new(backing, capacity))
            }
            None => None,
        };
        Ok(Self {
            pool,
            ring,
            allocator,
        })
    }

    // ── Staging pool ───────────────────────────────────────────────────────

    /// Leases a staging buffer of at least `min_size` bytes from the pool.
    pub fn acquire_staging<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        min_size: u64,
    ) -> Result<BufferId> {
        self.pool.acquire(ctx, min_size)
    }

    /// Returns a leased staging buffer.
    pub fn release_staging<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        buffer: BufferId,
    ) -> Result<()> {
        self.pool.release(ctx, buffer)
    }

    /// Bounds idle pooled memory; see [`StagingPool::trim`].
    pub fn trim_staging<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        target_per_size: usize,
    ) -> Result<()> {
        self.pool.trim(ctx, target_per_size)
    }

    // ── Staging ring ───────────────────────────────────────────────────────

    /// Bump-allocates transient upload memory in the active ring slot.
    pub fn ring_alloc(&mut self, size: u64, alignment: u64) -> Option<RingSlice> {
        self.ring.allocate(size, alignment)
    }

    // ── Sub-allocator ──────────────────────────────────────────────────────

    /// Sub-allocates from the backing buffer. `None` when the allocator is
    /// disabled or exhausted.
    pub fn allocate(&mut self, size: u64) -> Option<Allocation> {
        self.allocator.as_mut()?.allocate(size)
    }

    /// Frees a sub-allocation. `false` for stale handles or when the
    /// allocator is disabled.
    pub fn free(&mut self, allocation: Allocation) -> bool {
        self.allocator
            .as_mut()
            .is_some_and(|a| a.free(allocation))
    }

    /// The sub-allocator's backing buffer, when enabled.
    #[must_use]
    pub fn allocator_backing(&self) -> Option<BufferId> {
        self.allocator.as_ref().map(MemoryAllocator::backing)
    }

    // ── Frame sequencing ───────────────────────────────────────────────────

    /// Ends the frame: advances the staging ring to its next slot.
    ///
    /// Callers must have ensured GPU work referencing the slot being cycled
    /// onto has completed (the ring's producer/consumer contract).
    pub fn end_frame(&mut self) {
        self.ring.advance_frame();
    }

    /// Alias for [`Self::end_frame`], matching the ring's own naming.
    pub fn advance_frame(&mut self) {
        self.end_frame();
    }

    #[must_use]
    pub fn current_frame(&self) -> usize {
        self.ring.current_frame()
    }

    // ── Observability ──────────────────────────────────────────────────────

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            pool: self.pool.stats(),
            ring_frame: self.ring.current_frame(),
            ring_cursor: self.ring.current_cursor(),
            allocator: self.allocator.as_ref().map(MemoryAllocator::usage),
        }
    }

    /// Fragmentation of the sub-allocator, 0 when disabled.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        self.allocator
            .as_ref()
            .map_or(0.0, MemoryAllocator::fragmentation)
    }

    #[must_use]
    pub fn pool(&self) -> &StagingPool {
        &self.pool
    }

    #[must_use]
    pub fn ring(&self) -> &StagingRing {
        &self.ring
    }

    /// Tears down everything this manager created: pooled buffers, ring
    /// slots and the allocator backing buffer.
    pub fn destroy<D: Driver>(mut self, ctx: &mut DeviceContext<'_, D>) -> Result<()> {
        self.pool.clear(ctx)?;
        self.ring.destroy(ctx)?;
        if let Some(allocator) = self.allocator {
            ctx.destroy_buffer(allocator.backing())?;
        }
        Ok(())
    }
}
