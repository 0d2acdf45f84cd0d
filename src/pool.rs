//! Staging Buffer Pool
//!
//! Bucketed reuse pool for upload (staging) buffers. One sub-pool exists per
//! entry in a fixed ascending ladder of standard sizes, 256 B up to 1 MiB in
//! powers of two. [`StagingPool::acquire`] rounds a request up to the
//! smallest standard size and leases a buffer from that bucket, creating one
//! on demand while the bucket is below capacity. Requests larger than the
//! ladder, or arriving while the bucket is full, fall through to an unpooled
//! buffer that is destroyed on release.
//!
//! A pooled buffer is exclusively leased to one borrower between `acquire`
//! and `release`. [`StagingPool::trim`] bounds idle memory by destroying the
//! oldest available entries per bucket beyond a target count, leaving warm
//! buffers in place.

use std::time::Instant;

use crate::device::DeviceContext;
use crate::driver::{BufferId, BufferUsages, Driver};
use crate::errors::Result;

/// The fixed ascending ladder of standard staging sizes.
pub const STANDARD_SIZES: [u64; 13] = [
    256,
    512,
    1 << 10,
    2 << 10,
    4 << 10,
    8 << 10,
    16 << 10,
    32 << 10,
    64 << 10,
    128 << 10,
    256 << 10,
    512 << 10,
    1 << 20,
];

/// Usage carried by every pool-created staging buffer.
const STAGING_USAGE: BufferUsages = BufferUsages::MAP_WRITE.union(BufferUsages::COPY_SRC);

/// Staging pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct StagingPoolConfig {
    /// Maximum buffers per size bucket. A full bucket falls through to
    /// unpooled allocation.
    pub max_per_bucket: usize,
    /// Buffers created per bucket by [`StagingPool::prewarm`].
    pub preallocate_per_bucket: usize,
}

impl Default for StagingPoolConfig {
    fn default() -> Self {
        Self {
            max_per_bucket: 8,
            preallocate_per_bucket: 0,
        }
    }
}

/// One pooled buffer and its lease bookkeeping.
struct PoolEntry {
    buffer: BufferId,
    in_use: bool,
    created_at: Instant,
    last_used: Instant,
    use_count: u64,
}

/// Aggregate pool statistics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StagingPoolStats {
    /// Acquires satisfied by an existing pooled buffer.
    pub hits: u64,
    /// Acquires that created a new pooled buffer.
    pub misses_pooled: u64,
    /// Acquires that fell through to an unpooled buffer.
    pub misses_unpooled: u64,
    pub total_acquired: u64,
    pub total_released: u64,
}

impl StagingPoolStats {
    #[must_use]
    pub fn misses(&self) -> u64 {
        self.misses_pooled + self.misses_unpooled
    }

    /// Hits over total acquires, 0 when nothing was acquired yet.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_acquired == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total_acquired as f64
    }
}

/// Per-bucket occupancy, for observability.
#[derive(Debug, Clone, Copy)]
pub struct BucketOccupancy {
    pub size: u64,
    pub total: usize,
    pub in_use: usize,
}

/// Bucketed reuse pool of staging buffers.
pub struct StagingPool {
    config: StagingPoolConfig,
    buckets: [Vec<PoolEntry>; STANDARD_SIZES.len()],
    stats: StagingPoolStats,
}

impl StagingPool {
    #[must_use]
    pub fn new(config: StagingPoolConfig) -> Self {
        Self {
            config,
            buckets: std::array::from_fn(|_| Vec::new()),
            stats: StagingPoolStats::default(),
        }
    }

    /// Index of the smallest standard size ≥ `min_size`, if any.
    fn bucket_for(min_size: u64) -> Option<usize> {
        STANDARD_SIZES.iter().position(|&s| s >= min_size)
    }

    /// Index of the bucket holding exactly `size`, if `size` is standard.
    fn bucket_for_exact(size: u64) -> Option<usize> {
        STANDARD_SIZES.iter().position(|&s| s == size)
    }

    /// Creates `preallocate_per_bucket` available buffers in every bucket.
    pub fn prewarm<D: Driver>(&mut self, ctx: &mut DeviceContext<'_, D>) -> Result<()> {
        let count = self
            .config
            .preallocate_per_bucket
            .min(self.config.max_per_bucket);
        for (index, &size) in STANDARD_SIZES.iter().enumerate() {
            while self.buckets[index].len() < count {
                let buffer = ctx.create_buffer(size, STAGING_USAGE, Some("staging-pool"))?;
                let now = Instant::now();
                self.buckets[index].push(PoolEntry {
                    buffer,
                    in_use: false,
                    created_at: now,
                    last_used: now,
                    use_count: 0,
                });
            }
        }
        Ok(())
    }

    /// Leases a staging buffer of at least `min_size` bytes.
    ///
    /// Pooled buffers have exactly the bucket's standard size. Oversized
    /// requests and full buckets produce an unpooled buffer, which `release`
    /// destroys instead of re-shelving.
    pub fn acquire<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        min_size: u64,
    ) -> Result<BufferId> {
        self.stats.total_acquired += 1;

        let Some(index) = Self::bucket_for(min_size) else {
            // Above the ladder: always unpooled.
            self.stats.misses_unpooled += 1;
            return ctx.create_buffer(min_size, STAGING_USAGE, Some("staging-unpooled"));
        };
        let size = STANDARD_SIZES[index];

        if let Some(entry) = self.buckets[index].iter_mut().find(|e| !e.in_use) {
            entry.in_use = true;
            entry.use_count += 1;
            entry.last_used = Instant::now();
            self.stats.hits += 1;
            return Ok(entry.buffer);
        }

        if self.buckets[index].len() < self.config.max_per_bucket {
            let buffer = ctx.create_buffer(size, STAGING_USAGE, Some("staging-pool"))?;
            let now = Instant::now();
            self.buckets[index].push(PoolEntry {
                buffer,
                in_use: true,
                created_at: now,
                last_used: now,
                use_count: 1,
            });
            self.stats.misses_pooled += 1;
            return Ok(buffer);
        }

        // Bucket at capacity.
        self.stats.misses_unpooled += 1;
        ctx.create_buffer(min_size, STAGING_USAGE, Some("staging-unpooled"))
    }

    /// Returns a buffer to the pool, or destroys it if it is not pooled.
    ///
    /// Foreign and oversized buffers are destroyed immediately rather than
    /// inserted, so bucket bookkeeping can never be corrupted by a buffer the
    /// pool did not create.
    pub fn release<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        buffer: BufferId,
    ) -> Result<()> {
        let size = ctx.buffer_info(buffer).map(|info| info.size);
        if let Some(size) = size
            && let Some(index) = Self::bucket_for_exact(size)
            && let Some(entry) = self.buckets[index].iter_mut().find(|e| e.buffer == buffer)
        {
            // A second release of an already-available entry is a no-op:
            // neither its recency nor the counters move.
            if entry.in_use {
                entry.in_use = false;
                entry.last_used = Instant::now();
                self.stats.total_released += 1;
            }
            return Ok(());
        }
        self.stats.total_released += 1;
        ctx.destroy_buffer(buffer)
    }

    /// Destroys the oldest available entries so that each bucket keeps at
    /// most `target_per_size` available buffers.
    ///
    /// In-use entries are never touched; within a bucket the most recently
    /// used buffers survive.
    pub fn trim<D: Driver>(
        &mut self,
        ctx: &mut DeviceContext<'_, D>,
        target_per_size: usize,
    ) -> Result<()> {
        for (index, bucket) in self.buckets.iter_mut().enumerate() {
            let mut available: Vec<usize> = bucket
                .iter()
                .enumerate()
                .filter(|(_, e)| !e.in_use)
                .map(|(i, _)| i)
                .collect();
            if available.len() <= target_per_size {
                continue;
            }
            available.sort_by_key(|&i| bucket[i].last_used);

            let excess = available.len() - target_per_size;
            let mut doomed: Vec<usize> = available[..excess].to_vec();
            log::debug!(
                "trimming {excess} idle staging buffer(s) from the {} B bucket",
                STANDARD_SIZES[index]
            );
            // Remove from the back so earlier indices stay valid.
            doomed.sort_unstable_by(|a, b| b.cmp(a));
            for i in doomed {
                let entry = bucket.remove(i);
                ctx.destroy_buffer(entry.buffer)?;
            }
        }
        Ok(())
    }

    /// Destroys all available entries and forgets in-use ones.
    ///
    /// Buffers still leased out are dropped from the buckets; their eventual
    /// `release` destroys them like any foreign buffer.
    pub fn clear<D: Driver>(&mut self, ctx: &mut DeviceContext<'_, D>) -> Result<()> {
        for bucket in &mut self.buckets {
            for entry in bucket.drain(..) {
                if !entry.in_use {
                    ctx.destroy_buffer(entry.buffer)?;
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> StagingPoolStats {
        self.stats
    }

    /// Occupancy of every non-empty bucket.
    #[must_use]
    pub fn occupancy(&self) -> Vec<BucketOccupancy> {
        self.buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| !b.is_empty())
            .map(|(index, bucket)| BucketOccupancy {
                size: STANDARD_SIZES[index],
                total: bucket.len(),
                in_use: bucket.iter().filter(|e| e.in_use).count(),
            })
            .collect()
    }

    /// Oldest creation timestamp across all pooled entries, for diagnostics.
    #[must_use]
    pub fn oldest_entry_age(&self) -> Option<std::time::Duration> {
        self.buckets
            .iter()
            .flatten()
            .map(|e| e.created_at.elapsed())
            .max()
    }
}
