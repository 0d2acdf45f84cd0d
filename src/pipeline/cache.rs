//! LRU Pipeline Cache
//!
//! Generic descriptor-keyed cache shared by the render and compute pipeline
//! paths. Keys are the 64-bit descriptor hashes from
//! [`super::descriptor`]; values are opaque driver handles.
//!
//! Recency is tracked with a monotonic tick bumped on every touch, so LRU
//! eviction is deterministic even when two touches land on the same clock
//! instant. Eviction and clear never destroy the underlying compiled handle
//! — evicted handles are parked on a list the owner drains and disposes of.

use std::time::{Duration, Instant};

use rustc_hash::FxHashMap;

/// Aggregate statistics for one pipeline cache.
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineCacheStats {
    /// Entries currently cached.
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    /// Total time spent compiling on misses.
    pub compile_time_total: Duration,
}

impl PipelineCacheStats {
    #[must_use]
    pub fn total_lookups(&self) -> u64 {
        self.hits + self.misses
    }

    /// Hits over lookups, 0 before the first lookup.
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        if self.total_lookups() == 0 {
            return 0.0;
        }
        self.hits as f64 / self.total_lookups() as f64
    }

    /// Mean compile duration across all misses.
    #[must_use]
    pub fn average_compile_time(&self) -> Duration {
        if self.misses == 0 {
            return Duration::ZERO;
        }
        self.compile_time_total / u32::try_from(self.misses).unwrap_or(u32::MAX)
    }
}

/// One cached pipeline and its bookkeeping.
struct CacheEntry<Id> {
    handle: Id,
    label: Option<String>,
    created_at: Instant,
    compile_time: Duration,
    last_used_tick: u64,
    use_count: u64,
}

/// Descriptor-hash-keyed LRU cache of compiled pipeline handles.
pub(crate) struct LruCache<Id: Copy> {
    entries: FxHashMap<u64, CacheEntry<Id>>,
    capacity: usize,
    tick: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
    compile_time_total: Duration,
    /// Handles dropped by eviction/clear, awaiting caller disposal.
    orphaned: Vec<Id>,
}

impl<Id: Copy> LruCache<Id> {
    pub(crate) fn new(capacity: usize) -> Self {
        debug_assert!(capacity > 0, "cache capacity must be non-zero");
        Self {
            entries: FxHashMap::default(),
            capacity,
            tick: 0,
            hits: 0,
            misses: 0,
            evictions: 0,
            compile_time_total: Duration::ZERO,
            orphaned: Vec::new(),
        }
    }

    /// Looks up a key, bumping recency and use count on a hit. Records the
    /// hit/miss either way.
    pub(crate) fn lookup(&mut self, key: u64) -> Option<Id> {
        self.tick += 1;
        if let Some(entry) = self.entries.get_mut(&key) {
            entry.last_used_tick = self.tick;
            entry.use_count += 1;
            self.hits += 1;
            Some(entry.handle)
        } else {
            self.misses += 1;
            None
        }
    }

    /// Inserts a freshly compiled pipeline, evicting the single
    /// least-recently-used entry if the cache would exceed capacity.
    pub(crate) fn insert(
        &mut self,
        key: u64,
        handle: Id,
        label: Option<String>,
        compile_time: Duration,
    ) {
        self.tick += 1;
        self.compile_time_total += compile_time;
        self.entries.insert(
            key,
            CacheEntry {
                handle,
                label,
                created_at: Instant::now(),
                compile_time,
                last_used_tick: self.tick,
                use_count: 0,
            },
        );

        if self.entries.len() > self.capacity {
            let victim = self
                .entries
                .iter()
                .min_by_key(|(_, e)| e.last_used_tick)
                .map(|(&k, _)| k);
            if let Some(victim) = victim {
                if let Some(entry) = self.entries.remove(&victim) {
                    log::debug!(
                        "evicting LRU pipeline {:?} (used {} time(s))",
                        entry.label,
                        entry.use_count
                    );
                    self.orphaned.push(entry.handle);
                }
                self.evictions += 1;
            }
        }
    }

    /// Drops every entry. Handles move to the orphan list.
    pub(crate) fn clear(&mut self) {
        for (_, entry) in self.entries.drain() {
            self.orphaned.push(entry.handle);
        }
    }

    /// Takes ownership of handles dropped by eviction or clear; the caller
    /// is responsible for destroying them once the GPU is done.
    pub(crate) fn drain_orphaned(&mut self) -> Vec<Id> {
        std::mem::take(&mut self.orphaned)
    }

    pub(crate) fn stats(&self) -> PipelineCacheStats {
        PipelineCacheStats {
            entries: self.entries.len(),
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            compile_time_total: self.compile_time_total,
        }
    }

    /// The `n` most-used entries, hottest first: `(label, use_count, age)`.
    pub(crate) fn hottest(&self, n: usize) -> Vec<(Option<String>, u64, Duration)> {
        let mut entries: Vec<_> = self
            .entries
            .values()
            .map(|e| (e.label.clone(), e.use_count, e.created_at.elapsed()))
            .collect();
        entries.sort_by(|a, b| b.1.cmp(&a.1));
        entries.truncate(n);
        entries
    }

    /// Compile duration recorded for a cached key, if still present.
    pub(crate) fn compile_time_of(&self, key: u64) -> Option<Duration> {
        self.entries.get(&key).map(|e| e.compile_time)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}
