//! Memory Allocator
//!
//! Sub-allocates within one fixed-size backing buffer using a first-fit,
//! ordered block list. The backing buffer itself is never exposed — callers
//! receive [`Allocation`] handles naming a sub-range, which keeps unrelated
//! allocations from aliasing each other.
//!
//! # Block List
//!
//! ```text
//! ┌──────────┬──────┬───────────────┬──────────────────────────┐
//! │ used 256 │ free │   used 1024   │          free            │
//! └──────────┴──────┴───────────────┴──────────────────────────┘
//! ```
//!
//! Blocks are kept sorted by offset, their sizes always sum to the backing
//! capacity, and adjacent free blocks are coalesced after every free. Because
//! the free scan is a deterministic front-to-back first fit, freeing and
//! immediately re-allocating the same size returns the same offset whenever
//! no intervening allocation consumed that block.

use crate::driver::BufferId;

/// Minimum leftover worth splitting into its own free block. Remainders
/// smaller than this stay attached to the allocation (internal slack).
const MIN_SPLIT_REMAINDER: u64 = 16;

/// A sub-range of the backing buffer, leased from [`MemoryAllocator::allocate`].
///
/// Valid only between `allocate` and the matching `free`;
/// [`MemoryAllocator::clear`] invalidates all outstanding handles at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Allocation {
    /// Unique per allocator instance, never reused.
    pub id: u64,
    pub offset: u64,
    pub size: u64,
    /// Epoch the allocation belongs to; stale after `clear()`.
    epoch: u32,
}

impl Allocation {
    #[must_use]
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

#[derive(Debug, Clone, Copy)]
struct Block {
    offset: u64,
    size: u64,
    free: bool,
    /// Id of the allocation occupying this block; meaningful when `!free`.
    allocation_id: u64,
}

/// Usage report for an allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemoryUsage {
    pub capacity: u64,
    pub used_bytes: u64,
    pub free_bytes: u64,
    pub block_count: usize,
    pub free_block_count: usize,
    pub largest_free_block: u64,
}

/// First-fit sub-allocator over one fixed-size backing buffer.
pub struct MemoryAllocator {
    backing: BufferId,
    capacity: u64,
    blocks: Vec<Block>,
    next_id: u64,
    epoch: u32,
}

impl MemoryAllocator {
    /// Wraps an already-created backing buffer of `capacity` bytes.
    #[must_use]
    pub fn new(backing: BufferId, capacity: u64) -> Self {
        Self {
            backing,
            capacity,
            blocks: vec![Block {
                offset: 0,
                size: capacity,
                free: true,
                allocation_id: 0,
            }],
            next_id: 1,
            epoch: 0,
        }
    }

    /// The backing buffer handle (for binding the sub-ranges).
    #[must_use]
    pub fn backing(&self) -> BufferId {
        self.backing
    }

    #[must_use]
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Allocates `size` bytes from the first free block that fits.
    ///
    /// Returns `None` when no free block is large enough; the caller decides
    /// whether that means falling back to a dedicated buffer.
    pub fn allocate(&mut self, size: u64) -> Option<Allocation> {
        if size == 0 || size > self.capacity {
            return None;
        }
        let index = self
            .blocks
            .iter()
            .position(|b| b.free && b.size >= size)?;

        let id = self.next_id;
        self.next_id += 1;

        let block = &mut self.blocks[index];
        let offset = block.offset;
        let remainder = block.size - size;

        if remainder >= MIN_SPLIT_REMAINDER {
            block.size = size;
            block.free = false;
            block.allocation_id = id;
            self.blocks.insert(
                index + 1,
                Block {
                    offset: offset + size,
                    size: remainder,
                    free: true,
                    allocation_id: 0,
                },
            );
        } else {
            // Tiny remainder: hand the whole block out as internal slack.
            block.free = false;
            block.allocation_id = id;
        }

        let granted = self.blocks[index].size;
        log::trace!("sub-alloc #{id}: {granted} B at offset {offset}");
        Some(Allocation {
            id,
            offset,
            size: granted,
            epoch: self.epoch,
        })
    }

    /// Returns an allocation's block to the free list and coalesces with any
    /// immediately adjacent free blocks.
    ///
    /// Freeing a stale handle (already freed, or invalidated by `clear`) is a
    /// no-op that returns `false`.
    pub fn free(&mut self, allocation: Allocation) -> bool {
        if allocation.epoch != self.epoch {
            return false;
        }
        let Some(index) = self
            .blocks
            .iter()
            .position(|b| !b.free && b.allocation_id == allocation.id)
        else {
            return false;
        };

        self.blocks[index].free = true;
        self.blocks[index].allocation_id = 0;
        self.coalesce_around(index);
        true
    }

    /// Merges the block at `index` with free neighbours on either side.
    fn coalesce_around(&mut self, index: usize) {
        let mut index = index;
        if index > 0 && self.blocks[index - 1].free {
            let size = self.blocks[index].size;
            self.blocks[index - 1].size += size;
            self.blocks.remove(index);
            index -= 1;
        }
        if index + 1 < self.blocks.len() && self.blocks[index + 1].free {
            let size = self.blocks[index + 1].size;
            self.blocks[index].size += size;
            self.blocks.remove(index + 1);
        }
    }

    /// Resets to a single full free block and invalidates all outstanding
    /// allocation handles.
    pub fn clear(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
        self.blocks.clear();
        self.blocks.push(Block {
            offset: 0,
            size: self.capacity,
            free: true,
            allocation_id: 0,
        });
    }

    /// Current usage report.
    #[must_use]
    pub fn usage(&self) -> MemoryUsage {
        let mut used = 0;
        let mut free = 0;
        let mut free_blocks = 0;
        let mut largest_free = 0;
        for b in &self.blocks {
            if b.free {
                free += b.size;
                free_blocks += 1;
                largest_free = largest_free.max(b.size);
            } else {
                used += b.size;
            }
        }
        MemoryUsage {
            capacity: self.capacity,
            used_bytes: used,
            free_bytes: free,
            block_count: self.blocks.len(),
            free_block_count: free_blocks,
            largest_free_block: largest_free,
        }
    }

    /// Fragmentation ratio in `0.0..=1.0`.
    ///
    /// `1 − largest_free_block ⁄ total_free`: 0 when free space is one
    /// contiguous block (or there is none), approaching 1 as free space
    /// shatters into many small blocks.
    #[must_use]
    pub fn fragmentation(&self) -> f64 {
        let usage = self.usage();
        if usage.free_bytes == 0 || usage.free_block_count <= 1 {
            return 0.0;
        }
        1.0 - (usage.largest_free_block as f64 / usage.free_bytes as f64)
    }

    #[cfg(test)]
    fn check_block_invariant(&self) {
        let mut cursor = 0;
        for b in &self.blocks {
            assert_eq!(b.offset, cursor, "blocks must be contiguous");
            cursor += b.size;
        }
        assert_eq!(cursor, self.capacity, "block sizes must sum to capacity");
    }
}

// ============================================================================
// Tests
// ============================================================================
