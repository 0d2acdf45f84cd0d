//! Staging Ring
//!
//! A ring of N frame slots, each backed by its own upload buffer and a bump
//! cursor. Within the active slot, [`StagingRing::allocate`] rounds the
//! cursor up to the requested alignment and advances it, so allocations in
//! one slot never overlap. [`StagingRing::advance_frame`] moves to the next
//! slot modulo N and resets that slot's cursor.
//!
//! The ring does **not** track whether GPU work referencing a reclaimed slot
//! is still in flight. Callers must wait for submissions that reference a
//! slot before cycling back onto it — with N slots, waiting on work from
//! N−1 frames ago is sufficient. This producer/consumer discipline is a
//! caller contract, not an internal invariant.

use crate::device::DeviceContext;
use crate::driver::{BufferId, BufferUsages, Driver};
use crate::errors::Result;

/// A sub-range of one frame slot's buffer, valid until the owning slot's
/// next advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingSlice {
    pub buffer: BufferId,
    pub frame: usize,
    pub offset: u64,
    pub size: u64,
}

struct FrameSlot {
    buffer: BufferId,
    cursor: u64,
}

/// Per-frame bump allocator for transient upload memory.
pub struct StagingRing {
    slots: Vec<FrameSlot>,
    slot_capacity: u64,
    current: usize,
}

impl StagingRing {
    /// Creates `frame_count` slots of `slot_capacity` bytes each.
    ///
    /// Slot buffers carry `MAP_WRITE | COPY_SRC` usage, the staging shape
    /// uploads flow through.
    pub fn new<D: Driver>(
        ctx: &mut DeviceContext<'_, D>,
        frame_count: usize,
        slot_capacity: u64,
    ) -> Result<Self> {
        debug_assert!(frame_count > 0, "ring needs at least one frame slot");
        let mut slots = Vec::with_capacity(frame_count);
        for i in 0..frame_count {
            let buffer = ctx.create_buffer(
                slot_capacity,
                BufferUsages::MAP_WRITE | BufferUsages::COPY_SRC,
                Some(&format!("staging-ring[{i}]")),
            )?;
            slots.push(FrameSlot { buffer, cursor: 0 });
        }
        Ok(Self {
            slots,
            slot_capacity,
            current: 0,
        })
    }

    /// Bump-allocates `size` bytes at the given alignment in the active slot.
    ///
    /// Returns `None` when the aligned range would exceed the slot capacity;
    /// `alignment` must be a power of two.
    pub fn allocate(&mut self, size: u64, alignment: u64) -> Option<RingSlice> {
        debug_assert!(alignment.is_power_of_two());
        let slot = &mut self.slots[self.current];
        let offset = slot.cursor.checked_next_multiple_of(alignment)?;
        if offset.checked_add(size)? > self.slot_capacity {
            return None;
        }
        slot.cursor = offset + size;
        Some(RingSlice {
            buffer: slot.buffer,
            frame: self.current,
            offset,
            size,
        })
    }

    /// Moves to the next slot modulo the frame count and resets its cursor.
    ///
    /// Outstanding [`RingSlice`]s into the reclaimed slot become invalid.
    pub fn advance_frame(&mut self) {
        self.current = (self.current + 1) % self.slots.len();
        self.slots[self.current].cursor = 0;
    }

    #[must_use]
    pub fn current_frame(&self) -> usize {
        self.current
    }

    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.slots.len()
    }

    #[must_use]
    pub fn slot_capacity(&self) -> u64 {
        self.slot_capacity
    }

    /// Bytes bump-allocated in the active slot so far.
    #[must_use]
    pub fn current_cursor(&self) -> u64 {
        self.slots[self.current].cursor
    }

    /// The active slot's backing buffer.
    #[must_use]
    pub fn current_buffer(&self) -> BufferId {
        self.slots[self.current].buffer
    }

    /// Destroys all slot buffers. The ring must not be used afterwards.
    pub fn destroy<D: Driver>(self, ctx: &mut DeviceContext<'_, D>) -> Result<()> {
        for slot in self.slots {
            ctx.destroy_buffer(slot.buffer)?;
        }
        Ok(())
    }
}
