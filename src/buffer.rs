//! Buffer Metadata
//!
//! The driver owns the actual backend buffers; this module tracks the
//! metadata the core needs for validation — size, usage flags and the linear
//! mapping state machine. Metadata lives in a [`BufferTable`], a secondary
//! map keyed by the driver's [`BufferId`]s.
//!
//! Mapping transitions are linear: `Unmapped ↔ MappedRead/MappedWrite`,
//! any state → `Destroyed`, and `Destroyed` is terminal.

use slotmap::SecondaryMap;

use crate::driver::{BufferId, BufferUsages, MapMode};
use crate::errors::{GpuError, Result};

/// Mapping state of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MapState {
    #[default]
    Unmapped,
    MappedRead,
    MappedWrite,
    /// Terminal. Any further use of the buffer is invalid.
    Destroyed,
}

impl MapState {
    pub(crate) fn from_mode(mode: MapMode) -> Self {
        match mode {
            MapMode::Read => Self::MappedRead,
            MapMode::Write => Self::MappedWrite,
        }
    }
}

/// Metadata for one driver buffer.
#[derive(Debug, Clone)]
pub struct BufferInfo {
    pub size: u64,
    pub usage: BufferUsages,
    pub map_state: MapState,
    pub label: Option<String>,
}

impl BufferInfo {
    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.map_state == MapState::Destroyed
    }
}

/// Metadata arena for all buffers created through one device.
///
/// Destroyed buffers stay in the table with `MapState::Destroyed` so that a
/// stale handle produces a state error rather than silently resolving to a
/// recycled slot.
#[derive(Default)]
pub struct BufferTable {
    entries: SecondaryMap<BufferId, BufferInfo>,
}

impl BufferTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, id: BufferId, info: BufferInfo) {
        self.entries.insert(id, info);
    }

    #[must_use]
    pub fn get(&self, id: BufferId) -> Option<&BufferInfo> {
        self.entries.get(id)
    }

    /// Resolves a handle to live (non-destroyed) metadata.
    pub fn expect_live(&self, id: BufferId) -> Result<&BufferInfo> {
        match self.entries.get(id) {
            None => Err(GpuError::buffer_state(format!("unknown buffer {id:?}"))),
            Some(info) if info.is_destroyed() => Err(GpuError::buffer_state(format!(
                "buffer {id:?} has been destroyed"
            ))),
            Some(info) => Ok(info),
        }
    }

    pub(crate) fn expect_live_mut(&mut self, id: BufferId) -> Result<&mut BufferInfo> {
        match self.entries.get_mut(id) {
            None => Err(GpuError::buffer_state(format!("unknown buffer {id:?}"))),
            Some(info) if info.is_destroyed() => Err(GpuError::buffer_state(format!(
                "buffer {id:?} has been destroyed"
            ))),
            Some(info) => Ok(info),
        }
    }

    /// Number of live (non-destroyed) buffers.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.entries.values().filter(|b| !b.is_destroyed()).count()
    }

    pub(crate) fn live_ids(&self) -> Vec<BufferId> {
        self.entries
            .iter()
            .filter(|(_, info)| !info.is_destroyed())
            .map(|(id, _)| id)
            .collect()
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }
}
