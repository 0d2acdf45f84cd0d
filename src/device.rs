//! Device Lifecycle Manager
//!
//! Owns the device state machine, feature/limit negotiation, loss/recovery
//! handling and cumulative statistics, and supplies the driver handle every
//! other component operates through.
//!
//! # State Machine
//!
//! ```text
//! UNINITIALIZED ──initialize()──▶ REQUESTING ──▶ READY ──▶ LOST
//!       ▲                            │             │         │
//!       └────────── failure ─────────┘             ▼         ▼
//!       ◀────────── recovery ──────────────── DESTROYED (terminal)
//! ```
//!
//! Legal transitions: UNINITIALIZED→REQUESTING, REQUESTING→READY,
//! REQUESTING→UNINITIALIZED (failure), READY→LOST, READY→DESTROYED,
//! LOST→UNINITIALIZED (recovery), LOST→DESTROYED. Anything else is rejected
//! with a state error and the state is left unchanged.
//!
//! # Recovery
//!
//! Device-loss notifications arrive on a `flume` channel installed at
//! initialization. [`DeviceManager::process_loss_notifications`] drains the
//! channel, collapsing any queued notices into at most one recovery episode:
//! in the single-threaded cooperative model there is never more than one
//! attempt in flight, and notifications raised while an attempt runs are
//! folded into it on the next drain. Attempts are capped by
//! [`GpuSettings::max_recovery_attempts`]; past the cap the device stays
//! [`DeviceState::Lost`] and the failure is reported through the error
//! callbacks and the log, never as a returned error.

use std::time::{Duration, Instant};

use uuid::Uuid;

use crate::buffer::{BufferInfo, BufferTable, MapState};
use crate::driver::{
    AdapterRequestOptions, BufferId, BufferUsages, DeviceRequest, Driver, Features, Limits,
    LossNotice, MapMode,
};
use crate::errors::{GpuError, Result, ValidationError, ValidationKind};
use crate::settings::GpuSettings;

/// Lifecycle state of the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceState {
    #[default]
    Uninitialized,
    Requesting,
    Ready,
    Lost,
    /// Terminal.
    Destroyed,
}

/// Versioned snapshot of the negotiated feature and limit set.
///
/// The version increments every time a device is (re)created, so cached
/// device-derived state can detect that it belongs to a previous incarnation.
#[derive(Debug, Clone, Copy)]
pub struct FeatureSnapshot {
    pub version: u32,
    pub features: Features,
    pub limits: Limits,
}

/// Cumulative device statistics.
///
/// Counters are updated by collaborating components through the explicit
/// `track_*` calls, never inferred.
#[derive(Debug, Default, Clone)]
pub struct DeviceStats {
    pub buffers_created: u64,
    pub buffers_destroyed: u64,
    pub pipelines_created: u64,
    pub command_submissions: u64,
    pub memory_used: u64,
    pub memory_peak: u64,
    ready_at: Option<Instant>,
}

impl DeviceStats {
    pub fn track_buffer_created(&mut self, size: u64) {
        self.buffers_created += 1;
        self.memory_used += size;
        self.memory_peak = self.memory_peak.max(self.memory_used);
    }

    pub fn track_buffer_destroyed(&mut self, size: u64) {
        self.buffers_destroyed += 1;
        self.memory_used = self.memory_used.saturating_sub(size);
    }

    pub fn track_pipeline_created(&mut self) {
        self.pipelines_created += 1;
    }

    pub fn track_submission(&mut self) {
        self.command_submissions += 1;
    }

    /// Time since the device last became ready; zero when not ready.
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.ready_at.map_or(Duration::ZERO, |t| t.elapsed())
    }
}

type LossCallback = Box<dyn FnMut(&LossNotice)>;
type ErrorCallback = Box<dyn FnMut(&GpuError)>;

/// Owner of the device state machine and the driver handle.
pub struct DeviceManager<D: Driver> {
    id: Uuid,
    driver: D,
    settings: GpuSettings,
    state: DeviceState,
    snapshot: Option<FeatureSnapshot>,
    snapshot_version: u32,
    losses: Option<flume::Receiver<LossNotice>>,
    last_loss: Option<LossNotice>,
    recovery_attempts: u32,
    buffers: BufferTable,
    stats: DeviceStats,
    loss_callbacks: Vec<LossCallback>,
    error_callbacks: Vec<ErrorCallback>,
}

impl<D: Driver> DeviceManager<D> {
    #[must_use]
    pub fn new(driver: D, settings: GpuSettings) -> Self {
        Self {
            id: Uuid::new_v4(),
            driver,
            settings,
            state: DeviceState::Uninitialized,
            snapshot: None,
            snapshot_version: 0,
            losses: None,
            last_loss: None,
            recovery_attempts: 0,
            buffers: BufferTable::new(),
            stats: DeviceStats::default(),
            loss_callbacks: Vec::new(),
            error_callbacks: Vec::new(),
        }
    }

    /// Stable identity; survives loss and recovery.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> DeviceState {
        self.state
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state == DeviceState::Ready
    }

    #[must_use]
    pub fn is_lost(&self) -> bool {
        self.state == DeviceState::Lost
    }

    #[must_use]
    pub fn stats(&self) -> &DeviceStats {
        &self.stats
    }

    #[must_use]
    pub fn settings(&self) -> &GpuSettings {
        &self.settings
    }

    /// The loss notice that moved the device out of READY, if any.
    #[must_use]
    pub fn last_loss(&self) -> Option<&LossNotice> {
        self.last_loss.as_ref()
    }

    /// Negotiated features. Fails unless the device is ready.
    pub fn features(&self) -> Result<Features> {
        self.snapshot_checked("features").map(|s| s.features)
    }

    /// Negotiated limits. Fails unless the device is ready.
    pub fn limits(&self) -> Result<Limits> {
        self.snapshot_checked("limits").map(|s| s.limits)
    }

    /// The full versioned snapshot. Fails unless the device is ready.
    pub fn snapshot(&self) -> Result<FeatureSnapshot> {
        self.snapshot_checked("snapshot").copied()
    }

    fn snapshot_checked(&self, operation: &'static str) -> Result<&FeatureSnapshot> {
        if self.state != DeviceState::Ready {
            return Err(GpuError::InvalidState {
                operation,
                state: self.state,
            });
        }
        self.snapshot.as_ref().ok_or(GpuError::InvalidState {
            operation,
            state: self.state,
        })
    }

    /// Subscribes to device-loss notifications.
    pub fn on_device_lost(&mut self, callback: impl FnMut(&LossNotice) + 'static) {
        self.loss_callbacks.push(Box::new(callback));
    }

    /// Subscribes to asynchronous errors (recovery failures and the like).
    pub fn on_error(&mut self, callback: impl FnMut(&GpuError) + 'static) {
        self.error_callbacks.push(Box::new(callback));
    }

    // ── Initialization ─────────────────────────────────────────────────────

    /// Requests an adapter and device, negotiates features/limits and moves
    /// the device to READY.
    ///
    /// Valid only from UNINITIALIZED. On any failure the state reverts to
    /// UNINITIALIZED and a typed initialization error is returned, so the
    /// caller may retry.
    pub async fn initialize(&mut self) -> Result<()> {
        if self.state != DeviceState::Uninitialized {
            return Err(GpuError::InvalidState {
                operation: "initialize",
                state: self.state,
            });
        }
        self.state = DeviceState::Requesting;

        match self.request_and_negotiate().await {
            Ok(()) => {
                self.state = DeviceState::Ready;
                self.stats.ready_at = Some(Instant::now());
                log::info!(
                    "device {} ready (snapshot v{})",
                    self.id,
                    self.snapshot_version
                );
                Ok(())
            }
            Err(e) => {
                self.state = DeviceState::Uninitialized;
                Err(e)
            }
        }
    }

    async fn request_and_negotiate(&mut self) -> Result<()> {
        let adapter = self
            .driver
            .request_adapter(&AdapterRequestOptions {
                power_preference: self.settings.power_preference,
                force_fallback: false,
            })
            .await?
            .ok_or_else(|| {
                GpuError::AdapterRequestFailed("no compatible adapter available".to_string())
            })?;
        log::debug!("adapter selected: {} ({})", adapter.name, adapter.backend);

        let missing = self.settings.required_features - adapter.features;
        if !missing.is_empty() {
            return Err(GpuError::MissingFeature {
                feature: format!("{missing:?}"),
            });
        }
        let features =
            self.settings.required_features | (self.settings.optional_features & adapter.features);

        if let Some((limit, required, available)) = adapter
            .limits
            .check_required(&self.settings.required_limits)
        {
            return Err(GpuError::LimitUnsatisfied {
                limit,
                required,
                available,
            });
        }

        let reply = self
            .driver
            .request_device(&DeviceRequest {
                label: self.settings.label.clone(),
                required_features: features,
                required_limits: self.settings.required_limits,
            })
            .await?;

        self.snapshot_version += 1;
        self.snapshot = Some(FeatureSnapshot {
            version: self.snapshot_version,
            features: reply.features,
            limits: reply.limits,
        });
        self.losses = Some(reply.losses);
        Ok(())
    }

    // ── Loss & recovery ────────────────────────────────────────────────────

    /// Drains pending device-loss notifications and, for a transient loss
    /// with recovery enabled, runs the recovery episode to completion.
    ///
    /// All queued notices collapse into a single episode; a terminal reason
    /// anywhere in the batch disables recovery for it.
    pub async fn process_loss_notifications(&mut self) -> Result<()> {
        let mut drained: Vec<LossNotice> = Vec::new();
        if let Some(rx) = &self.losses {
            while let Ok(notice) = rx.try_recv() {
                drained.push(notice);
            }
        }
        let Some(latest) = drained.last().cloned() else {
            return Ok(());
        };
        let terminal = drained.iter().any(|n| !n.reason.is_transient());

        if self.state == DeviceState::Ready {
            self.state = DeviceState::Lost;
        }
        log::warn!("device lost ({:?}): {}", latest.reason, latest.message);
        self.last_loss = Some(latest.clone());
        for cb in &mut self.loss_callbacks {
            cb(&latest);
        }

        if self.state == DeviceState::Lost && !terminal && self.settings.auto_recover {
            self.recover().await;
        }
        Ok(())
    }

    /// Runs recovery attempts until success or the configured cap.
    async fn recover(&mut self) {
        let cap = self.settings.max_recovery_attempts;
        while self.recovery_attempts < cap {
            self.recovery_attempts += 1;
            log::info!(
                "device {} recovery attempt {}/{}",
                self.id,
                self.recovery_attempts,
                cap
            );
            self.clear_device_state();
            self.state = DeviceState::Uninitialized;

            match self.initialize().await {
                Ok(()) => {
                    self.recovery_attempts = 0;
                    self.last_loss = None;
                    return;
                }
                Err(e) => {
                    log::warn!("recovery attempt failed: {e}");
                    for cb in &mut self.error_callbacks {
                        cb(&e);
                    }
                }
            }
        }
        // Cap exhausted: stay lost, report through callbacks/log only.
        self.state = DeviceState::Lost;
        let abandoned =
            GpuError::DeviceRequestFailed(format!("recovery abandoned after {cap} attempts"));
        log::error!("device {}: {abandoned}", self.id);
        for cb in &mut self.error_callbacks {
            cb(&abandoned);
        }
    }

    /// Drops all device-derived state (buffer metadata, snapshot, channel).
    fn clear_device_state(&mut self) {
        self.driver.release_device();
        self.buffers.clear();
        self.snapshot = None;
        self.losses = None;
        self.stats.memory_used = 0;
        self.stats.ready_at = None;
    }

    // ── Destruction ────────────────────────────────────────────────────────

    /// Destroys the device. Idempotent: a second call is a no-op.
    ///
    /// Valid from READY, LOST or DESTROYED; destroying a device that was
    /// never created is a state error.
    pub fn destroy(&mut self) -> Result<()> {
        match self.state {
            DeviceState::Destroyed => Ok(()),
            DeviceState::Ready | DeviceState::Lost => {
                for id in self.buffers.live_ids() {
                    self.driver.destroy_buffer(id);
                }
                self.clear_device_state();
                self.state = DeviceState::Destroyed;
                log::info!("device {} destroyed", self.id);
                Ok(())
            }
            DeviceState::Uninitialized | DeviceState::Requesting => Err(GpuError::InvalidState {
                operation: "destroy",
                state: self.state,
            }),
        }
    }

    // ── Access ─────────────────────────────────────────────────────────────

    /// Borrows the ready device as a [`DeviceContext`].
    ///
    /// Fails with a state error unless the device is READY; callers are
    /// expected to check [`Self::is_ready`] before issuing GPU work.
    pub fn device(&mut self) -> Result<DeviceContext<'_, D>> {
        if self.state != DeviceState::Ready {
            return Err(GpuError::InvalidState {
                operation: "device",
                state: self.state,
            });
        }
        Ok(DeviceContext {
            driver: &mut self.driver,
            buffers: &mut self.buffers,
            stats: &mut self.stats,
        })
    }

    /// Read-only view of buffer metadata (available in any state).
    #[must_use]
    pub fn buffers(&self) -> &BufferTable {
        &self.buffers
    }

    /// The underlying driver.
    #[must_use]
    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Mutable access to the underlying driver, for backend-specific knobs
    /// that sit outside the lifecycle (loss injection, tuning).
    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }
}

// ============================================================================
//  Device Context
// ============================================================================

/// A borrow of the ready device: the driver plus the bookkeeping the buffer
/// operations need. Pools, the allocator, the ring, the copy functions and
/// the pipeline manager all take a `&mut DeviceContext`.
pub struct DeviceContext<'a, D: Driver> {
    pub(crate) driver: &'a mut D,
    pub(crate) buffers: &'a mut BufferTable,
    pub(crate) stats: &'a mut DeviceStats,
}

impl<D: Driver> DeviceContext<'_, D> {
    /// Creates a buffer and registers its metadata.
    pub fn create_buffer(
        &mut self,
        size: u64,
        usage: BufferUsages,
        label: Option<&str>,
    ) -> Result<BufferId> {
        if size == 0 {
            return Err(
                ValidationError::new(ValidationKind::Size, "buffer size must be non-zero").into(),
            );
        }
        if usage.is_empty() {
            return Err(ValidationError::new(
                ValidationKind::Usage,
                "buffer usage must not be empty",
            )
            .into());
        }
        let id = self.driver.create_buffer(size, usage, label)?;
        self.buffers.insert(
            id,
            BufferInfo {
                size,
                usage,
                map_state: MapState::Unmapped,
                label: label.map(str::to_owned),
            },
        );
        self.stats.track_buffer_created(size);
        Ok(id)
    }

    /// Destroys a buffer. Destroying twice is a state error.
    pub fn destroy_buffer(&mut self, id: BufferId) -> Result<()> {
        let info = self.buffers.expect_live_mut(id)?;
        let size = info.size;
        info.map_state = MapState::Destroyed;
        self.driver.destroy_buffer(id);
        self.stats.track_buffer_destroyed(size);
        Ok(())
    }

    /// Writes `data` through the queue write path. The buffer must carry
    /// `COPY_DST`, be unmapped, and the range must be in bounds.
    pub fn write_buffer(&mut self, id: BufferId, offset: u64, data: &[u8]) -> Result<()> {
        let info = self.buffers.expect_live(id)?;
        if !info.usage.contains(BufferUsages::COPY_DST) {
            return Err(ValidationError::new(
                ValidationKind::Usage,
                format!("buffer {id:?} lacks COPY_DST usage"),
            )
            .into());
        }
        if info.map_state != MapState::Unmapped {
            return Err(GpuError::buffer_state(format!(
                "buffer {id:?} must be unmapped for queue writes"
            )));
        }
        if offset
            .checked_add(data.len() as u64)
            .is_none_or(|end| end > info.size)
        {
            return Err(ValidationError::new(
                ValidationKind::Bounds,
                format!(
                    "write of {} bytes at {offset} exceeds buffer size {}",
                    data.len(),
                    info.size
                ),
            )
            .into());
        }
        self.driver.write_buffer(id, offset, data)
    }

    /// Maps a buffer for CPU access. Suspends until the driver completes.
    pub async fn map_buffer(&mut self, id: BufferId, mode: MapMode) -> Result<()> {
        let info = self.buffers.expect_live(id)?;
        let required = match mode {
            MapMode::Read => BufferUsages::MAP_READ,
            MapMode::Write => BufferUsages::MAP_WRITE,
        };
        if !info.usage.contains(required) {
            return Err(ValidationError::new(
                ValidationKind::Usage,
                format!("buffer {id:?} lacks {required:?} usage"),
            )
            .into());
        }
        if info.map_state != MapState::Unmapped {
            return Err(GpuError::buffer_state(format!(
                "buffer {id:?} is already mapped"
            )));
        }
        self.driver.map_buffer(id, mode).await?;
        // Driver suspension cannot interleave another mutation of this entry:
        // the context holds the table exclusively.
        self.buffers.expect_live_mut(id)?.map_state = MapState::from_mode(mode);
        Ok(())
    }

    /// Copies bytes out of a mapped range.
    pub fn mapped_range(&mut self, id: BufferId, offset: u64, size: u64) -> Result<Vec<u8>> {
        let info = self.buffers.expect_live(id)?;
        if !matches!(info.map_state, MapState::MappedRead | MapState::MappedWrite) {
            return Err(GpuError::buffer_state(format!(
                "buffer {id:?} is not mapped"
            )));
        }
        if offset.checked_add(size).is_none_or(|end| end > info.size) {
            return Err(ValidationError::new(
                ValidationKind::Bounds,
                format!(
                    "mapped range at {offset} of {size} bytes exceeds buffer size {}",
                    info.size
                ),
            )
            .into());
        }
        self.driver.mapped_range(id, offset, size)
    }

    /// Unmaps a mapped buffer.
    pub fn unmap(&mut self, id: BufferId) -> Result<()> {
        let info = self.buffers.expect_live_mut(id)?;
        if !matches!(info.map_state, MapState::MappedRead | MapState::MappedWrite) {
            return Err(GpuError::buffer_state(format!(
                "buffer {id:?} is not mapped"
            )));
        }
        info.map_state = MapState::Unmapped;
        self.driver.unmap(id)
    }

    /// Metadata for a buffer, if known.
    #[must_use]
    pub fn buffer_info(&self, id: BufferId) -> Option<&BufferInfo> {
        self.buffers.get(id)
    }

    /// Suspends until all previously submitted work has completed.
    pub async fn wait_idle(&mut self) -> Result<()> {
        self.driver.on_submitted_work_done().await
    }

    /// Disposes of a compiled render pipeline handle. Used by callers
    /// draining evicted/cleared cache entries once the GPU is done with them.
    pub fn driver_destroy_render_pipeline(&mut self, id: crate::driver::RenderPipelineId) {
        self.driver.destroy_render_pipeline(id);
    }

    /// Disposes of a compiled compute pipeline handle.
    pub fn driver_destroy_compute_pipeline(&mut self, id: crate::driver::ComputePipelineId) {
        self.driver.destroy_compute_pipeline(id);
    }
}
