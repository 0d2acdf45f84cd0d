//! Device Lifecycle Tests
//!
//! Tests for:
//! - DeviceManager: state machine transitions, initialize/destroy, accessors
//! - Feature/limit negotiation against the adapter's capabilities
//! - Loss notifications, single-episode recovery, the attempt cap
//! - DeviceStats: explicit tracking calls, memory peak, uptime

use kiln_gpu::driver::mock::MockDriver;
use kiln_gpu::{
    BufferUsages, DeviceManager, DeviceState, Features, GpuError, GpuSettings, Limits, LossReason,
    MapMode,
};

fn manager() -> DeviceManager<MockDriver> {
    let _ = env_logger::builder().is_test(true).try_init();
    DeviceManager::new(MockDriver::new(), GpuSettings::default())
}

fn ready_manager() -> DeviceManager<MockDriver> {
    let mut m = manager();
    pollster::block_on(m.initialize()).expect("mock initialize");
    m
}

// ============================================================================
// State Machine
// ============================================================================

#[test]
fn new_manager_is_uninitialized() {
    let m = manager();
    assert_eq!(m.state(), DeviceState::Uninitialized);
    assert!(!m.is_ready());
    assert!(!m.is_lost());
}

#[test]
fn initialize_moves_to_ready() {
    let m = ready_manager();
    assert_eq!(m.state(), DeviceState::Ready);
    assert!(m.is_ready());
}

#[test]
fn initialize_on_ready_device_is_a_state_error() {
    let mut m = ready_manager();
    let err = pollster::block_on(m.initialize()).unwrap_err();
    assert!(matches!(
        err,
        GpuError::InvalidState {
            state: DeviceState::Ready,
            ..
        }
    ));
    // State unchanged by the rejected transition.
    assert_eq!(m.state(), DeviceState::Ready);
}

#[test]
fn failed_initialize_reverts_to_uninitialized_and_allows_retry() {
    let mut driver = MockDriver::new();
    driver.fail_next_adapter_requests(1);
    let mut m = DeviceManager::new(driver, GpuSettings::default());

    let err = pollster::block_on(m.initialize()).unwrap_err();
    assert!(matches!(err, GpuError::AdapterRequestFailed(_)));
    assert_eq!(m.state(), DeviceState::Uninitialized);

    // A subsequent initialize is accepted.
    pollster::block_on(m.initialize()).expect("retry succeeds");
    assert!(m.is_ready());
}

#[test]
fn accessors_fail_unless_ready() {
    let mut m = manager();
    assert!(matches!(m.features(), Err(GpuError::InvalidState { .. })));
    assert!(matches!(m.limits(), Err(GpuError::InvalidState { .. })));
    assert!(matches!(m.device(), Err(GpuError::InvalidState { .. })));
}

#[test]
fn destroy_is_idempotent() {
    let mut m = ready_manager();
    m.destroy().expect("first destroy");
    assert_eq!(m.state(), DeviceState::Destroyed);
    m.destroy().expect("second destroy is a no-op");
    assert_eq!(m.state(), DeviceState::Destroyed);
}

#[test]
fn destroy_before_initialize_is_a_state_error() {
    let mut m = manager();
    assert!(matches!(m.destroy(), Err(GpuError::InvalidState { .. })));
}

#[test]
fn destroyed_device_rejects_initialize() {
    let mut m = ready_manager();
    m.destroy().unwrap();
    let err = pollster::block_on(m.initialize()).unwrap_err();
    assert!(matches!(
        err,
        GpuError::InvalidState {
            state: DeviceState::Destroyed,
            ..
        }
    ));
}

// ============================================================================
// Negotiation
// ============================================================================

#[test]
fn missing_required_feature_fails_initialization() {
    let driver = MockDriver::new().with_adapter(Features::empty(), Limits::default());
    let settings = GpuSettings {
        required_features: Features::SHADER_F16,
        ..Default::default()
    };
    let mut m = DeviceManager::new(driver, settings);

    let err = pollster::block_on(m.initialize()).unwrap_err();
    assert!(matches!(err, GpuError::MissingFeature { .. }));
    assert_eq!(m.state(), DeviceState::Uninitialized);
}

#[test]
fn optional_features_are_enabled_only_if_available() {
    let driver = MockDriver::new().with_adapter(Features::TIMESTAMP_QUERY, Limits::default());
    let settings = GpuSettings {
        optional_features: Features::TIMESTAMP_QUERY | Features::SHADER_F16,
        ..Default::default()
    };
    let mut m = DeviceManager::new(driver, settings);
    pollster::block_on(m.initialize()).unwrap();

    let features = m.features().unwrap();
    assert!(features.contains(Features::TIMESTAMP_QUERY));
    assert!(!features.contains(Features::SHADER_F16));
}

#[test]
fn unsatisfiable_limit_fails_naming_the_limit() {
    let adapter_limits = Limits {
        max_buffer_size: 1 << 20,
        ..Default::default()
    };
    let driver = MockDriver::new().with_adapter(Features::all(), adapter_limits);
    let settings = GpuSettings {
        required_limits: Limits {
            max_buffer_size: 1 << 30,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut m = DeviceManager::new(driver, settings);

    let err = pollster::block_on(m.initialize()).unwrap_err();
    match err {
        GpuError::LimitUnsatisfied {
            limit,
            required,
            available,
        } => {
            assert_eq!(limit, "max_buffer_size");
            assert_eq!(required, 1 << 30);
            assert_eq!(available, 1 << 20);
        }
        other => panic!("expected LimitUnsatisfied, got {other}"),
    }
}

// ============================================================================
// Loss & Recovery
// ============================================================================

#[test]
fn transient_loss_recovers_to_ready() {
    let mut m = ready_manager();
    let id_before = m.id();

    m.driver_mut().lose_device(LossReason::Unknown, "simulated TDR");
    pollster::block_on(m.process_loss_notifications()).unwrap();

    assert!(m.is_ready(), "device should have recovered");
    // Identity survives recovery.
    assert_eq!(m.id(), id_before);
    // The snapshot was re-captured for the new incarnation.
    assert_eq!(m.snapshot().unwrap().version, 2);
}

#[test]
fn recovery_stops_silently_past_the_attempt_cap() {
    let settings = GpuSettings {
        max_recovery_attempts: 2,
        ..Default::default()
    };
    let mut m = DeviceManager::new(MockDriver::new(), settings);
    pollster::block_on(m.initialize()).unwrap();

    let errors = std::rc::Rc::new(std::cell::RefCell::new(Vec::new()));
    let sink = errors.clone();
    m.on_error(move |e| sink.borrow_mut().push(e.to_string()));

    m.driver_mut().fail_next_device_requests(10);
    m.driver_mut().lose_device(LossReason::Unknown, "simulated loss");
    // Does not return an error despite recovery failing.
    pollster::block_on(m.process_loss_notifications()).unwrap();

    assert!(m.is_lost(), "device stays lost past the cap");
    // Two failed attempts plus the abandonment report.
    assert_eq!(errors.borrow().len(), 3);
}

#[test]
fn terminal_loss_does_not_trigger_recovery() {
    let mut m = ready_manager();
    m.driver_mut().lose_device(LossReason::Destroyed, "backend torn down");
    pollster::block_on(m.process_loss_notifications()).unwrap();

    assert!(m.is_lost());
    assert_eq!(m.last_loss().unwrap().reason, LossReason::Destroyed);
}

#[test]
fn queued_notifications_collapse_into_one_recovery_episode() {
    let mut m = ready_manager();
    m.driver_mut().lose_device(LossReason::Unknown, "first");
    m.driver_mut().lose_device(LossReason::Unknown, "second");
    m.driver_mut().lose_device(LossReason::Unknown, "third");
    pollster::block_on(m.process_loss_notifications()).unwrap();

    assert!(m.is_ready());
    // One recovery, so exactly two devices were ever created.
    assert_eq!(m.driver().devices_created, 2);
}

#[test]
fn loss_callbacks_observe_the_notification() {
    let mut m = ready_manager();
    let seen = std::rc::Rc::new(std::cell::Cell::new(0));
    let sink = seen.clone();
    m.on_device_lost(move |_| sink.set(sink.get() + 1));

    m.driver_mut().lose_device(LossReason::Unknown, "loss");
    pollster::block_on(m.process_loss_notifications()).unwrap();
    assert_eq!(seen.get(), 1);
}

#[test]
fn recovery_disabled_by_settings_leaves_device_lost() {
    let settings = GpuSettings {
        auto_recover: false,
        ..Default::default()
    };
    let mut m = DeviceManager::new(MockDriver::new(), settings);
    pollster::block_on(m.initialize()).unwrap();

    m.driver_mut().lose_device(LossReason::Unknown, "loss");
    pollster::block_on(m.process_loss_notifications()).unwrap();
    assert!(m.is_lost());
}

// ============================================================================
// Statistics
// ============================================================================

#[test]
fn buffer_tracking_updates_memory_and_peak() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let a = ctx.create_buffer(1024, BufferUsages::COPY_DST, Some("a")).unwrap();
    let _b = ctx.create_buffer(512, BufferUsages::COPY_DST, Some("b")).unwrap();
    ctx.destroy_buffer(a).unwrap();

    let stats = m.stats();
    assert_eq!(stats.buffers_created, 2);
    assert_eq!(stats.buffers_destroyed, 1);
    assert_eq!(stats.memory_used, 512);
    assert_eq!(stats.memory_peak, 1536);
}

#[test]
fn uptime_is_zero_before_ready() {
    let m = manager();
    assert_eq!(m.stats().uptime(), std::time::Duration::ZERO);
}

#[test]
fn overflowing_write_and_map_offsets_are_rejected() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx
        .create_buffer(16, BufferUsages::MAP_READ | BufferUsages::COPY_DST, None)
        .unwrap();

    // offset + len wraps past u64::MAX; must be a bounds error, not a panic.
    assert!(ctx.write_buffer(buf, u64::MAX - 2, &[0u8; 4]).is_err());

    pollster::block_on(ctx.map_buffer(buf, MapMode::Read)).unwrap();
    assert!(ctx.mapped_range(buf, u64::MAX - 2, 4).is_err());
}

#[test]
fn map_round_trip_reads_back_written_bytes() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx
        .create_buffer(16, BufferUsages::MAP_READ | BufferUsages::COPY_DST, None)
        .unwrap();
    ctx.write_buffer(buf, 0, &[3u8; 16]).unwrap();

    pollster::block_on(ctx.map_buffer(buf, MapMode::Read)).unwrap();
    // Mapping twice is a state error.
    assert!(pollster::block_on(ctx.map_buffer(buf, MapMode::Read)).is_err());

    let bytes = ctx.mapped_range(buf, 4, 8).unwrap();
    assert_eq!(bytes, vec![3u8; 8]);

    ctx.unmap(buf).unwrap();
    assert!(ctx.unmap(buf).is_err(), "unmapping an unmapped buffer");
    pollster::block_on(ctx.wait_idle()).unwrap();
}

#[test]
fn destroyed_buffer_rejects_further_use() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(64, BufferUsages::COPY_DST, None).unwrap();
    ctx.destroy_buffer(buf).unwrap();

    assert!(ctx.destroy_buffer(buf).is_err(), "double destroy rejected");
    assert!(ctx.write_buffer(buf, 0, &[0; 4]).is_err());
}
