//! Copy & Fill Tests
//!
//! Tests for:
//! - Pre-driver validation: size, alignment, usage, state, bounds, overlap
//! - Fail-fast validation vs. fault-isolated driver failures (result records)
//! - Batch copies encoded as a single submission
//! - Fill/clear through the 4-byte repeating pattern path

use kiln_gpu::driver::mock::MockDriver;
use kiln_gpu::{
    BufferUsages, CopyDescriptor, DeviceManager, GpuError, GpuSettings, MapMode, ValidationKind,
    batch_copy, clear_range, copy, fill,
};

fn ready_manager() -> DeviceManager<MockDriver> {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut m = DeviceManager::new(MockDriver::new(), GpuSettings::default());
    pollster::block_on(m.initialize()).expect("mock initialize");
    m
}

fn validation_kind(err: &GpuError) -> Option<ValidationKind> {
    match err {
        GpuError::Validation(v) => Some(v.kind),
        _ => None,
    }
}

const SRC_USAGE: BufferUsages = BufferUsages::COPY_SRC.union(BufferUsages::COPY_DST);
const DST_USAGE: BufferUsages = BufferUsages::COPY_DST;

// ============================================================================
// Validation
// ============================================================================

#[test]
fn aligned_in_bounds_copy_succeeds_with_one_submission() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, Some("src")).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, Some("dst")).unwrap();
    ctx.write_buffer(src, 0, &[7u8; 16]).unwrap();

    let result = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 16,
            size: 16,
        },
    )
    .unwrap();

    assert!(result.success);
    assert_eq!(result.bytes_copied, 16);
    drop(ctx);
    assert_eq!(m.driver().submissions, 1);
    assert_eq!(&m.driver().buffer_contents(dst).unwrap()[16..32], &[7u8; 16]);
}

#[test]
fn zero_size_copy_is_rejected() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();

    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 0,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Size));
}

#[test]
fn misaligned_offset_is_rejected_without_driver_interaction() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();

    // Source offset 3, size 4: the first failing check is alignment.
    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 3,
            dst,
            dst_offset: 0,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Alignment));
    drop(ctx);
    assert_eq!(m.driver().submissions, 0, "no driver call on validation failure");
}

#[test]
fn missing_usage_flags_are_rejected() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let no_src = ctx.create_buffer(64, BufferUsages::COPY_DST, None).unwrap();
    let no_dst = ctx.create_buffer(64, BufferUsages::COPY_SRC, None).unwrap();

    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src: no_src,
            src_offset: 0,
            dst: no_dst,
            dst_offset: 0,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Usage));
}

#[test]
fn mapped_buffer_is_rejected_with_state_kind() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx
        .create_buffer(64, SRC_USAGE | BufferUsages::MAP_WRITE, None)
        .unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();
    pollster::block_on(ctx.map_buffer(src, MapMode::Write)).unwrap();

    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::State));
}

#[test]
fn out_of_bounds_range_is_rejected() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(32, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(32, DST_USAGE, None).unwrap();

    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 24,
            dst,
            dst_offset: 0,
            size: 16,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Bounds));
}

#[test]
fn overflowing_offset_is_rejected_as_out_of_bounds() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();

    // Aligned, but offset + size wraps past u64::MAX.
    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: u64::MAX - 3,
            dst,
            dst_offset: 0,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Bounds));

    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: u64::MAX - 3,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Bounds));
    drop(ctx);
    assert_eq!(m.driver().submissions, 0);
}

#[test]
fn overlapping_self_copy_is_rejected() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(64, SRC_USAGE, None).unwrap();

    // Identical ranges: offset 0, size 4 on both ends.
    let err = copy(
        &mut ctx,
        &CopyDescriptor {
            src: buf,
            src_offset: 0,
            dst: buf,
            dst_offset: 0,
            size: 4,
        },
    )
    .unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Overlap));
}

#[test]
fn non_overlapping_self_copy_is_accepted() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    ctx.write_buffer(buf, 0, &[9u8; 8]).unwrap();

    let result = copy(
        &mut ctx,
        &CopyDescriptor {
            src: buf,
            src_offset: 0,
            dst: buf,
            dst_offset: 32,
            size: 8,
        },
    )
    .unwrap();
    assert!(result.success);
    drop(ctx);
    assert_eq!(&m.driver().buffer_contents(buf).unwrap()[32..40], &[9u8; 8]);
}

// ============================================================================
// Driver-Side Failures
// ============================================================================

#[test]
fn driver_failure_is_captured_in_the_result_record() {
    let mut m = ready_manager();
    m.driver_mut().fail_next_copies(1);
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();

    // Validation passed, so this is Ok(..) with success == false.
    let result = copy(
        &mut ctx,
        &CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 16,
        },
    )
    .unwrap();
    assert!(!result.success);
    assert_eq!(result.bytes_copied, 0);
    assert!(result.error.is_some());
}

// ============================================================================
// Batch Copies
// ============================================================================

#[test]
fn batch_encodes_all_regions_into_one_submission() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();
    ctx.write_buffer(src, 0, &[1u8; 32]).unwrap();

    let descs = [
        CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 16,
        },
        CopyDescriptor {
            src,
            src_offset: 16,
            dst,
            dst_offset: 32,
            size: 16,
        },
    ];
    let result = batch_copy(&mut ctx, &descs).unwrap();

    assert!(result.success);
    assert_eq!(result.copies, 2);
    assert_eq!(result.bytes_copied, 32);
    drop(ctx);
    assert_eq!(m.driver().submissions, 1, "batch is a single submission");
}

#[test]
fn invalid_descriptor_anywhere_fails_the_batch_before_submission() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let src = ctx.create_buffer(64, SRC_USAGE, None).unwrap();
    let dst = ctx.create_buffer(64, DST_USAGE, None).unwrap();

    let descs = [
        CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 0,
            size: 16,
        },
        // Misaligned size in the second descriptor.
        CopyDescriptor {
            src,
            src_offset: 0,
            dst,
            dst_offset: 32,
            size: 3,
        },
    ];
    let err = batch_copy(&mut ctx, &descs).unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Alignment));
    drop(ctx);
    assert_eq!(m.driver().submissions, 0);
}

#[test]
fn empty_batch_is_a_successful_no_op() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let result = batch_copy(&mut ctx, &[]).unwrap();
    assert!(result.success);
    assert_eq!(result.copies, 0);
    drop(ctx);
    assert_eq!(m.driver().submissions, 0);
}

// ============================================================================
// Fill / Clear
// ============================================================================

#[test]
fn fill_writes_the_repeating_pattern() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(32, DST_USAGE, None).unwrap();

    let result = fill(&mut ctx, buf, 4, 8, 0xAB).unwrap();
    assert!(result.success);
    assert_eq!(result.bytes_copied, 8);

    drop(ctx);
    let contents = m.driver().buffer_contents(buf).unwrap();
    assert_eq!(&contents[0..4], &[0u8; 4]);
    assert_eq!(&contents[4..12], &[0xAB; 8]);
    assert_eq!(&contents[12..], &[0u8; 20]);
}

#[test]
fn fill_rejects_misaligned_offset_and_size() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(32, DST_USAGE, None).unwrap();

    let err = fill(&mut ctx, buf, 2, 8, 0xFF).unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Alignment));
    let err = fill(&mut ctx, buf, 0, 6, 0xFF).unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Alignment));
}

#[test]
fn fill_rejects_out_of_bounds_range() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(16, DST_USAGE, None).unwrap();
    let err = fill(&mut ctx, buf, 8, 12, 0x01).unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Bounds));

    // An offset that would wrap is Bounds too, not a panic.
    let err = fill(&mut ctx, buf, u64::MAX - 3, 4, 0x01).unwrap_err();
    assert_eq!(validation_kind(&err), Some(ValidationKind::Bounds));
}

#[test]
fn clear_range_zeroes_previously_written_bytes() {
    let mut m = ready_manager();
    let mut ctx = m.device().unwrap();
    let buf = ctx.create_buffer(16, DST_USAGE, None).unwrap();
    ctx.write_buffer(buf, 0, &[0xFFu8; 16]).unwrap();

    clear_range(&mut ctx, buf, 0, 8).unwrap();

    drop(ctx);
    let contents = m.driver().buffer_contents(buf).unwrap();
    assert_eq!(&contents[0..8], &[0u8; 8]);
    assert_eq!(&contents[8..], &[0xFFu8; 8]);
}
