//! Buffer Copy Validator
//!
//! Synchronous, side-effect-free validation ahead of every driver call, then
//! command encoding for buffer-to-buffer copies and fills.
//!
//! # Two Failure Surfaces
//!
//! Validation failures (alignment, usage, state, bounds, overlap) are raised
//! as [`ValidationError`]s **before** any driver interaction, so they never
//! leave partial side effects. Driver-side failures during the submission are
//! instead captured into the returned [`CopyResult`]/[`BatchCopyResult`]
//! record, keeping a batch fault-isolated per submission: callers inspect
//! `success` rather than relying on the absence of an error.
//!
//! Validation order for a copy: size non-zero → offsets/size aligned to
//! [`COPY_ALIGNMENT`] → usage flags → mapping state → bounds → self-copy
//! overlap. The first failing check wins.

use std::time::{Duration, Instant};

use smallvec::SmallVec;

use crate::buffer::MapState;
use crate::device::DeviceContext;
use crate::driver::{BufferId, BufferUsages, CopyRegion, Driver};
use crate::errors::{Result, ValidationError, ValidationKind};

/// Alignment unit for copy offsets and sizes, matching the WebGPU
/// `COPY_BUFFER_ALIGNMENT`.
pub const COPY_ALIGNMENT: u64 = 4;

/// One requested buffer-to-buffer copy.
#[derive(Debug, Clone, Copy)]
pub struct CopyDescriptor {
    pub src: BufferId,
    pub src_offset: u64,
    pub dst: BufferId,
    pub dst_offset: u64,
    pub size: u64,
}

/// Outcome of a copy or fill submission.
///
/// `success == false` means the driver failed after validation passed;
/// `error` carries the detail.
#[derive(Debug, Clone)]
pub struct CopyResult {
    pub success: bool,
    pub bytes_copied: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

/// Outcome of a batched copy submission.
#[derive(Debug, Clone)]
pub struct BatchCopyResult {
    pub success: bool,
    /// Number of copy regions in the submission.
    pub copies: usize,
    pub bytes_copied: u64,
    pub duration: Duration,
    pub error: Option<String>,
}

fn err(kind: ValidationKind, message: String) -> ValidationError {
    ValidationError::new(kind, message)
}

/// Validates one copy descriptor against the buffer table.
///
/// Pure bookkeeping: no driver interaction, no mutation.
fn validate_copy<D: Driver>(
    ctx: &DeviceContext<'_, D>,
    desc: &CopyDescriptor,
) -> std::result::Result<(), ValidationError> {
    if desc.size == 0 {
        return Err(err(ValidationKind::Size, "copy size must be non-zero".into()));
    }
    for (name, value) in [
        ("source offset", desc.src_offset),
        ("destination offset", desc.dst_offset),
        ("size", desc.size),
    ] {
        if value % COPY_ALIGNMENT != 0 {
            return Err(err(
                ValidationKind::Alignment,
                format!("{name} {value} is not {COPY_ALIGNMENT}-byte aligned"),
            ));
        }
    }

    let src = ctx
        .buffers
        .get(desc.src)
        .ok_or_else(|| err(ValidationKind::State, format!("unknown buffer {:?}", desc.src)))?;
    let dst = ctx
        .buffers
        .get(desc.dst)
        .ok_or_else(|| err(ValidationKind::State, format!("unknown buffer {:?}", desc.dst)))?;

    if !src.usage.contains(BufferUsages::COPY_SRC) {
        return Err(err(
            ValidationKind::Usage,
            format!("source buffer {:?} lacks COPY_SRC usage", desc.src),
        ));
    }
    if !dst.usage.contains(BufferUsages::COPY_DST) {
        return Err(err(
            ValidationKind::Usage,
            format!("destination buffer {:?} lacks COPY_DST usage", desc.dst),
        ));
    }
    if src.map_state != MapState::Unmapped {
        return Err(err(
            ValidationKind::State,
            format!("source buffer {:?} is not unmapped", desc.src),
        ));
    }
    if dst.map_state != MapState::Unmapped {
        return Err(err(
            ValidationKind::State,
            format!("destination buffer {:?} is not unmapped", desc.dst),
        ));
    }
    // Checked additions: an offset near u64::MAX must land in Bounds, not
    // wrap around or abort.
    let Some(src_end) = desc
        .src_offset
        .checked_add(desc.size)
        .filter(|&end| end <= src.size)
    else {
        return Err(err(
            ValidationKind::Bounds,
            format!(
                "source range at {} of {} bytes exceeds buffer size {}",
                desc.src_offset, desc.size, src.size
            ),
        ));
    };
    let Some(dst_end) = desc
        .dst_offset
        .checked_add(desc.size)
        .filter(|&end| end <= dst.size)
    else {
        return Err(err(
            ValidationKind::Bounds,
            format!(
                "destination range at {} of {} bytes exceeds buffer size {}",
                desc.dst_offset, desc.size, dst.size
            ),
        ));
    };
    if desc.src == desc.dst && desc.src_offset < dst_end && desc.dst_offset < src_end {
        return Err(err(
            ValidationKind::Overlap,
            format!(
                "self-copy ranges {}..{src_end} and {}..{dst_end} overlap",
                desc.src_offset, desc.dst_offset
            ),
        ));
    }
    Ok(())
}

/// Validates and executes a single copy as one command submission.
pub fn copy<D: Driver>(ctx: &mut DeviceContext<'_, D>, desc: &CopyDescriptor) -> Result<CopyResult> {
    validate_copy(ctx, desc)?;

    let region = CopyRegion {
        src: desc.src,
        src_offset: desc.src_offset,
        dst: desc.dst,
        dst_offset: desc.dst_offset,
        size: desc.size,
    };
    let started = Instant::now();
    let outcome = ctx.driver.submit_copies(&[region]);
    let duration = started.elapsed();
    ctx.stats.track_submission();

    Ok(match outcome {
        Ok(()) => CopyResult {
            success: true,
            bytes_copied: desc.size,
            duration,
            error: None,
        },
        Err(e) => {
            log::warn!("copy submission failed: {e}");
            CopyResult {
                success: false,
                bytes_copied: 0,
                duration,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Validates every descriptor, then encodes all of them into a single
/// command submission.
///
/// Validation is fail-fast across the whole batch (nothing is submitted if
/// any descriptor is invalid); a driver failure afterwards fails the batch
/// as one unit, captured in the result record.
pub fn batch_copy<D: Driver>(
    ctx: &mut DeviceContext<'_, D>,
    descs: &[CopyDescriptor],
) -> Result<BatchCopyResult> {
    let mut regions: SmallVec<[CopyRegion; 8]> = SmallVec::with_capacity(descs.len());
    let mut total = 0u64;
    for desc in descs {
        validate_copy(ctx, desc)?;
        total += desc.size;
        regions.push(CopyRegion {
            src: desc.src,
            src_offset: desc.src_offset,
            dst: desc.dst,
            dst_offset: desc.dst_offset,
            size: desc.size,
        });
    }
    if regions.is_empty() {
        return Ok(BatchCopyResult {
            success: true,
            copies: 0,
            bytes_copied: 0,
            duration: Duration::ZERO,
            error: None,
        });
    }

    let started = Instant::now();
    let outcome = ctx.driver.submit_copies(&regions);
    let duration = started.elapsed();
    ctx.stats.track_submission();

    Ok(match outcome {
        Ok(()) => BatchCopyResult {
            success: true,
            copies: regions.len(),
            bytes_copied: total,
            duration,
            error: None,
        },
        Err(e) => {
            log::warn!("batch copy submission of {} region(s) failed: {e}", regions.len());
            BatchCopyResult {
                success: false,
                copies: regions.len(),
                bytes_copied: 0,
                duration,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Fills a buffer range with a repeating byte value.
///
/// The byte is expanded into a 4-byte pattern and written through the queue
/// write path; offset and size must both be 4-byte aligned and in bounds,
/// and the buffer must carry `COPY_DST` and be unmapped.
pub fn fill<D: Driver>(
    ctx: &mut DeviceContext<'_, D>,
    buffer: BufferId,
    offset: u64,
    size: u64,
    value: u8,
) -> Result<CopyResult> {
    if size == 0 {
        return Err(err(ValidationKind::Size, "fill size must be non-zero".into()).into());
    }
    for (name, v) in [("offset", offset), ("size", size)] {
        if v % COPY_ALIGNMENT != 0 {
            return Err(err(
                ValidationKind::Alignment,
                format!("fill {name} {v} is not {COPY_ALIGNMENT}-byte aligned"),
            )
            .into());
        }
    }
    let info = ctx.buffers.expect_live(buffer)?;
    if !info.usage.contains(BufferUsages::COPY_DST) {
        return Err(err(
            ValidationKind::Usage,
            format!("buffer {buffer:?} lacks COPY_DST usage"),
        )
        .into());
    }
    if info.map_state != MapState::Unmapped {
        return Err(err(
            ValidationKind::State,
            format!("buffer {buffer:?} is not unmapped"),
        )
        .into());
    }
    if offset.checked_add(size).is_none_or(|end| end > info.size) {
        return Err(err(
            ValidationKind::Bounds,
            format!(
                "fill range at {offset} of {size} bytes exceeds buffer size {}",
                info.size
            ),
        )
        .into());
    }

    let pattern = [value; 4];
    let data: Vec<u8> = pattern
        .iter()
        .copied()
        .cycle()
        .take(size as usize)
        .collect();

    let started = Instant::now();
    let outcome = ctx.driver.write_buffer(buffer, offset, &data);
    let duration = started.elapsed();

    Ok(match outcome {
        Ok(()) => CopyResult {
            success: true,
            bytes_copied: size,
            duration,
            error: None,
        },
        Err(e) => {
            log::warn!("fill submission failed: {e}");
            CopyResult {
                success: false,
                bytes_copied: 0,
                duration,
                error: Some(e.to_string()),
            }
        }
    })
}

/// Zeroes a buffer range. Equivalent to [`fill`] with value `0`.
pub fn clear_range<D: Driver>(
    ctx: &mut DeviceContext<'_, D>,
    buffer: BufferId,
    offset: u64,
    size: u64,
) -> Result<CopyResult> {
    fill(ctx, buffer, offset, size, 0)
}
