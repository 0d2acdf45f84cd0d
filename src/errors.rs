//! Error Types
//!
//! This module defines the error types used throughout the GPU core.
//!
//! # Taxonomy
//!
//! - State errors: an operation is invalid for the current device or buffer
//!   state ([`GpuError::InvalidState`], [`ValidationKind::State`]).
//! - Initialization errors: adapter/device request failed or a required
//!   capability is unavailable ([`GpuError::AdapterRequestFailed`],
//!   [`GpuError::DeviceRequestFailed`], [`GpuError::MissingFeature`],
//!   [`GpuError::LimitUnsatisfied`]).
//! - Validation errors: alignment, bounds, overlap or usage-flag violations
//!   on copy/fill operations, subtyped by [`ValidationKind`]. These are raised
//!   before any driver call, so a validation failure never has partial
//!   side effects.
//! - Pipeline errors: driver-side compile failures, wrapping the diagnostic.
//!
//! Device loss is **not** an error: it is a state transition delivered through
//! the driver's loss notification channel (see [`crate::device`]).
//!
//! All public APIs return [`Result<T>`], an alias for
//! `std::result::Result<T, GpuError>`. Copy and batch-copy driver failures are
//! the one deliberate exception: they are captured into
//! [`crate::copy::CopyResult`] records instead of unwinding the caller.

use thiserror::Error;

use crate::device::DeviceState;

/// Classifies a validation failure on a copy, fill or buffer operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// A size was zero where a non-zero size is required.
    Size,
    /// An offset or size is not aligned to the copy alignment unit.
    Alignment,
    /// A buffer is missing a required usage flag.
    Usage,
    /// A buffer is in the wrong mapping state, destroyed, or unknown.
    State,
    /// A range does not fit within the buffer's capacity.
    Bounds,
    /// Source and destination ranges of a same-buffer copy intersect.
    Overlap,
}

/// A validation failure, raised before any driver interaction.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind:?} validation failed: {message}")]
pub struct ValidationError {
    pub kind: ValidationKind,
    pub message: String,
}

impl ValidationError {
    pub(crate) fn new(kind: ValidationKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// The main error type for the GPU resource core.
#[derive(Error, Debug)]
pub enum GpuError {
    // ========================================================================
    // Initialization
    // ========================================================================
    /// Failed to obtain a compatible GPU adapter.
    #[error("Failed to request GPU adapter: {0}")]
    AdapterRequestFailed(String),

    /// The adapter refused to create a device.
    #[error("Failed to create GPU device: {0}")]
    DeviceRequestFailed(String),

    /// A required feature is not supported by the selected adapter.
    #[error("Required feature not supported by adapter: {feature}")]
    MissingFeature {
        /// Name of the missing capability.
        feature: String,
    },

    /// A required limit exceeds what the adapter can provide.
    #[error("Required limit `{limit}` unsatisfiable: requested {required}, adapter supports {available}")]
    LimitUnsatisfied {
        limit: &'static str,
        required: u64,
        available: u64,
    },

    // ========================================================================
    // State machine
    // ========================================================================
    /// The operation is not legal in the device's current lifecycle state.
    #[error("Operation `{operation}` invalid in device state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: DeviceState,
    },

    // ========================================================================
    // Validation
    // ========================================================================
    /// A copy/fill/buffer operation failed pre-driver validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    // ========================================================================
    // Pipelines
    // ========================================================================
    /// The driver failed to compile a pipeline.
    #[error("Pipeline compilation failed ({label}): {detail}")]
    PipelineCompileFailed { label: String, detail: String },

    // ========================================================================
    // Driver
    // ========================================================================
    /// A driver-side operation failed after validation passed.
    #[error("Driver error: {0}")]
    DriverError(String),
}

impl GpuError {
    /// Shorthand for a [`ValidationKind::State`] error.
    pub(crate) fn buffer_state(message: impl Into<String>) -> Self {
        ValidationError::new(ValidationKind::State, message).into()
    }
}

/// Alias for `Result<T, GpuError>`.
pub type Result<T> = std::result::Result<T, GpuError>;
