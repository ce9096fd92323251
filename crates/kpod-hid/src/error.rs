//! HID error types.

use thiserror::Error;

/// HID error type.
#[derive(Debug, Error)]
pub enum HidError {
    #[error("KPod not found")]
    DeviceNotFound,

    #[error("Permission denied - check udev rules")]
    PermissionDenied,

    #[error("Device init failed: {0}")]
    DeviceInitFailure(String),

    #[error("I/O failure: {0}")]
    IoFailure(String),

    #[error("Timed out waiting for report")]
    Timeout,

    #[error("Protocol error: {0}")]
    Protocol(#[from] kpod_core::Error),
}

/// Result type for HID operations.
pub type HidResult<T> = Result<T, HidError>;
