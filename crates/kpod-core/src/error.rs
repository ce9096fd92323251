//! Error types for KPod core.

use thiserror::Error;

/// Core error type for protocol encoding and decoding.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Error {
    #[error("Protocol mismatch: expected opcode {expected:#04x}, got {actual:#04x}")]
    ProtocolMismatch { expected: u8, actual: u8 },

    #[error("Command payload too long: {0} bytes (max 7)")]
    PayloadTooLong(usize),

    #[error("Scale out of range: {0} (must be 0-127)")]
    ScaleOutOfRange(u8),
}

/// Result type alias for KPod core operations.
pub type Result<T> = std::result::Result<T, Error>;
