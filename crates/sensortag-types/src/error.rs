//! Error types for data parsing in sensortag-types.

use thiserror::Error;

use crate::types::Capability;

/// Errors that can occur when decoding SensorTag characteristic payloads.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in sensortag-core).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The payload is shorter than the capability's data layout.
    #[error("{capability} payload requires {expected} bytes, got {actual}")]
    InsufficientBytes {
        /// Capability whose payload was being decoded.
        capability: Capability,
        /// Minimum payload length.
        expected: usize,
        /// Length actually received.
        actual: usize,
    },

    /// The payload decoded to a value outside the sensor's range.
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Result type alias using sensortag-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
