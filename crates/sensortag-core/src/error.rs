//! Error types for sensortag-core.
//!
//! Every error raised while a session is being set up or is streaming stops
//! at the [`SessionSupervisor`](crate::SessionSupervisor): it is logged, the
//! session is torn down and the device becomes discoverable again. None of
//! them is fatal to the process.
//!
//! | Error | Raised by | Supervisor reaction |
//! |-------|-----------|---------------------|
//! | [`Error::Timeout`] | driver calls with a local timeout | graceful disconnect, teardown |
//! | [`Error::Bluetooth`] | btleplug | graceful disconnect, teardown |
//! | [`Error::StepFailed`] | capture sequencer | graceful disconnect, teardown |
//! | [`Error::NotConnected`] | driver, after a link loss | teardown |
//! | [`Error::Cancelled`] | shutdown | teardown |

use std::time::Duration;

use thiserror::Error;

use sensortag_types::ParseError;

use crate::sequencer::DriverOp;

/// Errors that can occur when driving a SensorTag.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter.
    #[error("No Bluetooth adapter available")]
    NoAdapter,

    /// The adapter's event stream ended; scanning was restarted.
    #[error("Scan event stream ended; scanning restarted")]
    ScanInterrupted,

    /// Operation attempted while not connected to device.
    #[error("Not connected to device")]
    NotConnected,

    /// Required BLE characteristic not found on device.
    #[error("Characteristic not found: {uuid} (searched in {service_count} services)")]
    CharacteristicNotFound {
        /// The UUID that was not found.
        uuid: String,
        /// Number of services that were searched.
        service_count: usize,
    },

    /// Failed to decode data received from device.
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Characteristic payload could not be decoded.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Operation timed out.
    #[error("Operation '{operation}' timed out after {duration:?}")]
    Timeout {
        /// The operation that timed out.
        operation: String,
        /// The timeout duration.
        duration: Duration,
    },

    /// A capture program operation failed; later operations were not issued.
    #[error("Capture step {step} ({op}) failed: {source}")]
    StepFailed {
        /// Zero-based index of the failing operation in the expanded program.
        step: usize,
        /// The failing operation.
        op: DriverOp,
        /// The driver error.
        #[source]
        source: Box<Error>,
    },

    /// Operation was cancelled.
    #[error("Operation cancelled")]
    Cancelled,

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Create a timeout error with operation context.
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a characteristic not found error.
    pub fn characteristic_not_found(uuid: impl Into<String>, service_count: usize) -> Self {
        Self::CharacteristicNotFound {
            uuid: uuid.into(),
            service_count,
        }
    }

    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Wrap a driver error as the failure of capture step `step`.
    pub fn step_failed(step: usize, op: DriverOp, source: Error) -> Self {
        Self::StepFailed {
            step,
            op,
            source: Box::new(source),
        }
    }
}

/// Result type alias using sensortag-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use sensortag_types::Capability;

    #[test]
    fn test_error_display() {
        let err = Error::NotConnected;
        assert_eq!(err.to_string(), "Not connected to device");

        let err = Error::characteristic_not_found("f000aa21", 5);
        assert!(err.to_string().contains("f000aa21"));
        assert!(err.to_string().contains("5 services"));

        let err = Error::timeout("connect", Duration::from_secs(30));
        assert!(err.to_string().contains("connect"));
        assert!(err.to_string().contains("30s"));
    }

    #[test]
    fn test_step_failed_display_and_source() {
        use std::error::Error as _;

        let err = Error::step_failed(
            3,
            DriverOp::Notify(Capability::BarometricPressure),
            Error::NotConnected,
        );
        let msg = err.to_string();
        assert!(msg.contains("step 3"));
        assert!(msg.contains("barometric pressure"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_parse_error_conversion() {
        let parse = ParseError::InvalidValue("battery level 120 exceeds 100%".into());
        let err: Error = parse.into();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("120"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }
}
