//! Error types for sensortag-store.

use sensortag_core::SinkError;

/// Result type for sensortag-store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur talking to InfluxDB.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The server could not be reached or the request failed in transit.
    #[error("InfluxDB not reachable at {url}: {source}")]
    NotReachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP client could not be built.
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),

    /// The server answered with a non-success status.
    #[error("InfluxDB returned error {status}: {body}")]
    Response { status: u16, body: String },

    /// Invalid connection settings.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The value cannot be written as line protocol.
    #[error("Cannot encode {series}: {reason}")]
    Encode { series: String, reason: String },
}

impl From<Error> for SinkError {
    fn from(err: Error) -> Self {
        match err {
            Error::Response { status, body } => SinkError::Rejected {
                status,
                message: body,
            },
            Error::Encode { .. } => SinkError::InvalidSample(err.to_string()),
            Error::NotReachable { .. } | Error::Client(_) | Error::InvalidConfig(_) => {
                SinkError::Unavailable(err.to_string())
            }
        }
    }
}
