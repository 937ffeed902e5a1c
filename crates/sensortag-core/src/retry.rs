//! Retry logic for fallible async operations.
//!
//! Used for startup operations such as creating the telemetry database:
//! a bounded number of retries with a fixed delay. Capture program steps
//! are never retried.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use sensortag_core::{RetryConfig, SinkError, with_retry};
//!
//! # async fn example() -> Result<(), SinkError> {
//! let config = RetryConfig::fixed(5, Duration::from_secs(2));
//!
//! let result = with_retry(&config, "create database", || async {
//!     Ok::<_, SinkError>(42)
//! }).await?;
//! # Ok(())
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::{debug, warn};

use crate::sink::SinkError;

/// Errors that know whether repeating the operation can help.
pub trait Retryable: Display {
    /// Whether the failed operation may succeed when repeated.
    fn is_retryable(&self) -> bool;
}

impl Retryable for SinkError {
    fn is_retryable(&self) -> bool {
        match self {
            SinkError::Unavailable(_) => true,
            SinkError::Rejected { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Bounded retries with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Delay before each retry.
    pub delay: Duration,
}

impl RetryConfig {
    pub fn fixed(max_retries: u32, delay: Duration) -> Self {
        Self { max_retries, delay }
    }

    /// Total number of attempts, the first one included.
    pub fn attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the retry budget is exhausted. The last error is returned.
pub async fn with_retry<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> std::result::Result<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
    E: Retryable,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!("{} succeeded after {} retries", operation_name, attempt);
                }
                return Ok(result);
            }
            Err(e) if !e.is_retryable() || attempt >= config.max_retries => return Err(e),
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}; retrying in {:?}",
                    operation_name,
                    attempt + 1,
                    config.attempts(),
                    e,
                    config.delay
                );
                sleep(config.delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn test_is_retryable() {
        assert!(SinkError::Unavailable("connection refused".into()).is_retryable());
        assert!(
            SinkError::Rejected {
                status: 503,
                message: String::new()
            }
            .is_retryable()
        );
        assert!(
            !SinkError::Rejected {
                status: 401,
                message: "authorization failed".into()
            }
            .is_retryable()
        );
        assert!(!SinkError::InvalidSample("NaN".into()).is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_eventual_success() {
        let config = RetryConfig::fixed(3, Duration::from_secs(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let result = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts);
            async move {
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(SinkError::Unavailable("down".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_retry_exhausts_budget_with_fixed_delay() {
        let config = RetryConfig::fixed(2, Duration::from_secs(2));
        let attempts = Arc::new(AtomicU32::new(0));
        let started = Instant::now();

        let result: std::result::Result<(), _> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(SinkError::Unavailable("down".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), config.attempts());
        assert_eq!(started.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_with_retry_non_retryable_error() {
        let config = RetryConfig::fixed(5, Duration::from_millis(1));
        let attempts = Arc::new(AtomicU32::new(0));

        let result: std::result::Result<(), _> = with_retry(&config, "test", || {
            let attempts = Arc::clone(&attempts);
            async move {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err(SinkError::Rejected {
                    status: 401,
                    message: "authorization failed".into(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
