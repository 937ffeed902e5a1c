//! Discovery loop.
//!
//! Repeatedly asks a [`Discoverer`] for the next peripheral and hands it to
//! the [`SessionSupervisor`]. The loop never waits for a session's outcome
//! and only stops when its cancellation token fires.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::supervisor::{Admission, SessionSupervisor};
use crate::traits::SensorDriver;

/// Default pause between two discovery requests.
pub const DEFAULT_DISCOVERY_PAUSE: Duration = Duration::from_millis(250);

/// Source of discovered peripherals.
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// Wait for the next eligible peripheral. May take arbitrarily long.
    async fn discover(&self) -> Result<Arc<dyn SensorDriver>>;
}

/// Feeds discovered drivers into the supervisor.
pub struct DiscoveryLoop {
    discoverer: Arc<dyn Discoverer>,
    supervisor: Arc<SessionSupervisor>,
    pause: Duration,
    cancel: CancellationToken,
}

impl DiscoveryLoop {
    /// Create a loop stopped by the supervisor's shutdown.
    pub fn new(discoverer: Arc<dyn Discoverer>, supervisor: Arc<SessionSupervisor>) -> Self {
        let cancel = supervisor.child_token();
        Self {
            discoverer,
            supervisor,
            pause: DEFAULT_DISCOVERY_PAUSE,
            cancel,
        }
    }

    #[must_use]
    pub fn pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }

    /// Use `cancel` instead of the supervisor's token.
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Run until cancelled.
    pub async fn run(self) {
        info!("Discovery started");
        loop {
            let found = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                found = self.discoverer.discover() => found,
            };

            match found {
                Ok(driver) => {
                    let id = driver.id().to_string();
                    match self.supervisor.admit(driver).await {
                        Admission::Admitted { .. } => debug!(device = %id, "Handed to supervisor"),
                        Admission::Rejected(reason) => {
                            debug!(device = %id, ?reason, "Discovery not admitted")
                        }
                    }
                }
                Err(e) => warn!("Discovery failed: {}", e),
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = sleep(self.pause) => {}
            }
        }
        info!("Discovery stopped");
    }
}
