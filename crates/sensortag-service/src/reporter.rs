//! Startup sequence and main loop of the reporter.
//!
//! The database is created first. Only once that succeeds is the
//! discoverer built and the discovery loop started, so an unreachable
//! store never leads to a device being touched.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tracing::{error, info, warn};

use sensortag_core::{
    Discoverer, DiscoveryLoop, SessionSupervisor, SinkError, StatsSnapshot, TelemetrySink,
    with_retry,
};

use crate::config::Config;

/// Exit code for missing required configuration.
pub const EXIT_CONFIG: u8 = 1;
/// Exit code for a database that could not be initialised.
pub const EXIT_DATABASE: u8 = 2;

/// Errors that stop the reporter before any device is admitted.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Cannot create database {database} after {attempts} attempt(s): {source}")]
    Database {
        database: String,
        attempts: u32,
        #[source]
        source: SinkError,
    },

    #[error("Bluetooth unavailable: {0}")]
    Bluetooth(#[source] sensortag_core::Error),
}

impl StartupError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            StartupError::Database { .. } => EXIT_DATABASE,
            StartupError::Bluetooth(_) => EXIT_CONFIG,
        }
    }
}

/// Runs discovery and sessions against one telemetry sink.
pub struct Reporter {
    config: Config,
    database: String,
    sink: Arc<dyn TelemetrySink>,
}

impl Reporter {
    pub fn new(config: Config, database: &str, sink: Arc<dyn TelemetrySink>) -> Self {
        Self {
            config,
            database: database.to_string(),
            sink,
        }
    }

    /// Create the database, retrying with a fixed delay.
    pub async fn prepare_database(&self) -> Result<(), StartupError> {
        let retry = self.config.startup_retry();
        info!(database = %self.database, "Preparing database");

        let attempts = AtomicU32::new(0);
        with_retry(&retry, "create database", || {
            attempts.fetch_add(1, Ordering::Relaxed);
            self.sink.ensure_database(&self.database)
        })
        .await
        .map_err(|source| StartupError::Database {
            database: self.database.clone(),
            attempts: attempts.load(Ordering::Relaxed),
            source,
        })
    }

    /// Prepare the database, then discover and supervise devices until
    /// `shutdown` completes or the discovery task dies.
    ///
    /// `make_discoverer` is only called once the database is ready.
    pub async fn run<D, Fut, S>(
        &self,
        make_discoverer: D,
        shutdown: S,
    ) -> Result<StatsSnapshot, StartupError>
    where
        D: FnOnce() -> Fut,
        Fut: Future<Output = sensortag_core::Result<Arc<dyn Discoverer>>>,
        S: Future<Output = ()>,
    {
        self.prepare_database().await?;
        let discoverer = make_discoverer().await.map_err(StartupError::Bluetooth)?;

        let supervisor = SessionSupervisor::new(Arc::clone(&self.sink), self.config.supervisor_config());
        info!(
            reconnect = %supervisor.config().reconnect,
            deadline = ?supervisor.config().setup_deadline(),
            "Starting discovery"
        );

        let mut discovery = tokio::spawn(
            DiscoveryLoop::new(discoverer, Arc::clone(&supervisor))
                .pause(self.config.discovery.pause())
                .run(),
        );

        let discovery_done = tokio::select! {
            _ = shutdown => {
                info!("Shutdown requested");
                false
            }
            result = &mut discovery => {
                match result {
                    Err(e) if e.is_panic() => error!("Discovery task panicked: {}", e),
                    Err(e) => error!("Discovery task failed: {}", e),
                    Ok(()) => warn!("Discovery stopped unexpectedly"),
                }
                true
            }
        };

        let stats = supervisor.shutdown().await;
        if !discovery_done && let Err(e) = discovery.await {
            warn!("Discovery task ended abnormally: {}", e);
        }

        info!(
            admitted = stats.admitted,
            samples = stats.samples_written,
            dropped = stats.samples_dropped,
            "Reporter stopped"
        );
        Ok(stats)
    }
}

/// Completes on SIGINT or, on Unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Cannot listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down..."),
        _ = terminate => info!("Received SIGTERM, shutting down..."),
    }
}
