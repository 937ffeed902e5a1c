//! Session supervisor.
//!
//! The supervisor owns the map of managed sessions and one task per
//! session. Each task drives its device through
//! `Connecting -> Configuring -> Streaming` under a setup deadline, and
//! tears it down on failure, timeout, disconnect or shutdown.
//!
//! Within one setup attempt, the deadline, the driver's disconnect event and
//! the completion of the capture program race in a single `select!`; the
//! first to complete decides the outcome and the others are dropped before
//! any teardown work starts.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{RwLock, oneshot, watch};
use tokio::time::{Instant, sleep, sleep_until, timeout};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use sensortag_types::CapabilityReading;

use crate::error::Error;
use crate::events::{DriverEvent, DriverEventReceiver};
use crate::metrics::{StatsSnapshot, SupervisorStats};
use crate::sequencer::{CaptureProgram, CaptureSequencer};
use crate::session::{BindingKind, DeviceSession, SessionState};
use crate::sink::{TelemetryAdapter, TelemetrySink};
use crate::traits::SensorDriver;

/// What happens when a streaming device disconnects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReconnectPolicy {
    /// Tear the session down; the device is admitted again when the
    /// discoverer next yields it.
    #[default]
    Rediscover,
    /// Keep the session and run the setup again on the same driver handle.
    SameHandle,
}

impl fmt::Display for ReconnectPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReconnectPolicy::Rediscover => write!(f, "rediscover"),
            ReconnectPolicy::SameHandle => write!(f, "same-handle"),
        }
    }
}

impl FromStr for ReconnectPolicy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "rediscover" => Ok(ReconnectPolicy::Rediscover),
            "same-handle" | "same_handle" => Ok(ReconnectPolicy::SameHandle),
            other => Err(Error::invalid_config(format!(
                "unknown reconnect policy '{}' (expected rediscover or same-handle)",
                other
            ))),
        }
    }
}

/// Supervisor tunables.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Upper bound for the driver's connect-and-set-up call.
    pub connect_timeout: Duration,
    /// Pause between connecting and the first capture operation.
    pub settle: Duration,
    /// Slack added to the setup deadline.
    pub margin: Duration,
    /// Bound for a single best-effort driver disconnect during teardown.
    pub disconnect_timeout: Duration,
    /// Bound for waiting on session tasks at shutdown.
    pub shutdown_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub program: CaptureProgram,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            settle: Duration::from_millis(1500),
            margin: Duration::from_secs(2),
            disconnect_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
            program: CaptureProgram::standard(),
        }
    }
}

impl SupervisorConfig {
    /// Total time allowed for `Connecting` plus `Configuring`.
    pub fn setup_deadline(&self) -> Duration {
        self.connect_timeout + self.settle + self.margin
    }

    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    #[must_use]
    pub fn margin(mut self, margin: Duration) -> Self {
        self.margin = margin;
        self
    }

    #[must_use]
    pub fn disconnect_timeout(mut self, timeout: Duration) -> Self {
        self.disconnect_timeout = timeout;
        self
    }

    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.reconnect = policy;
        self
    }

    #[must_use]
    pub fn program(mut self, program: CaptureProgram) -> Self {
        self.program = program;
        self
    }
}

/// Why an admission was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A session with the same identifier is active.
    AlreadyManaged,
    /// The supervisor is shutting down.
    ShuttingDown,
}

/// Result of [`SessionSupervisor::admit`].
#[derive(Debug)]
pub enum Admission {
    Admitted {
        id: String,
        /// State of the new session.
        state: watch::Receiver<SessionState>,
    },
    Rejected(RejectReason),
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted { .. })
    }
}

/// Why a session was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownReason {
    /// The setup deadline elapsed first.
    TimedOut,
    /// Connecting or a capture operation failed.
    SetupFailed,
    /// The driver reported a disconnect.
    Disconnected,
    /// The supervisor is shutting down.
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeardownReason::TimedOut => "setup timed out",
            TeardownReason::SetupFailed => "setup failed",
            TeardownReason::Disconnected => "disconnected",
            TeardownReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Subscribed before setup starts and handed over to streaming, so an event
/// emitted while the last capture operation completes is still seen.
struct StreamReceivers {
    disconnect: DriverEventReceiver,
    telemetry: DriverEventReceiver,
}

enum SetupOutcome {
    Ready {
        battery: u8,
        receivers: StreamReceivers,
    },
    Failed(Error),
    TimedOut,
    Disconnected,
    Cancelled,
}

enum StreamEnd {
    Disconnected,
    Cancelled,
}

/// Owns every managed session.
pub struct SessionSupervisor {
    sessions: RwLock<HashMap<String, Arc<DeviceSession>>>,
    adapter: TelemetryAdapter,
    sequencer: CaptureSequencer,
    config: SupervisorConfig,
    cancel: CancellationToken,
    tracker: TaskTracker,
    stats: Arc<SupervisorStats>,
}

impl fmt::Debug for SessionSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionSupervisor")
            .field("config", &self.config)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl SessionSupervisor {
    pub fn new(sink: Arc<dyn TelemetrySink>, config: SupervisorConfig) -> Arc<Self> {
        let stats = Arc::new(SupervisorStats::new());
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            adapter: TelemetryAdapter::new(sink, Arc::clone(&stats)),
            sequencer: CaptureSequencer::new(config.program.clone()),
            config,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            stats,
        })
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    pub fn stats(&self) -> &SupervisorStats {
        &self.stats
    }

    /// A token cancelled when the supervisor shuts down.
    pub fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Admit a discovered driver.
    ///
    /// A driver whose identifier is already managed is rejected without any
    /// driver operation. An accepted driver gets its own session task.
    pub async fn admit(self: &Arc<Self>, driver: Arc<dyn SensorDriver>) -> Admission {
        if self.cancel.is_cancelled() {
            self.stats.record_rejected();
            return Admission::Rejected(RejectReason::ShuttingDown);
        }

        let id = driver.id().to_string();
        let session = {
            let mut sessions = self.sessions.write().await;
            if sessions.contains_key(&id) {
                debug!(device = %id, "Already managed, rejecting duplicate discovery");
                self.stats.record_rejected();
                return Admission::Rejected(RejectReason::AlreadyManaged);
            }
            let session = Arc::new(DeviceSession::new(driver, self.cancel.child_token()));
            sessions.insert(id.clone(), Arc::clone(&session));
            session
        };

        self.stats.record_admitted();
        info!(device = %id, kind = %session.kind(), "Admitted device");

        let state = session.watch();
        let supervisor = Arc::clone(self);
        self.tracker
            .spawn(async move { supervisor.run_session(session).await });

        Admission::Admitted { id, state }
    }

    /// Current state of a managed session.
    pub async fn state(&self, id: &str) -> Option<SessionState> {
        self.sessions.read().await.get(id).map(|s| s.state())
    }

    pub async fn is_managed(&self, id: &str) -> bool {
        self.sessions.read().await.contains_key(id)
    }

    /// Identifiers of all managed sessions.
    pub async fn session_ids(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    /// Cancel every session and wait for their teardown, bounded by the
    /// shutdown timeout. Returns the final statistics.
    pub async fn shutdown(&self) -> StatsSnapshot {
        let active = self.sessions.read().await.len();
        info!("Shutting down supervisor with {} active session(s)", active);

        self.cancel.cancel();
        self.tracker.close();
        if timeout(self.config.shutdown_timeout, self.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                "Sessions did not finish within {:?}, abandoning them",
                self.config.shutdown_timeout
            );
        }

        let snapshot = self.stats.snapshot();
        info!(?snapshot, "Supervisor stopped");
        snapshot
    }

    async fn run_session(self: Arc<Self>, session: Arc<DeviceSession>) {
        let reason = loop {
            session.set_state(SessionState::Connecting);
            let deadline = session.arm_deadline(self.config.setup_deadline());

            let outcome = self.establish(&session, deadline).await;
            session.disarm_deadline();
            session.bindings().detach(BindingKind::SetupDisconnect);

            let (battery, receivers) = match outcome {
                SetupOutcome::Ready { battery, receivers } => (battery, receivers),
                SetupOutcome::Failed(e) => {
                    warn!(device = %session.id(), "Setup failed: {}", e);
                    self.stats.record_setup_failure();
                    break TeardownReason::SetupFailed;
                }
                SetupOutcome::TimedOut => {
                    warn!(
                        device = %session.id(),
                        "Setup did not complete within {:?}",
                        self.config.setup_deadline()
                    );
                    self.stats.record_timed_out();
                    break TeardownReason::TimedOut;
                }
                SetupOutcome::Disconnected => {
                    info!(device = %session.id(), "Disconnected during setup");
                    self.stats.record_disconnect();
                    break TeardownReason::Disconnected;
                }
                SetupOutcome::Cancelled => break TeardownReason::Shutdown,
            };

            match self.stream(&session, battery, receivers).await {
                StreamEnd::Cancelled => break TeardownReason::Shutdown,
                StreamEnd::Disconnected => {
                    self.stats.record_disconnect();
                    session.bindings().detach_all();
                    match self.config.reconnect {
                        ReconnectPolicy::Rediscover => {
                            info!(device = %session.id(), "Disconnected, releasing for rediscovery");
                            break TeardownReason::Disconnected;
                        }
                        ReconnectPolicy::SameHandle => {
                            info!(device = %session.id(), "Disconnected, reconnecting");
                            self.stats.record_reconnect();
                        }
                    }
                }
            }
        };

        self.teardown(&session, reason).await;
    }

    /// One setup attempt: connect, settle, run the capture program.
    async fn establish(&self, session: &DeviceSession, deadline: Instant) -> SetupOutcome {
        let driver = Arc::clone(session.driver());
        let disconnected =
            bind_disconnect_listener(session, BindingKind::SetupDisconnect, driver.subscribe());
        let receivers = StreamReceivers {
            disconnect: driver.subscribe(),
            telemetry: driver.subscribe(),
        };

        let setup = async {
            driver.connect_and_set_up().await?;
            sleep(self.config.settle).await;
            session.set_state(SessionState::Configuring);
            self.sequencer.run(driver.as_ref()).await
        };

        tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => SetupOutcome::Cancelled,
            _ = disconnected => SetupOutcome::Disconnected,
            _ = sleep_until(deadline) => SetupOutcome::TimedOut,
            result = setup => match result {
                Ok(battery) => SetupOutcome::Ready { battery, receivers },
                Err(e) => SetupOutcome::Failed(e),
            },
        }
    }

    /// Enter `Streaming` and wait for the disconnect or shutdown.
    async fn stream(
        &self,
        session: &Arc<DeviceSession>,
        battery: u8,
        receivers: StreamReceivers,
    ) -> StreamEnd {
        let disconnected =
            bind_disconnect_listener(session, BindingKind::Disconnect, receivers.disconnect);

        self.adapter
            .forward(
                session.id(),
                session.kind(),
                &CapabilityReading::BatteryLevel { level: battery },
            )
            .await;
        self.bind_telemetry(session, receivers.telemetry);

        session.set_state(SessionState::Streaming);
        self.stats.record_streaming();
        info!(device = %session.id(), battery, "Streaming");

        tokio::select! {
            biased;
            _ = session.cancel_token().cancelled() => StreamEnd::Cancelled,
            _ = disconnected => StreamEnd::Disconnected,
        }
    }

    /// Forward every reading on its own task so a slow sink never holds up
    /// event delivery.
    fn bind_telemetry(&self, session: &DeviceSession, mut events: DriverEventReceiver) {
        let adapter = self.adapter.clone();
        let tracker = self.tracker.clone();
        let id = session.id().to_string();
        let kind = session.kind();

        let handle = tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(DriverEvent::Reading(reading)) => {
                        let adapter = adapter.clone();
                        let id = id.clone();
                        tracker.spawn(async move {
                            adapter.forward(&id, kind, &reading).await;
                        });
                    }
                    Ok(DriverEvent::Disconnected) => {}
                    Err(RecvError::Lagged(missed)) => {
                        warn!(device = %id, "Telemetry listener lagged, {} readings lost", missed);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });
        session.bindings().bind(BindingKind::Telemetry, handle);
    }

    async fn teardown(&self, session: &Arc<DeviceSession>, reason: TeardownReason) {
        session.disarm_deadline();
        session.bindings().detach_all();

        let disconnect = match reason {
            TeardownReason::TimedOut | TeardownReason::SetupFailed => true,
            TeardownReason::Disconnected => false,
            TeardownReason::Shutdown => session.state().is_configured_or_configuring(),
        };
        if disconnect {
            let driver = session.driver();
            let connected = driver.is_connected().await;
            debug!(device = %session.id(), connected, "Best-effort disconnect");
            match timeout(self.config.disconnect_timeout, driver.disconnect()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(device = %session.id(), "Disconnect failed: {}", e),
                Err(_) => debug!(
                    device = %session.id(),
                    "Disconnect did not complete within {:?}",
                    self.config.disconnect_timeout
                ),
            }
        }

        {
            let mut sessions = self.sessions.write().await;
            if sessions
                .get(session.id())
                .is_some_and(|current| Arc::ptr_eq(current, session))
            {
                sessions.remove(session.id());
            }
        }

        session.set_state(SessionState::Disconnected);
        info!(device = %session.id(), %reason, "Session ended");
    }
}

/// Spawn a listener that fires the returned receiver on the first disconnect
/// event of `events`, and bind it to the session under `kind`.
fn bind_disconnect_listener(
    session: &DeviceSession,
    kind: BindingKind,
    mut events: DriverEventReceiver,
) -> oneshot::Receiver<()> {
    let (tx, rx) = oneshot::channel();

    let handle = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(DriverEvent::Disconnected) => {
                    let _ = tx.send(());
                    return;
                }
                Ok(DriverEvent::Reading(_)) | Err(RecvError::Lagged(_)) => {}
                // Dropping `tx` reports the driver as gone
                Err(RecvError::Closed) => return,
            }
        }
    });
    session.bindings().bind(kind, handle);
    rx
}
