//! Managed device sessions.
//!
//! A [`DeviceSession`] is created when the supervisor admits a driver and
//! lives until the device is torn down. It owns its event bindings so a
//! teardown detaches all of them at once.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use sensortag_types::DeviceKind;

use crate::traits::SensorDriver;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Discovered,
    Connecting,
    Configuring,
    Streaming,
    Disconnected,
    /// Duplicate admission. Never stored in the managed map.
    Rejected,
}

impl SessionState {
    /// Whether the capture program is running or done.
    pub fn is_configured_or_configuring(&self) -> bool {
        matches!(self, SessionState::Configuring | SessionState::Streaming)
    }

    /// Whether the session is still being set up.
    pub fn is_setting_up(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Configuring)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SessionState::Discovered => "discovered",
            SessionState::Connecting => "connecting",
            SessionState::Configuring => "configuring",
            SessionState::Streaming => "streaming",
            SessionState::Disconnected => "disconnected",
            SessionState::Rejected => "rejected",
        };
        f.write_str(s)
    }
}

/// Listener kinds a session can have attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// Disconnect listener used while connecting and configuring.
    SetupDisconnect,
    /// Disconnect listener used while streaming.
    Disconnect,
    /// Forwards readings to the telemetry sink.
    Telemetry,
}

/// Listener tasks attached to a session, at most one per kind.
#[derive(Debug, Default)]
pub struct EventBindings {
    handles: Mutex<HashMap<BindingKind, JoinHandle<()>>>,
}

impl EventBindings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a listener. A listener already bound under `kind` is aborted.
    pub fn bind(&self, kind: BindingKind, handle: JoinHandle<()>) {
        let previous = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kind, handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Abort and remove one listener. Returns whether it was bound.
    pub fn detach(&self, kind: BindingKind) -> bool {
        let removed = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&kind);
        match removed {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort and remove every listener.
    pub fn detach_all(&self) {
        let drained: Vec<_> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, handle) in drained {
            handle.abort();
        }
    }

    pub fn is_bound(&self, kind: BindingKind) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&kind)
    }

    pub fn is_empty(&self) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }
}

impl Drop for EventBindings {
    fn drop(&mut self) {
        self.detach_all();
    }
}

/// One managed device.
pub struct DeviceSession {
    id: String,
    kind: DeviceKind,
    driver: Arc<dyn SensorDriver>,
    state: watch::Sender<SessionState>,
    deadline: Mutex<Option<Instant>>,
    bindings: EventBindings,
    cancel: CancellationToken,
}

impl fmt::Debug for DeviceSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceSession")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("deadline", &self.deadline())
            .finish_non_exhaustive()
    }
}

impl DeviceSession {
    /// Create a session in the `Discovered` state.
    pub fn new(driver: Arc<dyn SensorDriver>, cancel: CancellationToken) -> Self {
        let (state, _) = watch::channel(SessionState::Discovered);
        Self {
            id: driver.id().to_string(),
            kind: driver.kind(),
            driver,
            state,
            deadline: Mutex::new(None),
            bindings: EventBindings::new(),
            cancel,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> DeviceKind {
        self.kind
    }

    pub fn driver(&self) -> &Arc<dyn SensorDriver> {
        &self.driver
    }

    pub fn bindings(&self) -> &EventBindings {
        &self.bindings
    }

    /// Cancelled when this session must stop.
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Observe state transitions.
    pub fn watch(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub(crate) fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(device = %self.id, "{} -> {}", previous, next);
        }
    }

    /// Arm the setup deadline `after` from now and return it.
    pub(crate) fn arm_deadline(&self, after: Duration) -> Instant {
        let at = Instant::now() + after;
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner) = Some(at);
        at
    }

    /// Disarm the setup deadline. Returns the deadline if it was armed.
    pub(crate) fn disarm_deadline(&self) -> Option<Instant> {
        self.deadline
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Pending setup deadline, if armed.
    pub fn deadline(&self) -> Option<Instant> {
        *self.deadline.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
