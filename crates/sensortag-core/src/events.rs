//! Driver event channel.
//!
//! Every driver owns one broadcast channel carrying decoded capability
//! readings and the transport disconnect notification.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use sensortag_types::CapabilityReading;

/// Events emitted by a driver handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DriverEvent {
    /// A notification was received and decoded.
    Reading(CapabilityReading),
    /// The transport reported that the link is gone.
    Disconnected,
}

/// Sender for driver events.
pub type DriverEventSender = broadcast::Sender<DriverEvent>;

/// Receiver for driver events.
pub type DriverEventReceiver = broadcast::Receiver<DriverEvent>;

/// Default capacity of a driver event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Broadcasts driver events to any number of subscribers.
#[derive(Debug, Clone)]
pub struct EventDispatcher {
    sender: DriverEventSender,
}

impl EventDispatcher {
    /// Create a new event dispatcher.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> DriverEventReceiver {
        self.sender.subscribe()
    }

    /// Send an event.
    pub fn send(&self, event: DriverEvent) {
        // Ignore error if no receivers
        let _ = self.sender.send(event);
    }

    /// Get the number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
