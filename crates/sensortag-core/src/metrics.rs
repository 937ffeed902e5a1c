//! Supervisor statistics.
//!
//! Lock-free counters updated by the supervisor, the session tasks and the
//! telemetry adapter, and a serializable snapshot for logging.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time copy of [`SupervisorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub admitted: u64,
    pub rejected: u64,
    pub streaming: u64,
    pub timed_out: u64,
    pub setup_failures: u64,
    pub disconnects: u64,
    pub reconnects: u64,
    pub samples_written: u64,
    pub samples_dropped: u64,
}

/// Counters shared by every session of one supervisor.
#[derive(Debug, Default)]
pub struct SupervisorStats {
    admitted: AtomicU64,
    rejected: AtomicU64,
    streaming: AtomicU64,
    timed_out: AtomicU64,
    setup_failures: AtomicU64,
    disconnects: AtomicU64,
    reconnects: AtomicU64,
    samples_written: AtomicU64,
    samples_dropped: AtomicU64,
}

impl SupervisorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// A session completed its capture program.
    pub fn record_streaming(&self) {
        self.streaming.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_timed_out(&self) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_setup_failure(&self) {
        self.setup_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// A driver reported a disconnect, during setup or while streaming.
    pub fn record_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_written(&self) {
        self.samples_written.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sample_dropped(&self) {
        self.samples_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            streaming: self.streaming.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            setup_failures: self.setup_failures.load(Ordering::Relaxed),
            disconnects: self.disconnects.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
            samples_written: self.samples_written.load(Ordering::Relaxed),
            samples_dropped: self.samples_dropped.load(Ordering::Relaxed),
        }
    }
}
