//! Session lifecycle manager for TI CC2650 SensorTags.
//!
//! This crate discovers SensorTags over Bluetooth Low Energy, connects to
//! each one, runs a fixed capture program against it and forwards every
//! notification it emits to a telemetry sink.
//!
//! # Features
//!
//! - **Continuous discovery**: keep scanning while other devices are set up
//! - **Bounded setup**: connect and configure under a single deadline
//! - **Ordered capture program**: every sensor enabled, periodized and
//!   subscribed in a fixed order
//! - **Clean teardown**: listeners detached and the device released on
//!   timeout, failure, disconnect or shutdown
//! - **Telemetry forwarding**: one sample per stored field, failures dropped
//!
//! # Lifecycle
//!
//! | State | Meaning |
//! |-------|---------|
//! | `Discovered` | Admitted by the supervisor |
//! | `Connecting` | Connect and service discovery in progress |
//! | `Configuring` | Capture program running |
//! | `Streaming` | Notifications forwarded to the sink |
//! | `Disconnected` | Torn down, identifier free for rediscovery |
//!
//! # Platform Differences
//!
//! Devices are identified by their MAC address on Linux and Windows. On
//! macOS CoreBluetooth hides the address, so the peripheral UUID is used
//! instead. See [`create_identifier`].
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use sensortag_core::{
//!     BleDiscoverer, DiscoveryLoop, MockSink, SessionSupervisor, SupervisorConfig, get_adapter,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let adapter = get_adapter(0).await?;
//!     let discoverer = Arc::new(BleDiscoverer::new(adapter).await?);
//!
//!     let supervisor = SessionSupervisor::new(Arc::new(MockSink::new()), SupervisorConfig::default());
//!     let discovery = tokio::spawn(DiscoveryLoop::new(discoverer, Arc::clone(&supervisor)).run());
//!
//!     tokio::signal::ctrl_c().await?;
//!     let stats = supervisor.shutdown().await;
//!     discovery.await?;
//!     println!("{} samples written", stats.samples_written);
//!     Ok(())
//! }
//! ```

pub mod device;
pub mod discovery;
pub mod error;
pub mod events;
pub mod metrics;
pub mod mock;
pub mod retry;
pub mod scan;
pub mod sequencer;
pub mod session;
pub mod sink;
pub mod supervisor;
pub mod traits;
pub mod util;

pub use sensortag_types::types;
pub use sensortag_types::uuid;

// Core exports
pub use device::{ConnectionConfig, SensorTag, period_ticks};
pub use error::{Error, Result};
pub use traits::SensorDriver;

pub use discovery::{DEFAULT_DISCOVERY_PAUSE, Discoverer, DiscoveryLoop};
pub use events::{DriverEvent, DriverEventReceiver, DriverEventSender, EventDispatcher};
pub use metrics::{StatsSnapshot, SupervisorStats};
pub use mock::{
    DiscoveryFeed, DriverCall, MockDiscoverer, MockSensorTag, MockSensorTagBuilder, MockSink,
};
pub use retry::{RetryConfig, Retryable, with_retry};
pub use scan::{BleDiscoverer, NameFilter, get_adapter};
pub use sequencer::{CapabilityStep, CaptureProgram, CaptureSequencer, DriverOp};
pub use session::{BindingKind, DeviceSession, EventBindings, SessionState};
pub use sink::{Sample, SinkError, TelemetryAdapter, TelemetrySink};
pub use supervisor::{
    Admission, ReconnectPolicy, RejectReason, SessionSupervisor, SupervisorConfig, TeardownReason,
};
pub use util::{create_identifier, format_peripheral_id};

// Re-export from sensortag-types
pub use sensortag_types::uuid as uuids;
pub use sensortag_types::{
    AccelerometerRange, Capability, CapabilityReading, DeviceKind, Metric, ParseError, series_name,
};
