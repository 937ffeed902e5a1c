//! Trait abstractions for SensorTag driver operations.
//!
//! This module provides the [`SensorDriver`] trait that abstracts over the
//! real Bluetooth driver and the mock driver used in tests. The session
//! lifecycle code only ever talks to a driver through this trait.

use std::time::Duration;

use async_trait::async_trait;

use sensortag_types::{Capability, DeviceKind};

use crate::error::Result;
use crate::events::DriverEventReceiver;

/// Operations a device driver handle must provide.
///
/// One handle represents one physical peripheral. Handles are shared as
/// `Arc<dyn SensorDriver>` between the supervisor and the session task, so
/// every method takes `&self`.
///
/// # Example
///
/// ```ignore
/// use sensortag_core::{SensorDriver, Result};
/// use sensortag_types::Capability;
///
/// async fn start_humidity<D: SensorDriver + ?Sized>(driver: &D) -> Result<()> {
///     driver.enable(Capability::Humidity).await?;
///     driver.notify(Capability::Humidity).await
/// }
/// ```
#[async_trait]
pub trait SensorDriver: Send + Sync {
    // --- Identity ---

    /// Stable device identifier.
    ///
    /// On Linux/Windows this is the MAC address.
    /// On macOS this is a UUID since MAC addresses are not exposed.
    fn id(&self) -> &str;

    /// Device kind, used in series names.
    fn kind(&self) -> DeviceKind;

    /// Advertised local name, if known.
    fn name(&self) -> Option<&str>;

    // --- Connection Management ---

    /// Connect, discover services and characteristics.
    async fn connect_and_set_up(&self) -> Result<()>;

    /// Disconnect from the device.
    async fn disconnect(&self) -> Result<()>;

    /// Whether the transport currently reports a connection.
    async fn is_connected(&self) -> bool;

    // --- Capture Configuration ---

    /// Switch a capability's sensor on.
    async fn enable(&self, capability: Capability) -> Result<()>;

    /// Set a capability's reporting period. Drivers clamp the period into
    /// the range their hardware accepts.
    async fn set_period(&self, capability: Capability, period: Duration) -> Result<()>;

    /// Subscribe to value notifications of a capability.
    async fn notify(&self, capability: Capability) -> Result<()>;

    /// Arm wake-on-motion on the movement sensor.
    async fn enable_wake_on_motion(&self) -> Result<()>;

    /// Read the battery level (0-100).
    async fn read_battery_level(&self) -> Result<u8>;

    // --- Events ---

    /// Subscribe to capability readings and the disconnect notification.
    fn subscribe(&self) -> DriverEventReceiver;
}
