//! CC2650 SensorTag driver over btleplug.
//!
//! [`SensorTag`] implements [`SensorDriver`] for a real peripheral: it writes
//! the TI sensor config and period characteristics, subscribes to data
//! notifications and turns them into [`DriverEvent`]s.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Characteristic, Peripheral as _, WriteType};
use btleplug::platform::{Adapter, Peripheral};
use futures::StreamExt;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sensortag_types::uuid::{
    BATTERY_LEVEL, MOVEMENT_ACCEL_XYZ, MOVEMENT_CONFIG, MOVEMENT_WAKE_ON_MOTION, SENSOR_ENABLE,
    capability_for_data, characteristics,
};
use sensortag_types::{AccelerometerRange, Capability, CapabilityReading, DeviceKind};

use crate::error::{Error, Result};
use crate::events::{DriverEvent, DriverEventReceiver, EventDispatcher};
use crate::traits::SensorDriver;
use crate::util::{create_identifier, format_peripheral_id};

/// Default timeout for BLE characteristic read operations.
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE characteristic write operations.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for BLE connection operations.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default timeout for service discovery.
const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest period the CC2650 firmware accepts, in 10 ms ticks.
pub const MIN_PERIOD_TICKS: u8 = 10;

/// Longest period the CC2650 firmware accepts, in 10 ms ticks.
pub const MAX_PERIOD_TICKS: u8 = 255;

/// Timeouts applied to individual BLE operations.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Timeout for establishing a BLE connection.
    pub connection_timeout: Duration,
    /// Timeout for BLE read operations.
    pub read_timeout: Duration,
    /// Timeout for BLE write operations.
    pub write_timeout: Duration,
    /// Timeout for service discovery after connection.
    pub discovery_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connection_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }
}

impl ConnectionConfig {
    /// Set the connection timeout.
    #[must_use]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }

    /// Set the read timeout.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the write timeout.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }
}

/// Convert a reporting period into CC2650 period ticks (10 ms each),
/// clamped into the range the firmware accepts.
pub fn period_ticks(period: Duration) -> u8 {
    let ticks = period.as_millis() / 10;
    ticks.clamp(u128::from(MIN_PERIOD_TICKS), u128::from(MAX_PERIOD_TICKS)) as u8
}

/// A discovered CC2650 SensorTag.
///
/// The handle is created unconnected from a discovered peripheral; the
/// session supervisor calls [`SensorDriver::connect_and_set_up`] on it.
/// A handle can be connected again after a disconnect.
pub struct SensorTag {
    /// Kept so adapter events (disconnects) can be watched.
    adapter: Adapter,
    peripheral: Peripheral,
    id: String,
    name: Option<String>,
    kind: DeviceKind,
    config: ConnectionConfig,
    accel_range: AccelerometerRange,
    /// Built after service discovery.
    characteristics_cache: RwLock<HashMap<Uuid, Characteristic>>,
    /// Notification pump and disconnect watcher of the current connection.
    tasks: Mutex<Vec<JoinHandle<()>>>,
    events: EventDispatcher,
    /// Last value written to the movement config characteristic.
    movement_config: AtomicU16,
}

impl std::fmt::Debug for SensorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SensorTag")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

impl SensorTag {
    /// Create a driver handle from a discovered peripheral.
    ///
    /// This does not connect; it only reads the advertised properties to
    /// derive the identifier and name.
    pub async fn from_peripheral(adapter: Adapter, peripheral: Peripheral) -> Result<Self> {
        Self::from_peripheral_with_config(adapter, peripheral, ConnectionConfig::default()).await
    }

    /// Create a driver handle with custom BLE timeouts.
    pub async fn from_peripheral_with_config(
        adapter: Adapter,
        peripheral: Peripheral,
        config: ConnectionConfig,
    ) -> Result<Self> {
        let properties = peripheral.properties().await?;
        let name = properties.as_ref().and_then(|p| p.local_name.clone());

        // On macOS the address is 00:00:00:00:00:00, so the peripheral ID is used instead
        let id = properties
            .as_ref()
            .map(|p| create_identifier(&p.address.to_string(), &peripheral.id()))
            .unwrap_or_else(|| format_peripheral_id(&peripheral.id()));

        let kind = name
            .as_deref()
            .and_then(DeviceKind::from_name)
            .unwrap_or_default();

        Ok(Self {
            adapter,
            peripheral,
            id,
            name,
            kind,
            config,
            accel_range: AccelerometerRange::default(),
            characteristics_cache: RwLock::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            events: EventDispatcher::default(),
            movement_config: AtomicU16::new(0),
        })
    }

    fn abort_tasks(&self) {
        let mut tasks = self.tasks.lock().unwrap_or_else(PoisonError::into_inner);
        for handle in tasks.drain(..) {
            handle.abort();
        }
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        self.tasks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(handle);
    }

    async fn find_characteristic(&self, uuid: Uuid) -> Result<Characteristic> {
        let cache = self.characteristics_cache.read().await;
        if cache.is_empty() {
            return Err(Error::NotConnected);
        }
        cache.get(&uuid).cloned().ok_or_else(|| {
            Error::characteristic_not_found(uuid.to_string(), self.peripheral.services().len())
        })
    }

    async fn read_characteristic(&self, uuid: Uuid) -> Result<Vec<u8>> {
        let characteristic = self.find_characteristic(uuid).await?;
        let data = timeout(self.config.read_timeout, self.peripheral.read(&characteristic))
            .await
            .map_err(|_| Error::timeout(format!("read characteristic {}", uuid), self.config.read_timeout))??;
        Ok(data)
    }

    async fn write_characteristic(&self, uuid: Uuid, data: &[u8]) -> Result<()> {
        let characteristic = self.find_characteristic(uuid).await?;
        timeout(
            self.config.write_timeout,
            self.peripheral
                .write(&characteristic, data, WriteType::WithResponse),
        )
        .await
        .map_err(|_| Error::timeout(format!("write characteristic {}", uuid), self.config.write_timeout))??;
        Ok(())
    }

    async fn write_movement_config(&self, bits: u16) -> Result<()> {
        let value = self.movement_config.fetch_or(bits, Ordering::SeqCst) | bits;
        debug!("Writing movement config {:#06x}", value);
        self.write_characteristic(MOVEMENT_CONFIG, &value.to_le_bytes())
            .await
    }

    /// Start the tasks that turn notifications and adapter events into
    /// driver events for the current connection.
    async fn spawn_event_tasks(&self) -> Result<()> {
        let mut notifications = self.peripheral.notifications().await?;
        let events = self.events.clone();
        let range = self.accel_range;
        let device = self.id.clone();
        self.track_task(tokio::spawn(async move {
            while let Some(notification) = notifications.next().await {
                let Some(capability) = capability_for_data(notification.uuid) else {
                    continue;
                };
                match CapabilityReading::parse_with_range(capability, &notification.value, range) {
                    Ok(reading) => events.send(DriverEvent::Reading(reading)),
                    Err(e) => warn!(device = %device, "Dropping {} notification: {}", capability, e),
                }
            }
        }));

        let mut adapter_events = self.adapter.events().await?;
        let peripheral_id = self.peripheral.id();
        let events = self.events.clone();
        let device = self.id.clone();
        self.track_task(tokio::spawn(async move {
            while let Some(event) = adapter_events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event
                    && id == peripheral_id
                {
                    info!(device = %device, "Link lost");
                    events.send(DriverEvent::Disconnected);
                    break;
                }
            }
        }));

        Ok(())
    }
}

#[async_trait]
impl SensorDriver for SensorTag {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    #[tracing::instrument(level = "info", skip(self), fields(device = %self.id))]
    async fn connect_and_set_up(&self) -> Result<()> {
        self.abort_tasks();
        self.movement_config.store(0, Ordering::SeqCst);

        info!("Connecting to device...");
        timeout(self.config.connection_timeout, self.peripheral.connect())
            .await
            .map_err(|_| Error::timeout("connect to device", self.config.connection_timeout))??;

        info!("Discovering services...");
        timeout(self.config.discovery_timeout, self.peripheral.discover_services())
            .await
            .map_err(|_| Error::timeout("discover services", self.config.discovery_timeout))??;

        let services = self.peripheral.services();
        let mut cache = HashMap::new();
        for service in &services {
            debug!("  Service: {}", service.uuid);
            for char in &service.characteristics {
                cache.insert(char.uuid, char.clone());
            }
        }
        debug!(
            "Cached {} characteristics from {} services",
            cache.len(),
            services.len()
        );
        *self.characteristics_cache.write().await = cache;

        self.spawn_event_tasks().await
    }

    #[tracing::instrument(level = "info", skip(self), fields(device = %self.id))]
    async fn disconnect(&self) -> Result<()> {
        info!("Disconnecting from device...");
        self.abort_tasks();
        self.characteristics_cache.write().await.clear();
        self.peripheral.disconnect().await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.id))]
    async fn enable(&self, capability: Capability) -> Result<()> {
        match capability {
            // Battery level is always on
            Capability::BatteryLevel => Ok(()),
            Capability::Accelerometer => {
                self.write_movement_config(MOVEMENT_ACCEL_XYZ | self.accel_range.config_bits())
                    .await
            }
            _ => {
                let config = characteristics(capability).config.ok_or_else(|| {
                    Error::invalid_config(format!("{} has no config characteristic", capability))
                })?;
                self.write_characteristic(config, &[SENSOR_ENABLE]).await
            }
        }
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.id))]
    async fn set_period(&self, capability: Capability, period: Duration) -> Result<()> {
        let uuid = characteristics(capability).period.ok_or_else(|| {
            Error::invalid_config(format!("{} has no period characteristic", capability))
        })?;
        let ticks = period_ticks(period);
        debug!("{} period {:?} -> {} ticks", capability, period, ticks);
        self.write_characteristic(uuid, &[ticks]).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.id))]
    async fn notify(&self, capability: Capability) -> Result<()> {
        let characteristic = self
            .find_characteristic(characteristics(capability).data)
            .await?;
        timeout(
            self.config.write_timeout,
            self.peripheral.subscribe(&characteristic),
        )
        .await
        .map_err(|_| Error::timeout(format!("subscribe to {}", capability), self.config.write_timeout))??;
        Ok(())
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.id))]
    async fn enable_wake_on_motion(&self) -> Result<()> {
        self.write_movement_config(MOVEMENT_WAKE_ON_MOTION).await
    }

    #[tracing::instrument(level = "debug", skip(self), fields(device = %self.id))]
    async fn read_battery_level(&self) -> Result<u8> {
        let data = self.read_characteristic(BATTERY_LEVEL).await?;
        match CapabilityReading::parse(Capability::BatteryLevel, &data)? {
            CapabilityReading::BatteryLevel { level } => Ok(level),
            other => Err(Error::InvalidData(format!(
                "unexpected battery reading {:?}",
                other
            ))),
        }
    }

    fn subscribe(&self) -> DriverEventReceiver {
        self.events.subscribe()
    }
}

impl Drop for SensorTag {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_period_ticks_standard_program() {
        assert_eq!(period_ticks(Duration::from_millis(2000)), 200);
        assert_eq!(period_ticks(Duration::from_millis(200)), 20);
    }

    #[test]
    fn test_period_ticks_clamped() {
        assert_eq!(period_ticks(Duration::from_millis(10_000)), MAX_PERIOD_TICKS);
        assert_eq!(period_ticks(Duration::from_millis(50)), MIN_PERIOD_TICKS);
        assert_eq!(period_ticks(Duration::ZERO), MIN_PERIOD_TICKS);
    }

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::default()
            .connection_timeout(Duration::from_secs(5))
            .read_timeout(Duration::from_secs(2))
            .write_timeout(Duration::from_secs(3));
        assert_eq!(config.connection_timeout, Duration::from_secs(5));
        assert_eq!(config.read_timeout, Duration::from_secs(2));
        assert_eq!(config.write_timeout, Duration::from_secs(3));
        assert_eq!(config.discovery_timeout, DEFAULT_DISCOVERY_TIMEOUT);
    }
}
