//! SensorTag discovery over btleplug.
//!
//! [`BleDiscoverer`] keeps the adapter scanning and watches its event
//! stream. Every discovered or updated peripheral that advertises as a
//! SensorTag and is not connected yet is turned into a [`SensorTag`] driver.
//! If the event stream ends (adapter reset, bluetoothd restart) it is
//! subscribed again and scanning restarted.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::{Stream, StreamExt};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use sensortag_types::DeviceKind;

use crate::device::{ConnectionConfig, SensorTag};
use crate::discovery::Discoverer;
use crate::error::{Error, Result};
use crate::traits::SensorDriver;

type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;
type EventStream = BoxStream<CentralEvent>;

/// Next item of `events`. When the stream is exhausted it is replaced with
/// the one returned by `restart` and [`Error::ScanInterrupted`] is returned,
/// so the caller backs off before reading again.
async fn next_event<T, F, Fut>(events: &mut BoxStream<T>, restart: F) -> Result<T>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<BoxStream<T>>>,
{
    if let Some(event) = events.next().await {
        return Ok(event);
    }
    warn!("Adapter event stream ended, restarting scan");
    *events = restart().await?;
    Err(Error::ScanInterrupted)
}

/// Get the Bluetooth adapter at `index` (0 is the first adapter).
pub async fn get_adapter(index: usize) -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().nth(index).ok_or(Error::NoAdapter)
}

/// Which advertised names count as SensorTags.
#[derive(Debug, Clone, Default)]
pub enum NameFilter {
    /// Names recognised by [`DeviceKind::from_name`].
    #[default]
    SensorTag,
    /// Names containing this text, case-insensitive.
    Contains(String),
}

impl NameFilter {
    pub fn matches(&self, name: &str) -> bool {
        match self {
            NameFilter::SensorTag => DeviceKind::from_name(name).is_some(),
            NameFilter::Contains(text) => name.to_lowercase().contains(&text.to_lowercase()),
        }
    }
}

/// Discovers SensorTags from a continuously scanning adapter.
pub struct BleDiscoverer {
    adapter: Adapter,
    events: Mutex<EventStream>,
    filter: NameFilter,
    config: ConnectionConfig,
}

impl BleDiscoverer {
    /// Start scanning on `adapter`.
    pub async fn new(adapter: Adapter) -> Result<Self> {
        Self::with_options(adapter, NameFilter::default(), ConnectionConfig::default()).await
    }

    /// Start scanning with a custom name filter and driver timeouts.
    pub async fn with_options(
        adapter: Adapter,
        filter: NameFilter,
        config: ConnectionConfig,
    ) -> Result<Self> {
        // Subscribe before scanning so no discovery is missed
        let events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;
        info!("Scanning for SensorTags...");

        Ok(Self {
            adapter,
            events: Mutex::new(events),
            filter,
            config,
        })
    }

    async fn restart_scan(&self) -> Result<EventStream> {
        let events = self.adapter.events().await?;
        self.adapter.start_scan(ScanFilter::default()).await?;
        Ok(events)
    }

    /// Stop scanning.
    pub async fn stop(&self) -> Result<()> {
        self.adapter.stop_scan().await?;
        Ok(())
    }

    async fn eligible(&self, peripheral: &Peripheral) -> Result<bool> {
        let Some(properties) = peripheral.properties().await? else {
            return Ok(false);
        };
        if !self.is_sensortag(&properties) {
            return Ok(false);
        }
        Ok(!peripheral.is_connected().await?)
    }

    fn is_sensortag(&self, properties: &PeripheralProperties) -> bool {
        properties
            .local_name
            .as_deref()
            .is_some_and(|name| self.filter.matches(name))
    }
}

#[async_trait]
impl Discoverer for BleDiscoverer {
    async fn discover(&self) -> Result<Arc<dyn SensorDriver>> {
        let mut events = self.events.lock().await;
        loop {
            let event = next_event(&mut *events, || self.restart_scan()).await?;
            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let peripheral = match self.adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    debug!("Peripheral {:?} vanished: {}", id, e);
                    continue;
                }
            };
            match self.eligible(&peripheral).await {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    debug!("Skipping peripheral {:?}: {}", id, e);
                    continue;
                }
            }

            let driver = SensorTag::from_peripheral_with_config(
                self.adapter.clone(),
                peripheral,
                self.config.clone(),
            )
            .await?;
            debug!(device = %driver.id(), name = ?driver.name(), "Discovered SensorTag");
            return Ok(Arc::new(driver));
        }
    }
}
