//! Mock driver, discoverer and sink for testing.
//!
//! These let the session lifecycle be exercised without BLE hardware or a
//! time-series store.
//!
//! # Features
//!
//! - **Operation log**: every driver call is recorded in order
//! - **Latency simulation**: slow or never-returning connects and operations
//! - **Failure injection**: fail one capture operation, or report a
//!   disconnect while it is in flight or just as it completes
//! - **Event injection**: emit readings and disconnects on demand

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, mpsc};

use sensortag_types::{Capability, CapabilityReading, DeviceKind, Metric};

use crate::discovery::Discoverer;
use crate::error::{Error, Result};
use crate::events::{DriverEvent, DriverEventReceiver, EventDispatcher};
use crate::sequencer::DriverOp;
use crate::sink::{Sample, SinkError, TelemetrySink};
use crate::traits::SensorDriver;

/// One recorded call on a [`MockSensorTag`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverCall {
    ConnectAndSetUp,
    Op(DriverOp),
    Disconnect,
}

/// A mock SensorTag driver.
pub struct MockSensorTag {
    id: String,
    name: Option<String>,
    kind: DeviceKind,
    connected: AtomicBool,
    battery: u8,
    connect_latency: Duration,
    op_latency: Duration,
    hang_on_connect: bool,
    fail_connect: bool,
    fail_on: Option<DriverOp>,
    disconnect_on: Option<DriverOp>,
    drop_link_after: Option<DriverOp>,
    stall_on: Option<DriverOp>,
    disconnect_fired: AtomicBool,
    fail_disconnect: bool,
    calls: Mutex<Vec<DriverCall>>,
    call_made: Notify,
    events: EventDispatcher,
}

impl std::fmt::Debug for MockSensorTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockSensorTag")
            .field("id", &self.id)
            .field("connected", &self.connected.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl MockSensorTag {
    pub fn builder() -> MockSensorTagBuilder {
        MockSensorTagBuilder::new()
    }

    /// Every call made so far, in order.
    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Capture operations issued so far, in order.
    pub fn ops(&self) -> Vec<DriverOp> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                DriverCall::Op(op) => Some(op),
                _ => None,
            })
            .collect()
    }

    pub fn connect_count(&self) -> usize {
        self.count(DriverCall::ConnectAndSetUp)
    }

    pub fn disconnect_count(&self) -> usize {
        self.count(DriverCall::Disconnect)
    }

    fn count(&self, call: DriverCall) -> usize {
        self.calls().into_iter().filter(|c| *c == call).count()
    }

    /// Wait until at least `count` calls have been recorded.
    pub async fn wait_for_calls(&self, count: usize) -> Vec<DriverCall> {
        loop {
            let notified = self.call_made.notified();
            let calls = self.calls();
            if calls.len() >= count {
                return calls;
            }
            notified.await;
        }
    }

    /// Emit a decoded reading, as a notification would.
    pub fn emit(&self, reading: CapabilityReading) {
        self.events.send(DriverEvent::Reading(reading));
    }

    /// Drop the link and emit the disconnect event.
    pub fn disconnect_now(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.events.send(DriverEvent::Disconnected);
    }

    fn record(&self, call: DriverCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        self.call_made.notify_waiters();
    }

    async fn op(&self, op: DriverOp) -> Result<()> {
        self.record(DriverCall::Op(op));
        if !self.op_latency.is_zero() {
            tokio::time::sleep(self.op_latency).await;
        }

        if self.disconnect_on == Some(op) && !self.disconnect_fired.swap(true, Ordering::SeqCst) {
            self.disconnect_now();
            // The call never completes once the link is gone
            std::future::pending::<()>().await;
        }
        if self.stall_on == Some(op) {
            std::future::pending::<()>().await;
        }
        if self.fail_on == Some(op) {
            return Err(Error::InvalidData(format!("mock failure on {}", op)));
        }
        if self.drop_link_after == Some(op) && !self.disconnect_fired.swap(true, Ordering::SeqCst) {
            self.disconnect_now();
        }
        Ok(())
    }
}

#[async_trait]
impl SensorDriver for MockSensorTag {
    fn id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> DeviceKind {
        self.kind
    }

    fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    async fn connect_and_set_up(&self) -> Result<()> {
        self.record(DriverCall::ConnectAndSetUp);
        if self.hang_on_connect {
            std::future::pending::<()>().await;
        }
        if !self.connect_latency.is_zero() {
            tokio::time::sleep(self.connect_latency).await;
        }
        if self.fail_connect {
            return Err(Error::timeout("connect to device", self.connect_latency));
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.record(DriverCall::Disconnect);
        self.connected.store(false, Ordering::SeqCst);
        if self.fail_disconnect {
            return Err(Error::NotConnected);
        }
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn enable(&self, capability: Capability) -> Result<()> {
        self.op(DriverOp::Enable(capability)).await
    }

    async fn set_period(&self, capability: Capability, period: Duration) -> Result<()> {
        self.op(DriverOp::SetPeriod(capability, period)).await
    }

    async fn notify(&self, capability: Capability) -> Result<()> {
        self.op(DriverOp::Notify(capability)).await
    }

    async fn enable_wake_on_motion(&self) -> Result<()> {
        self.op(DriverOp::EnableWakeOnMotion).await
    }

    async fn read_battery_level(&self) -> Result<u8> {
        self.op(DriverOp::ReadBatteryLevel).await?;
        Ok(self.battery)
    }

    fn subscribe(&self) -> DriverEventReceiver {
        self.events.subscribe()
    }
}

/// Builder for creating mock drivers with custom behavior.
#[derive(Debug, Clone)]
pub struct MockSensorTagBuilder {
    id: String,
    name: Option<String>,
    battery: u8,
    connect_latency: Duration,
    op_latency: Duration,
    hang_on_connect: bool,
    fail_connect: bool,
    fail_on: Option<DriverOp>,
    disconnect_on: Option<DriverOp>,
    drop_link_after: Option<DriverOp>,
    stall_on: Option<DriverOp>,
    fail_disconnect: bool,
}

impl Default for MockSensorTagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensorTagBuilder {
    pub fn new() -> Self {
        Self {
            id: "B0:B4:48:00:00:01".to_string(),
            name: Some("CC2650 SensorTag".to_string()),
            battery: 90,
            connect_latency: Duration::ZERO,
            op_latency: Duration::ZERO,
            hang_on_connect: false,
            fail_connect: false,
            fail_on: None,
            disconnect_on: None,
            drop_link_after: None,
            stall_on: None,
            fail_disconnect: false,
        }
    }

    #[must_use]
    pub fn id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    #[must_use]
    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    #[must_use]
    pub fn battery(mut self, level: u8) -> Self {
        self.battery = level;
        self
    }

    /// Delay before `connect_and_set_up` returns.
    #[must_use]
    pub fn connect_latency(mut self, latency: Duration) -> Self {
        self.connect_latency = latency;
        self
    }

    /// Delay before every capture operation returns.
    #[must_use]
    pub fn op_latency(mut self, latency: Duration) -> Self {
        self.op_latency = latency;
        self
    }

    /// `connect_and_set_up` never returns.
    #[must_use]
    pub fn hang_on_connect(mut self) -> Self {
        self.hang_on_connect = true;
        self
    }

    #[must_use]
    pub fn fail_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Fail every time `op` is issued.
    #[must_use]
    pub fn fail_on(mut self, op: DriverOp) -> Self {
        self.fail_on = Some(op);
        self
    }

    /// The first time `op` is issued, drop the link and never return.
    #[must_use]
    pub fn disconnect_on(mut self, op: DriverOp) -> Self {
        self.disconnect_on = Some(op);
        self
    }

    /// The first time `op` is issued, drop the link but still report success.
    #[must_use]
    pub fn drop_link_after(mut self, op: DriverOp) -> Self {
        self.drop_link_after = Some(op);
        self
    }

    /// `op` never returns.
    #[must_use]
    pub fn stall_on(mut self, op: DriverOp) -> Self {
        self.stall_on = Some(op);
        self
    }

    #[must_use]
    pub fn fail_disconnect(mut self) -> Self {
        self.fail_disconnect = true;
        self
    }

    pub fn build(self) -> MockSensorTag {
        MockSensorTag {
            id: self.id,
            name: self.name,
            kind: DeviceKind::Cc2650SensorTag,
            connected: AtomicBool::new(false),
            battery: self.battery,
            connect_latency: self.connect_latency,
            op_latency: self.op_latency,
            hang_on_connect: self.hang_on_connect,
            fail_connect: self.fail_connect,
            fail_on: self.fail_on,
            disconnect_on: self.disconnect_on,
            drop_link_after: self.drop_link_after,
            stall_on: self.stall_on,
            disconnect_fired: AtomicBool::new(false),
            fail_disconnect: self.fail_disconnect,
            calls: Mutex::new(Vec::new()),
            call_made: Notify::new(),
            events: EventDispatcher::default(),
        }
    }
}

type Discovery = Result<Arc<dyn SensorDriver>>;

/// A discoverer fed by hand through a [`DiscoveryFeed`].
///
/// `discover` waits until the feed provides the next result.
pub struct MockDiscoverer {
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Discovery>>,
    calls: AtomicUsize,
}

/// Feeds results into a [`MockDiscoverer`].
#[derive(Clone)]
pub struct DiscoveryFeed {
    tx: mpsc::UnboundedSender<Discovery>,
}

impl MockDiscoverer {
    pub fn new() -> (Self, DiscoveryFeed) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                rx: tokio::sync::Mutex::new(rx),
                calls: AtomicUsize::new(0),
            },
            DiscoveryFeed { tx },
        )
    }

    /// Number of `discover` calls so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl DiscoveryFeed {
    pub fn yield_driver(&self, driver: Arc<dyn SensorDriver>) {
        let _ = self.tx.send(Ok(driver));
    }

    pub fn fail(&self, message: &str) {
        let _ = self.tx.send(Err(Error::InvalidData(message.to_string())));
    }
}

#[async_trait]
impl Discoverer for MockDiscoverer {
    async fn discover(&self) -> Result<Arc<dyn SensorDriver>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.rx.lock().await.recv().await;
        match next {
            Some(result) => result,
            // Feed dropped: nothing more will ever be discovered
            None => std::future::pending().await,
        }
    }
}

/// A sink that records samples in memory.
#[derive(Debug, Default)]
pub struct MockSink {
    samples: Mutex<Vec<Sample>>,
    attempts: AtomicUsize,
    databases: Mutex<Vec<String>>,
    ensure_calls: AtomicUsize,
    unreachable: bool,
    fail_metrics: HashSet<Metric>,
    fail_once: Mutex<HashSet<Metric>>,
    written: Notify,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every write and every `ensure_database` fails as if the store were down.
    #[must_use]
    pub fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    /// Every write of `metric` fails.
    #[must_use]
    pub fn fail_metric(mut self, metric: Metric) -> Self {
        self.fail_metrics.insert(metric);
        self
    }

    /// The next write of `metric` fails.
    #[must_use]
    pub fn fail_next(self, metric: Metric) -> Self {
        self.fail_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(metric);
        self
    }

    /// Samples accepted so far, in write order.
    pub fn samples(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Accepted samples of one metric.
    pub fn samples_of(&self, metric: Metric) -> Vec<Sample> {
        self.samples()
            .into_iter()
            .filter(|s| s.metric == metric)
            .collect()
    }

    /// Write attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn ensure_calls(&self) -> usize {
        self.ensure_calls.load(Ordering::SeqCst)
    }

    pub fn databases(&self) -> Vec<String> {
        self.databases
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait until at least `count` samples have been accepted.
    pub async fn wait_for_samples(&self, count: usize) -> Vec<Sample> {
        loop {
            let notified = self.written.notified();
            let samples = self.samples();
            if samples.len() >= count {
                return samples;
            }
            notified.await;
        }
    }

    fn should_fail(&self, metric: Metric) -> bool {
        if self.unreachable || self.fail_metrics.contains(&metric) {
            return true;
        }
        self.fail_once
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&metric)
    }
}

#[async_trait]
impl TelemetrySink for MockSink {
    async fn ensure_database(&self, name: &str) -> std::result::Result<(), SinkError> {
        self.ensure_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable {
            return Err(SinkError::Unavailable("connection refused".to_string()));
        }
        let mut databases = self.databases.lock().unwrap_or_else(PoisonError::into_inner);
        if !databases.iter().any(|db| db == name) {
            databases.push(name.to_string());
        }
        Ok(())
    }

    async fn write(&self, sample: &Sample) -> std::result::Result<(), SinkError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.should_fail(sample.metric) {
            return Err(SinkError::Unavailable(format!(
                "mock write failure for {}",
                sample.series_name()
            )));
        }
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sample.clone());
        self.written.notify_waiters();
        Ok(())
    }
}
