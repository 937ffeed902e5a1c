//! Capture program and its sequencer.
//!
//! A [`CaptureProgram`] is an ordered list of [`CapabilityStep`]s. Each step
//! expands to driver operations in the order wake-on-motion, enable, set
//! period, notify. The battery baseline read and battery notification are
//! appended after the last step.
//!
//! The [`CaptureSequencer`] issues the operations strictly one after the
//! other and stops at the first failure. It never retries.

use std::fmt;
use std::time::Duration;

use tracing::{debug, info};

use sensortag_types::Capability;

use crate::error::{Error, Result};
use crate::traits::SensorDriver;

/// One driver operation of the expanded capture program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverOp {
    EnableWakeOnMotion,
    Enable(Capability),
    SetPeriod(Capability, Duration),
    Notify(Capability),
    ReadBatteryLevel,
}

impl fmt::Display for DriverOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverOp::EnableWakeOnMotion => write!(f, "enable wake-on-motion"),
            DriverOp::Enable(cap) => write!(f, "enable {}", cap),
            DriverOp::SetPeriod(cap, period) => {
                write!(f, "set {} period to {}ms", cap, period.as_millis())
            }
            DriverOp::Notify(cap) => write!(f, "notify {}", cap),
            DriverOp::ReadBatteryLevel => write!(f, "read battery level"),
        }
    }
}

/// Configuration of one capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityStep {
    pub capability: Capability,
    /// Reporting period; `None` keeps the firmware default.
    pub period: Option<Duration>,
    /// Subscribe to value notifications.
    pub notify: bool,
    /// Arm wake-on-motion before enabling the capability.
    pub wake_on_motion: bool,
}

impl CapabilityStep {
    /// A step that only enables `capability`.
    pub fn new(capability: Capability) -> Self {
        Self {
            capability,
            period: None,
            notify: false,
            wake_on_motion: false,
        }
    }

    #[must_use]
    pub fn period(mut self, period: Duration) -> Self {
        self.period = Some(period);
        self
    }

    #[must_use]
    pub fn notify(mut self) -> Self {
        self.notify = true;
        self
    }

    #[must_use]
    pub fn wake_on_motion(mut self) -> Self {
        self.wake_on_motion = true;
        self
    }

    /// Driver operations for this step, in issue order.
    pub fn operations(&self) -> Vec<DriverOp> {
        let mut ops = Vec::with_capacity(4);
        if self.wake_on_motion {
            ops.push(DriverOp::EnableWakeOnMotion);
        }
        ops.push(DriverOp::Enable(self.capability));
        if let Some(period) = self.period {
            ops.push(DriverOp::SetPeriod(self.capability, period));
        }
        if self.notify {
            ops.push(DriverOp::Notify(self.capability));
        }
        ops
    }
}

/// Ordered capture program shared by all sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureProgram {
    steps: Vec<CapabilityStep>,
}

impl CaptureProgram {
    pub fn new(steps: Vec<CapabilityStep>) -> Self {
        Self { steps }
    }

    /// Program of the indoor deployment: humidity, pressure, IR and light
    /// every few seconds, accelerometer at 5 Hz behind wake-on-motion.
    pub fn standard() -> Self {
        Self::new(vec![
            CapabilityStep::new(Capability::Humidity)
                .period(Duration::from_millis(2000))
                .notify(),
            CapabilityStep::new(Capability::BarometricPressure)
                .period(Duration::from_millis(10_000))
                .notify(),
            CapabilityStep::new(Capability::IrTemperature)
                .period(Duration::from_millis(2000))
                .notify(),
            CapabilityStep::new(Capability::Luxometer)
                .period(Duration::from_millis(2000))
                .notify(),
            CapabilityStep::new(Capability::Accelerometer)
                .wake_on_motion()
                .period(Duration::from_millis(200))
                .notify(),
        ])
    }

    pub fn steps(&self) -> &[CapabilityStep] {
        &self.steps
    }

    /// Fully expanded operation list, battery read and notify included.
    pub fn operations(&self) -> Vec<DriverOp> {
        let mut ops: Vec<DriverOp> = self.steps.iter().flat_map(|s| s.operations()).collect();
        ops.push(DriverOp::ReadBatteryLevel);
        ops.push(DriverOp::Notify(Capability::BatteryLevel));
        ops
    }
}

impl Default for CaptureProgram {
    fn default() -> Self {
        Self::standard()
    }
}

/// Runs a capture program against a connected driver.
#[derive(Debug, Clone, Default)]
pub struct CaptureSequencer {
    program: CaptureProgram,
}

impl CaptureSequencer {
    pub fn new(program: CaptureProgram) -> Self {
        Self { program }
    }

    pub fn program(&self) -> &CaptureProgram {
        &self.program
    }

    /// Execute every operation in order and return the baseline battery level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StepFailed`] for the first failing operation; no
    /// later operation is issued.
    pub async fn run(&self, driver: &dyn SensorDriver) -> Result<u8> {
        let mut battery = None;
        for (step, op) in self.program.operations().into_iter().enumerate() {
            debug!(device = %driver.id(), step, "{}", op);
            let outcome = match op {
                DriverOp::EnableWakeOnMotion => driver.enable_wake_on_motion().await,
                DriverOp::Enable(cap) => driver.enable(cap).await,
                DriverOp::SetPeriod(cap, period) => driver.set_period(cap, period).await,
                DriverOp::Notify(cap) => driver.notify(cap).await,
                DriverOp::ReadBatteryLevel => driver.read_battery_level().await.map(|level| {
                    battery = Some(level);
                }),
            };
            outcome.map_err(|e| Error::step_failed(step, op, e))?;
        }

        let level = battery.ok_or_else(|| {
            Error::InvalidData("capture program completed without a battery read".to_string())
        })?;
        info!(device = %driver.id(), battery = level, "Capture program complete");
        Ok(level)
    }
}
