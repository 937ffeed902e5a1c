//! Platform-agnostic types for TI CC2650 SensorTags.
//!
//! This crate holds everything that can be described without a Bluetooth
//! stack: capabilities, decoded readings, metric names and the GATT layout.
//!
//! # Example
//!
//! ```
//! use sensortag_types::{Capability, CapabilityReading, Metric};
//!
//! let reading = CapabilityReading::parse(Capability::BatteryLevel, &[87]).unwrap();
//! assert_eq!(reading.samples(), vec![(Metric::Battery, 87.0)]);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    AccelerometerRange, Capability, CapabilityReading, DeviceKind, Metric, series_key, series_name,
};
pub use uuid as uuids;
