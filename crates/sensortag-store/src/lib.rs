//! InfluxDB telemetry sink for SensorTag samples.
//!
//! This crate implements [`sensortag_core::TelemetrySink`] on top of the
//! InfluxDB 1.x HTTP API.
//!
//! # Features
//!
//! - Idempotent database creation (`CREATE DATABASE`)
//! - One measurement per series (`<metric>_TI-ST_<device key>`), one `value` field
//! - Millisecond timestamps
//! - Basic authentication
//!
//! # Example
//!
//! ```no_run
//! use sensortag_core::TelemetrySink;
//! use sensortag_store::{InfluxConfig, InfluxSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = InfluxConfig::new("st_report", "reporter", "secret").host("influx.lan");
//! let sink = InfluxSink::new(config)?;
//! sink.ensure_database("st_report").await?;
//! # Ok(())
//! # }
//! ```

mod client;
mod config;
mod error;
pub mod line;

pub use client::InfluxSink;
pub use config::{DEFAULT_DATABASE, DEFAULT_PORT, InfluxConfig, Protocol};
pub use error::{Error, Result};
