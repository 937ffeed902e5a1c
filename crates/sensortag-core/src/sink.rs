//! Telemetry sink contract and the adapter that feeds it.
//!
//! The [`TelemetryAdapter`] turns one [`CapabilityReading`] into one
//! [`Sample`] per stored field and writes them in order. Write failures are
//! logged and dropped; they never reach the session.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, warn};

use sensortag_types::{CapabilityReading, DeviceKind, Metric, series_name};

use crate::metrics::SupervisorStats;

/// Errors reported by a telemetry sink.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SinkError {
    /// The store could not be reached.
    #[error("Telemetry store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with an error status.
    #[error("Telemetry store rejected request ({status}): {message}")]
    Rejected {
        /// HTTP-like status code.
        status: u16,
        /// Error text returned by the store.
        message: String,
    },

    /// The sample cannot be encoded for the store.
    #[error("Invalid sample: {0}")]
    InvalidSample(String),
}

/// One timestamped value for one (device, metric) series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Device identifier (MAC address or platform UUID).
    pub device_id: String,
    pub kind: DeviceKind,
    pub metric: Metric,
    pub value: f64,
    /// Taken when the reading was forwarded, not when it was measured.
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

impl Sample {
    /// Series name: `<metric>_TI-ST_<series key>`.
    pub fn series_name(&self) -> String {
        series_name(self.metric, self.kind, &self.device_id)
    }

    /// Timestamp in Unix milliseconds.
    pub fn timestamp_ms(&self) -> i64 {
        (self.timestamp.unix_timestamp_nanos() / 1_000_000) as i64
    }
}

/// A time-series store accepting samples.
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Create the database if it does not exist. Must be idempotent.
    async fn ensure_database(&self, name: &str) -> Result<(), SinkError>;

    /// Persist one sample.
    async fn write(&self, sample: &Sample) -> Result<(), SinkError>;
}

/// Forwards decoded readings to a shared sink.
#[derive(Clone)]
pub struct TelemetryAdapter {
    sink: Arc<dyn TelemetrySink>,
    stats: Arc<SupervisorStats>,
}

impl std::fmt::Debug for TelemetryAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryAdapter").finish_non_exhaustive()
    }
}

impl TelemetryAdapter {
    pub fn new(sink: Arc<dyn TelemetrySink>, stats: Arc<SupervisorStats>) -> Self {
        Self { sink, stats }
    }

    /// Build the samples for one reading, all sharing `timestamp`.
    pub fn samples(
        device_id: &str,
        kind: DeviceKind,
        reading: &CapabilityReading,
        timestamp: OffsetDateTime,
    ) -> Vec<Sample> {
        reading
            .samples()
            .into_iter()
            .map(|(metric, value)| Sample {
                device_id: device_id.to_string(),
                kind,
                metric,
                value,
                timestamp,
            })
            .collect()
    }

    /// Write every sample of `reading`, in order. Returns the number of
    /// samples the sink accepted.
    pub async fn forward(
        &self,
        device_id: &str,
        kind: DeviceKind,
        reading: &CapabilityReading,
    ) -> usize {
        let mut written = 0;
        for sample in Self::samples(device_id, kind, reading, OffsetDateTime::now_utc()) {
            match self.sink.write(&sample).await {
                Ok(()) => {
                    debug!(device = %device_id, "{} = {}", sample.metric, sample.value);
                    self.stats.record_sample_written();
                    written += 1;
                }
                Err(e) => {
                    warn!(
                        device = %device_id,
                        series = %sample.series_name(),
                        "Dropping sample: {}",
                        e
                    );
                    self.stats.record_sample_dropped();
                }
            }
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockSink;
    use sensortag_types::Metric;

    const DEVICE: &str = "B0:B4:48:C0:12:34";

    #[test]
    fn test_humidity_reading_yields_two_samples() {
        let reading = CapabilityReading::Humidity {
            temperature: 21.5,
            humidity: 40.0,
        };
        let samples = TelemetryAdapter::samples(
            DEVICE,
            DeviceKind::Cc2650SensorTag,
            &reading,
            OffsetDateTime::UNIX_EPOCH,
        );
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].series_name(), "temperature_TI-ST_b0b448c01234");
        assert_eq!(samples[1].series_name(), "humidity_TI-ST_b0b448c01234");
        assert_eq!(samples[0].timestamp, samples[1].timestamp);
    }

    #[test]
    fn test_timestamp_ms() {
        let sample = Sample {
            device_id: DEVICE.into(),
            kind: DeviceKind::Cc2650SensorTag,
            metric: Metric::Lux,
            value: 1.0,
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        };
        assert_eq!(sample.timestamp_ms(), 1_700_000_000_000);
    }

    #[tokio::test]
    async fn test_forward_continues_after_failed_write() {
        let sink = Arc::new(MockSink::new().fail_metric(Metric::Temperature));
        let stats = Arc::new(SupervisorStats::new());
        let adapter = TelemetryAdapter::new(sink.clone(), stats.clone());

        let reading = CapabilityReading::Humidity {
            temperature: 21.5,
            humidity: 40.0,
        };
        let written = adapter
            .forward(DEVICE, DeviceKind::Cc2650SensorTag, &reading)
            .await;

        assert_eq!(written, 1);
        let metrics: Vec<_> = sink.samples().into_iter().map(|s| s.metric).collect();
        assert_eq!(metrics, vec![Metric::Humidity]);
        assert_eq!(stats.snapshot().samples_dropped, 1);
        assert_eq!(stats.snapshot().samples_written, 1);
    }
}
