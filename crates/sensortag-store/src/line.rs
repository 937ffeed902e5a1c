//! InfluxDB line protocol encoding.
//!
//! Every sample becomes one point in its own measurement, named after the
//! series, with a single float field `value` and a millisecond timestamp:
//!
//! ```text
//! humidity_TI-ST_b0b448c01234 value=41.5 1700000000000
//! ```

use sensortag_core::Sample;

use crate::error::{Error, Result};

/// Escape a measurement name.
pub fn escape_measurement(name: &str) -> String {
    let mut escaped = String::with_capacity(name.len());
    for c in name.chars() {
        match c {
            ',' | ' ' | '\\' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '\n' => escaped.push_str("\\n"),
            _ => escaped.push(c),
        }
    }
    escaped
}

/// Encode one sample as a line, without the trailing newline.
pub fn encode(sample: &Sample) -> Result<String> {
    let series = sample.series_name();
    if !sample.value.is_finite() {
        return Err(Error::Encode {
            series,
            reason: format!("value {} is not finite", sample.value),
        });
    }
    Ok(format!(
        "{} value={} {}",
        escape_measurement(&series),
        sample.value,
        sample.timestamp_ms()
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use sensortag_types::{DeviceKind, Metric};
    use time::OffsetDateTime;

    fn sample(device_id: &str, metric: Metric, value: f64) -> Sample {
        Sample {
            device_id: device_id.to_string(),
            kind: DeviceKind::Cc2650SensorTag,
            metric,
            value,
            timestamp: OffsetDateTime::from_unix_timestamp(1_700_000_000).unwrap(),
        }
    }

    #[test]
    fn test_encode_humidity_sample() {
        let line = encode(&sample("B0:B4:48:C0:12:34", Metric::Humidity, 41.5)).unwrap();
        assert_eq!(line, "humidity_TI-ST_b0b448c01234 value=41.5 1700000000000");
    }

    #[test]
    fn test_encode_whole_number() {
        let line = encode(&sample("AA", Metric::Battery, 87.0)).unwrap();
        assert_eq!(line, "battery_TI-ST_aa value=87 1700000000000");
    }

    #[test]
    fn test_escape_measurement() {
        assert_eq!(escape_measurement("plain"), "plain");
        assert_eq!(escape_measurement("a b,c"), "a\\ b\\,c");
        assert_eq!(escape_measurement("a\\b"), "a\\\\b");
    }

    #[test]
    fn test_encode_rejects_nan() {
        let err = encode(&sample("AA", Metric::Lux, f64::NAN)).unwrap_err();
        assert!(matches!(err, Error::Encode { .. }));
    }

    #[test]
    fn test_device_id_with_space_is_escaped() {
        let line = encode(&sample("my tag", Metric::Lux, 3.25)).unwrap();
        assert!(line.starts_with("lux_TI-ST_my\\ tag value=3.25 "));
    }
}
