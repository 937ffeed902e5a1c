//! Core types for SensorTag sensor data.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ParseError, ParseResult};

/// Kind of peripheral handled by the reporter.
///
/// The kind contributes the `TI-ST` token of every series name, so it must
/// stay stable for a given physical device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[non_exhaustive]
pub enum DeviceKind {
    /// TI CC2650 SimpleLink multi-standard SensorTag.
    #[default]
    Cc2650SensorTag,
}

impl DeviceKind {
    /// Detect the device kind from an advertised local name.
    ///
    /// The CC2650 advertises as `"CC2650 SensorTag"` and some firmware builds
    /// as plain `"SensorTag"`; matching is case-insensitive and word-bounded.
    ///
    /// # Examples
    ///
    /// ```
    /// use sensortag_types::DeviceKind;
    ///
    /// assert_eq!(DeviceKind::from_name("CC2650 SensorTag"), Some(DeviceKind::Cc2650SensorTag));
    /// assert_eq!(DeviceKind::from_name("SensorTag 2.0"), Some(DeviceKind::Cc2650SensorTag));
    /// assert_eq!(DeviceKind::from_name("MySensorTagClone"), None);
    /// assert_eq!(DeviceKind::from_name("LYWSD03MMC"), None);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        let name_lower = name.to_lowercase();
        if contains_word(&name_lower, "sensortag") {
            Some(DeviceKind::Cc2650SensorTag)
        } else {
            None
        }
    }

    /// Token used between the metric and the device identifier in series names.
    #[must_use]
    pub fn series_tag(&self) -> &'static str {
        match self {
            DeviceKind::Cc2650SensorTag => "TI-ST",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceKind::Cc2650SensorTag => write!(f, "CC2650 SensorTag"),
        }
    }
}

/// Check if a string contains a word at a word boundary.
fn contains_word(haystack: &str, needle: &str) -> bool {
    haystack.match_indices(needle).any(|(pos, _)| {
        let before_ok = haystack[..pos]
            .chars()
            .last()
            .is_none_or(|c| !c.is_alphanumeric());
        let after_ok = haystack[pos + needle.len()..]
            .chars()
            .next()
            .is_none_or(|c| !c.is_alphanumeric());
        before_ok && after_ok
    })
}

/// A measurable quantity exposed by the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Capability {
    /// Combined humidity and temperature sensor (HDC1000).
    Humidity,
    /// Barometric pressure sensor (BMP280).
    BarometricPressure,
    /// Infrared thermopile (TMP007), object and ambient temperature.
    IrTemperature,
    /// Ambient light sensor (OPT3001).
    Luxometer,
    /// Accelerometer axes of the movement sensor (MPU9250).
    Accelerometer,
    /// Standard GATT battery level.
    BatteryLevel,
}

impl Capability {
    /// Every capability, in capture-program order.
    pub const ALL: [Capability; 6] = [
        Capability::Humidity,
        Capability::BarometricPressure,
        Capability::IrTemperature,
        Capability::Luxometer,
        Capability::Accelerometer,
        Capability::BatteryLevel,
    ];

    /// Short name used in logs.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Capability::Humidity => "humidity",
            Capability::BarometricPressure => "barometric pressure",
            Capability::IrTemperature => "IR temperature",
            Capability::Luxometer => "luxometer",
            Capability::Accelerometer => "accelerometer",
            Capability::BatteryLevel => "battery level",
        }
    }

    /// Minimum payload length of the capability's data characteristic.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        match self {
            Capability::Humidity => 4,
            Capability::BarometricPressure => 6,
            Capability::IrTemperature => 4,
            Capability::Luxometer => 2,
            Capability::Accelerometer => 18,
            Capability::BatteryLevel => 1,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Accelerometer full-scale range of the movement sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum AccelerometerRange {
    /// ±2 G.
    #[default]
    TwoG,
    /// ±4 G.
    FourG,
    /// ±8 G.
    EightG,
    /// ±16 G.
    SixteenG,
}

impl AccelerometerRange {
    /// Value of bits 8-9 of the movement configuration word.
    #[must_use]
    pub fn config_bits(&self) -> u16 {
        match self {
            AccelerometerRange::TwoG => 0,
            AccelerometerRange::FourG => 1 << 8,
            AccelerometerRange::EightG => 2 << 8,
            AccelerometerRange::SixteenG => 3 << 8,
        }
    }

    /// Raw counts per G.
    #[must_use]
    pub fn counts_per_g(&self) -> f64 {
        match self {
            AccelerometerRange::TwoG => 32768.0 / 2.0,
            AccelerometerRange::FourG => 32768.0 / 4.0,
            AccelerometerRange::EightG => 32768.0 / 8.0,
            AccelerometerRange::SixteenG => 32768.0 / 16.0,
        }
    }
}

/// Name of a stored metric.
///
/// The string forms are part of the series naming contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Metric {
    Temperature,
    Humidity,
    Pressure,
    AmbientTemperature,
    Lux,
    AccelX,
    AccelY,
    AccelZ,
    Battery,
}

impl Metric {
    /// Series prefix for this metric.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Temperature => "temperature",
            Metric::Humidity => "humidity",
            Metric::Pressure => "pressure",
            Metric::AmbientTemperature => "ambient_temperature",
            Metric::Lux => "lux",
            Metric::AccelX => "accelX",
            Metric::AccelY => "accelY",
            Metric::AccelZ => "accelZ",
            Metric::Battery => "battery",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded capability event.
///
/// Each variant carries every field the sensor reports; [`samples`](Self::samples)
/// selects the fields that are persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "capability", rename_all = "snake_case"))]
pub enum CapabilityReading {
    /// Temperature in °C and relative humidity in %.
    Humidity { temperature: f64, humidity: f64 },
    /// Pressure in hPa.
    BarometricPressure { pressure: f64 },
    /// Object and ambient (die) temperature in °C.
    IrTemperature { object: f64, ambient: f64 },
    /// Illuminance in lux.
    Luxometer { lux: f64 },
    /// Acceleration per axis in G.
    Accelerometer { x: f64, y: f64, z: f64 },
    /// Battery level in percent.
    BatteryLevel { level: u8 },
}

impl CapabilityReading {
    /// The capability that produced this reading.
    #[must_use]
    pub fn capability(&self) -> Capability {
        match self {
            CapabilityReading::Humidity { .. } => Capability::Humidity,
            CapabilityReading::BarometricPressure { .. } => Capability::BarometricPressure,
            CapabilityReading::IrTemperature { .. } => Capability::IrTemperature,
            CapabilityReading::Luxometer { .. } => Capability::Luxometer,
            CapabilityReading::Accelerometer { .. } => Capability::Accelerometer,
            CapabilityReading::BatteryLevel { .. } => Capability::BatteryLevel,
        }
    }

    /// Persisted (metric, value) pairs, in write order.
    ///
    /// The IR sensor only stores its ambient temperature: the object
    /// temperature of a bare thermopile is meaningless indoors.
    #[must_use]
    pub fn samples(&self) -> Vec<(Metric, f64)> {
        match *self {
            CapabilityReading::Humidity {
                temperature,
                humidity,
            } => vec![
                (Metric::Temperature, temperature),
                (Metric::Humidity, humidity),
            ],
            CapabilityReading::BarometricPressure { pressure } => {
                vec![(Metric::Pressure, pressure)]
            }
            CapabilityReading::IrTemperature { ambient, .. } => {
                vec![(Metric::AmbientTemperature, ambient)]
            }
            CapabilityReading::Luxometer { lux } => vec![(Metric::Lux, lux)],
            CapabilityReading::Accelerometer { x, y, z } => vec![
                (Metric::AccelX, x),
                (Metric::AccelY, y),
                (Metric::AccelZ, z),
            ],
            CapabilityReading::BatteryLevel { level } => {
                vec![(Metric::Battery, f64::from(level))]
            }
        }
    }

    /// Decode a data-characteristic payload, assuming the default
    /// accelerometer range.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] when the payload is shorter
    /// than [`Capability::payload_len`].
    pub fn parse(capability: Capability, data: &[u8]) -> ParseResult<Self> {
        Self::parse_with_range(capability, data, AccelerometerRange::default())
    }

    /// Decode a data-characteristic payload.
    ///
    /// Layouts (all little-endian):
    /// - humidity: temperature raw u16, humidity raw u16 (HDC1000 formulas)
    /// - barometer: temperature u24, pressure u24, both in hundredths
    /// - IR temperature: object raw u16, ambient raw u16, 14-bit, 1/32 °C
    /// - luxometer: u16 with 12-bit mantissa and 4-bit exponent
    /// - movement: gyro xyz, accelerometer xyz, magnetometer xyz, all i16
    /// - battery: u8 percent
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::InsufficientBytes`] for short payloads and
    /// [`ParseError::InvalidValue`] for a battery level above 100.
    pub fn parse_with_range(
        capability: Capability,
        data: &[u8],
        range: AccelerometerRange,
    ) -> ParseResult<Self> {
        use bytes::Buf;

        if data.len() < capability.payload_len() {
            return Err(ParseError::InsufficientBytes {
                capability,
                expected: capability.payload_len(),
                actual: data.len(),
            });
        }

        let mut buf = data;
        let reading = match capability {
            Capability::Humidity => {
                let temp_raw = buf.get_u16_le();
                let hum_raw = buf.get_u16_le() & !0x0003;
                CapabilityReading::Humidity {
                    temperature: f64::from(temp_raw) / 65536.0 * 165.0 - 40.0,
                    humidity: f64::from(hum_raw) / 65536.0 * 100.0,
                }
            }
            Capability::BarometricPressure => {
                let _temperature = buf.get_uint_le(3);
                let pressure = buf.get_uint_le(3);
                CapabilityReading::BarometricPressure {
                    pressure: pressure as f64 / 100.0,
                }
            }
            Capability::IrTemperature => {
                let object_raw = buf.get_u16_le();
                let ambient_raw = buf.get_u16_le();
                CapabilityReading::IrTemperature {
                    object: f64::from(object_raw >> 2) * 0.03125,
                    ambient: f64::from(ambient_raw >> 2) * 0.03125,
                }
            }
            Capability::Luxometer => {
                let raw = buf.get_u16_le();
                let mantissa = f64::from(raw & 0x0FFF);
                let exponent = i32::from(raw >> 12);
                CapabilityReading::Luxometer {
                    lux: mantissa * 0.01 * 2f64.powi(exponent),
                }
            }
            Capability::Accelerometer => {
                buf.advance(6); // gyroscope
                let scale = range.counts_per_g();
                let x = f64::from(buf.get_i16_le()) / scale;
                let y = f64::from(buf.get_i16_le()) / scale;
                let z = f64::from(buf.get_i16_le()) / scale;
                CapabilityReading::Accelerometer { x, y, z }
            }
            Capability::BatteryLevel => {
                let level = buf.get_u8();
                if level > 100 {
                    return Err(ParseError::InvalidValue(format!(
                        "battery level {} exceeds 100%",
                        level
                    )));
                }
                CapabilityReading::BatteryLevel { level }
            }
        };

        Ok(reading)
    }
}

/// Device part of a series name.
///
/// Series written by the Node.js reporter are keyed on noble's peripheral
/// uuid: the address (or CoreBluetooth UUID) in lowercase hex without
/// separators. The same key is produced here so both write to the same series.
///
/// ```
/// use sensortag_types::series_key;
///
/// assert_eq!(series_key("B0:B4:48:C0:12:34"), "b0b448c01234");
/// assert_eq!(
///     series_key("5A1E2C3D-0000-4000-8000-00805F9B34FB"),
///     "5a1e2c3d00004000800000805f9b34fb"
/// );
/// ```
#[must_use]
pub fn series_key(device_id: &str) -> String {
    device_id
        .chars()
        .filter(|c| !matches!(c, ':' | '-'))
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Build the series name for a (device, metric) pair:
/// `<metric>_<kind tag>_<series key>`.
///
/// # Examples
///
/// ```
/// use sensortag_types::{series_name, DeviceKind, Metric};
///
/// assert_eq!(
///     series_name(Metric::Humidity, DeviceKind::Cc2650SensorTag, "B0:B4:48:C0:12:34"),
///     "humidity_TI-ST_b0b448c01234"
/// );
/// ```
#[must_use]
pub fn series_name(metric: Metric, kind: DeviceKind, device_id: &str) -> String {
    format!(
        "{}_{}_{}",
        metric.as_str(),
        kind.series_tag(),
        series_key(device_id)
    )
}
