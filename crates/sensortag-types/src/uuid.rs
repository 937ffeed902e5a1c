//! Bluetooth UUIDs for the CC2650 SensorTag.
//!
//! TI sensor services use the base `f000XXXX-0451-4000-b000-000000000000`;
//! battery uses the standard Bluetooth SIG base.

use uuid::{Uuid, uuid};

use crate::types::Capability;

// --- IR temperature (TMP007) ---

pub const IR_TEMPERATURE_SERVICE: Uuid = uuid!("f000aa00-0451-4000-b000-000000000000");
pub const IR_TEMPERATURE_DATA: Uuid = uuid!("f000aa01-0451-4000-b000-000000000000");
pub const IR_TEMPERATURE_CONFIG: Uuid = uuid!("f000aa02-0451-4000-b000-000000000000");
pub const IR_TEMPERATURE_PERIOD: Uuid = uuid!("f000aa03-0451-4000-b000-000000000000");

// --- Humidity (HDC1000) ---

pub const HUMIDITY_SERVICE: Uuid = uuid!("f000aa20-0451-4000-b000-000000000000");
pub const HUMIDITY_DATA: Uuid = uuid!("f000aa21-0451-4000-b000-000000000000");
pub const HUMIDITY_CONFIG: Uuid = uuid!("f000aa22-0451-4000-b000-000000000000");
pub const HUMIDITY_PERIOD: Uuid = uuid!("f000aa23-0451-4000-b000-000000000000");

// --- Barometer (BMP280) ---

pub const BAROMETER_SERVICE: Uuid = uuid!("f000aa40-0451-4000-b000-000000000000");
pub const BAROMETER_DATA: Uuid = uuid!("f000aa41-0451-4000-b000-000000000000");
pub const BAROMETER_CONFIG: Uuid = uuid!("f000aa42-0451-4000-b000-000000000000");
/// The barometer period characteristic skips `aa43` (calibration on the
/// older CC2541 tag).
pub const BAROMETER_PERIOD: Uuid = uuid!("f000aa44-0451-4000-b000-000000000000");

// --- Optical (OPT3001) ---

pub const OPTICAL_SERVICE: Uuid = uuid!("f000aa70-0451-4000-b000-000000000000");
pub const OPTICAL_DATA: Uuid = uuid!("f000aa71-0451-4000-b000-000000000000");
pub const OPTICAL_CONFIG: Uuid = uuid!("f000aa72-0451-4000-b000-000000000000");
pub const OPTICAL_PERIOD: Uuid = uuid!("f000aa73-0451-4000-b000-000000000000");

// --- Movement (MPU9250) ---

pub const MOVEMENT_SERVICE: Uuid = uuid!("f000aa80-0451-4000-b000-000000000000");
pub const MOVEMENT_DATA: Uuid = uuid!("f000aa81-0451-4000-b000-000000000000");
/// 16-bit little-endian bitmask, see [`MOVEMENT_ACCEL_XYZ`] and friends.
pub const MOVEMENT_CONFIG: Uuid = uuid!("f000aa82-0451-4000-b000-000000000000");
pub const MOVEMENT_PERIOD: Uuid = uuid!("f000aa83-0451-4000-b000-000000000000");

/// Movement config bits enabling accelerometer X, Y and Z.
pub const MOVEMENT_ACCEL_XYZ: u16 = 0x0038;
/// Movement config bit enabling wake-on-motion.
pub const MOVEMENT_WAKE_ON_MOTION: u16 = 0x0080;

// --- Battery ---

/// Battery service.
pub const BATTERY_SERVICE: Uuid = uuid!("0000180f-0000-1000-8000-00805f9b34fb");

/// Battery level characteristic.
pub const BATTERY_LEVEL: Uuid = uuid!("00002a19-0000-1000-8000-00805f9b34fb");

/// Sensor config value that switches a TI sensor on.
pub const SENSOR_ENABLE: u8 = 0x01;

/// Characteristics backing one capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapabilityCharacteristics {
    pub service: Uuid,
    pub data: Uuid,
    /// `None` for capabilities that are always on.
    pub config: Option<Uuid>,
    /// `None` for capabilities without a configurable period.
    pub period: Option<Uuid>,
}

/// Look up the GATT characteristics for a capability.
#[must_use]
pub fn characteristics(capability: Capability) -> CapabilityCharacteristics {
    match capability {
        Capability::Humidity => CapabilityCharacteristics {
            service: HUMIDITY_SERVICE,
            data: HUMIDITY_DATA,
            config: Some(HUMIDITY_CONFIG),
            period: Some(HUMIDITY_PERIOD),
        },
        Capability::BarometricPressure => CapabilityCharacteristics {
            service: BAROMETER_SERVICE,
            data: BAROMETER_DATA,
            config: Some(BAROMETER_CONFIG),
            period: Some(BAROMETER_PERIOD),
        },
        Capability::IrTemperature => CapabilityCharacteristics {
            service: IR_TEMPERATURE_SERVICE,
            data: IR_TEMPERATURE_DATA,
            config: Some(IR_TEMPERATURE_CONFIG),
            period: Some(IR_TEMPERATURE_PERIOD),
        },
        Capability::Luxometer => CapabilityCharacteristics {
            service: OPTICAL_SERVICE,
            data: OPTICAL_DATA,
            config: Some(OPTICAL_CONFIG),
            period: Some(OPTICAL_PERIOD),
        },
        Capability::Accelerometer => CapabilityCharacteristics {
            service: MOVEMENT_SERVICE,
            data: MOVEMENT_DATA,
            config: Some(MOVEMENT_CONFIG),
            period: Some(MOVEMENT_PERIOD),
        },
        Capability::BatteryLevel => CapabilityCharacteristics {
            service: BATTERY_SERVICE,
            data: BATTERY_LEVEL,
            config: None,
            period: None,
        },
    }
}

/// Find the capability whose data characteristic is `data`.
#[must_use]
pub fn capability_for_data(data: Uuid) -> Option<Capability> {
    Capability::ALL
        .into_iter()
        .find(|cap| characteristics(*cap).data == data)
}
