//! Identifier helpers shared by the driver and the discoverer.

use btleplug::platform::PeripheralId;

/// Address reported by platforms that hide the Bluetooth address (macOS).
pub const UNSET_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS, peripheral IDs are UUIDs. On other platforms they wrap the
/// MAC address or a D-Bus path; this extracts the useful part.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Create the stable device identifier from an address and peripheral ID.
///
/// On macOS where addresses are 00:00:00:00:00:00, uses the peripheral ID.
/// On other platforms, uses the Bluetooth address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    choose_identifier(address, || format_peripheral_id(peripheral_id))
}

fn choose_identifier(address: &str, fallback: impl FnOnce() -> String) -> String {
    if address == UNSET_ADDRESS || address.is_empty() {
        fallback()
    } else {
        address.to_string()
    }
}
