//! Peripheral identifier helpers.

use btleplug::platform::PeripheralId;

/// Address reported by CoreBluetooth, which hides the real MAC.
pub const HIDDEN_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a string.
///
/// On macOS this is the CoreBluetooth UUID; elsewhere it is the MAC address
/// in whatever form the backend prints it.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Identifier to connect with: the address, or the peripheral ID when the
/// platform hides the address.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    pick_identifier(address, || format_peripheral_id(peripheral_id))
}

fn pick_identifier(address: &str, peripheral_id: impl FnOnce() -> String) -> String {
    if address == HIDDEN_ADDRESS {
        peripheral_id()
    } else {
        address.to_string()
    }
}

/// Lowercase hex digits only, so `AA:BB-cc` and `aabbcc` compare equal.
pub fn normalize_address(address: &str) -> String {
    address
        .chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

/// Whether a configured identifier designates this peripheral.
///
/// Matches the MAC address (separator and case insensitive), the platform
/// peripheral ID (macOS UUIDs), or a substring of the advertised name.
pub fn identifier_matches(
    identifier: &str,
    address: &str,
    peripheral_id: &str,
    name: Option<&str>,
) -> bool {
    let wanted = identifier.trim().to_lowercase();
    if wanted.is_empty() {
        return false;
    }

    if address != HIDDEN_ADDRESS && normalize_address(address) == normalize_address(&wanted) {
        return true;
    }

    if peripheral_id.to_lowercase().contains(&wanted) {
        return true;
    }

    name.is_some_and(|n| n.to_lowercase().contains(&wanted))
}
