//! Peripheral identifier helpers.

use btleplug::platform::PeripheralId;

/// Address reported by platforms that hide the real MAC (macOS).
const PLACEHOLDER_ADDRESS: &str = "00:00:00:00:00:00";

/// Format a peripheral ID as a bare string.
pub fn format_peripheral_id(id: &PeripheralId) -> String {
    strip_debug_wrapper(&format!("{:?}", id))
}

fn strip_debug_wrapper(debug: &str) -> String {
    debug
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// The Bluetooth address, or the peripheral ID where the platform hides it.
pub fn create_identifier(address: &str, peripheral_id: &PeripheralId) -> String {
    if is_placeholder_address(address) {
        format_peripheral_id(peripheral_id)
    } else {
        address.to_string()
    }
}

fn is_placeholder_address(address: &str) -> bool {
    address.is_empty() || address == PLACEHOLDER_ADDRESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_address() {
        assert!(is_placeholder_address("00:00:00:00:00:00"));
        assert!(is_placeholder_address(""));
        assert!(!is_placeholder_address("AA:BB:CC:DD:EE:FF"));
    }

    #[test]
    fn test_strip_debug_wrapper() {
        assert_eq!(
            strip_debug_wrapper("PeripheralId(5A1E9B38-2D0C-4E5C-9B8A-1F2E3D4C5B6A)"),
            "5A1E9B38-2D0C-4E5C-9B8A-1F2E3D4C5B6A"
        );
        assert_eq!(strip_debug_wrapper("AA:BB"), "AA:BB");
    }
}
