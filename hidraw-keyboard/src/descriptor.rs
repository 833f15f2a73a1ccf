//! Keyboard classification by report descriptor prefix.
//!
//! This is a structural sniff, not a descriptor parse: a boot-style keyboard
//! descriptor opens with the same ten bytes on practically every device.

/// Usage Page (Generic Desktop), Usage (Keyboard), Collection (Application),
/// Usage Page (Key Codes), Usage Minimum (0xE0)
pub const KEYBOARD_DESCRIPTOR_PREFIX: [u8; 10] =
    [0x05, 0x01, 0x09, 0x06, 0xa1, 0x01, 0x05, 0x07, 0x19, 0xe0];

/// Outcome of applying the keyboard heuristic to a device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Accepted,
    Ignored,
}

/// Classify a report descriptor.
pub fn classify(descriptor: &[u8]) -> Classification {
    if descriptor.starts_with(&KEYBOARD_DESCRIPTOR_PREFIX) {
        Classification::Accepted
    } else {
        Classification::Ignored
    }
}

/// Shorthand for `classify(d) == Accepted`
pub fn is_keyboard(descriptor: &[u8]) -> bool {
    classify(descriptor) == Classification::Accepted
}

/// Lowercase hex rendering used in logs
pub fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn from_hex(s: &str) -> Vec<u8> {
        (0..s.len() / 2)
            .map(|i| u8::from_str_radix(&s[i * 2..i * 2 + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn test_boot_keyboard_is_accepted() {
        let desc = from_hex("05010906a101050719e029e715002501750195088102");
        assert_eq!(classify(&desc), Classification::Accepted);
    }

    #[test]
    fn test_report_id_keyboard_is_ignored() {
        // Report ID item (85 01) sits before the key-code usage page
        let desc = from_hex("05010906a1018501050719e029e7");
        assert_eq!(classify(&desc), Classification::Ignored);
    }

    #[test]
    fn test_vendor_and_mouse_descriptors_are_ignored() {
        assert!(!is_keyboard(&from_hex("0601ff0901a101")));
        assert!(!is_keyboard(&from_hex("06ffff0902a101")));
        assert!(!is_keyboard(&from_hex("05010902a1010901a100")));
    }

    #[test]
    fn test_short_descriptor_is_ignored() {
        assert!(!is_keyboard(&KEYBOARD_DESCRIPTOR_PREFIX[..9]));
        assert!(!is_keyboard(&[]));
        assert!(is_keyboard(&KEYBOARD_DESCRIPTOR_PREFIX));
    }

    #[test]
    fn test_to_hex() {
        assert_eq!(to_hex(&KEYBOARD_DESCRIPTOR_PREFIX), "05010906a101050719e0");
        assert_eq!(to_hex(&[]), "");
    }
}
