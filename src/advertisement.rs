//! LE advertisement payload

use crate::profile::{BATTERY_SERVICE_UUID, HID_SERVICE_UUID};

pub const ADVERTISEMENT_PATH: &str = "/org/bluez/ble_hid_keyboard/advertisement0";

/// GAP appearance: HID keyboard
pub const APPEARANCE_KEYBOARD: u16 = 0x03c1;

pub const ADVERTISEMENT_TYPE: &str = "peripheral";

/// What BlueZ broadcasts on our behalf. Built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub local_name: String,
    pub discoverable: bool,
}

impl Advertisement {
    pub fn new(local_name: impl Into<String>, discoverable: bool) -> Self {
        Self {
            local_name: local_name.into(),
            discoverable,
        }
    }

    pub fn ad_type(&self) -> &'static str {
        ADVERTISEMENT_TYPE
    }

    /// HID and Battery services, independent of discoverability
    pub fn service_uuids(&self) -> Vec<String> {
        vec![HID_SERVICE_UUID.to_string(), BATTERY_SERVICE_UUID.to_string()]
    }

    pub fn appearance(&self) -> u16 {
        APPEARANCE_KEYBOARD
    }
}
