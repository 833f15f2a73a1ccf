//! HID-over-GATT profile: the fixed service catalog the central sees.
//!
//! Services are registered HID first, then Device Information, then Battery,
//! so their object paths are `service0`, `service1` and `service2`.

use tracing::info;

use crate::config::Config;
use crate::error::GattError;
use crate::gatt::{Application, BtUuid, CharacteristicSpec, Flag, NodeId};

/// Base object path of the exported GATT application
pub const APP_PATH: &str = "/org/bluez/ble_hid_keyboard/app";

pub const HID_SERVICE_UUID: BtUuid = BtUuid::Short(0x1812);
pub const BATTERY_SERVICE_UUID: BtUuid = BtUuid::Short(0x180f);
pub const DEVICE_INFORMATION_SERVICE_UUID: BtUuid = BtUuid::Short(0x180a);

pub const BATTERY_LEVEL_UUID: BtUuid = BtUuid::Short(0x2a19);
pub const PNP_ID_UUID: BtUuid = BtUuid::Short(0x2a50);
pub const MANUFACTURER_NAME_UUID: BtUuid = BtUuid::Short(0x2a29);
pub const MODEL_NUMBER_UUID: BtUuid = BtUuid::Short(0x2a24);
pub const SOFTWARE_REVISION_UUID: BtUuid = BtUuid::Short(0x2a28);
pub const PROTOCOL_MODE_UUID: BtUuid = BtUuid::Short(0x2a4e);
pub const HID_INFORMATION_UUID: BtUuid = BtUuid::Short(0x2a4a);
pub const CONTROL_POINT_UUID: BtUuid = BtUuid::Short(0x2a4c);
pub const REPORT_MAP_UUID: BtUuid = BtUuid::Short(0x2a4b);
pub const REPORT_UUID: BtUuid = BtUuid::Short(0x2a4d);
pub const REPORT_REFERENCE_UUID: BtUuid = BtUuid::Short(0x2908);

/// Vendor ID source (USB-IF), vendor 0x10c4, product 0x0001, version 0x0001
pub const PNP_ID: [u8; 7] = [0x02, 0xc4, 0x10, 0x01, 0x00, 0x01, 0x00];

/// bcdHID 1.11, country code 0, normally connectable
pub const HID_INFORMATION: [u8; 4] = [0x01, 0x11, 0x00, 0x02];

pub const PROTOCOL_MODE_BOOT: u8 = 0x00;
pub const PROTOCOL_MODE_REPORT: u8 = 0x01;

/// Report ID 1, Input report
pub const REPORT_REFERENCE: [u8; 2] = [0x01, 0x01];

pub const BATTERY_LEVEL_PERCENT: u8 = 100;

/// modifier byte, reserved byte, six key codes
pub const INPUT_REPORT_LEN: usize = 8;

/// Keyboard report descriptor advertised through the Report Map
#[rustfmt::skip]
pub const REPORT_MAP: [u8; 67] = [
    0x05, 0x01,       // Usage Page (Generic Desktop)
    0x09, 0x06,       // Usage (Keyboard)
    0xa1, 0x01,       // Collection (Application)
    0x85, 0x01,       //   Report ID (1)
    0x05, 0x07,       //   Usage Page (Key Codes)
    0x19, 0xe0,       //   Usage Minimum (224)
    0x29, 0xe7,       //   Usage Maximum (231)
    0x15, 0x00,       //   Logical Minimum (0)
    0x25, 0x01,       //   Logical Maximum (1)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x08,       //   Report Count (8)
    0x81, 0x02,       //   Input (Data, Variable, Absolute) modifiers
    0x75, 0x08,       //   Report Size (8)
    0x95, 0x01,       //   Report Count (1)
    0x81, 0x01,       //   Input (Constant) reserved
    0x05, 0x08,       //   Usage Page (LEDs)
    0x75, 0x01,       //   Report Size (1)
    0x95, 0x05,       //   Report Count (5)
    0x19, 0x01,       //   Usage Minimum (1)
    0x29, 0x05,       //   Usage Maximum (5)
    0x91, 0x02,       //   Output (Data, Variable, Absolute) LEDs
    0x75, 0x03,       //   Report Size (3)
    0x95, 0x01,       //   Report Count (1)
    0x91, 0x01,       //   Output (Constant) padding
    0x05, 0x07,       //   Usage Page (Key Codes)
    0x19, 0x00,       //   Usage Minimum (0)
    0x2a, 0xff, 0x00, //   Usage Maximum (255)
    0x15, 0x00,       //   Logical Minimum (0)
    0x26, 0xff, 0x00, //   Logical Maximum (255)
    0x75, 0x08,       //   Report Size (8)
    0x95, 0x06,       //   Report Count (6)
    0x81, 0x00,       //   Input (Data, Array) key codes
    0xc0,             // End Collection
];

/// Strings published by the Device Information Service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub manufacturer: String,
    pub product: String,
    pub version: String,
}

impl From<&Config> for DeviceIdentity {
    fn from(config: &Config) -> Self {
        Self {
            manufacturer: config.device.manufacturer.clone(),
            product: config.bluetooth.name.clone(),
            version: config.device.version.clone(),
        }
    }
}

/// The built tree plus handles to the characteristics the daemon drives
#[derive(Debug)]
pub struct HidProfile {
    pub application: Application,
    pub report: NodeId,
    pub battery_level: NodeId,
    pub protocol_mode: NodeId,
    pub control_point: NodeId,
}

fn battery_level() -> Vec<u8> {
    info!("Battery level read: {}%", BATTERY_LEVEL_PERCENT);
    vec![BATTERY_LEVEL_PERCENT]
}

fn control_point_written(value: &[u8]) {
    match value.first() {
        Some(0x00) => info!("Host entered suspend"),
        Some(0x01) => info!("Host exited suspend"),
        Some(other) => info!("Unknown HID control point command 0x{:02x}", other),
        None => info!("Empty HID control point write"),
    }
}

fn protocol_mode_written(value: &[u8]) {
    match value.first() {
        Some(&PROTOCOL_MODE_BOOT) => info!("Host selected boot protocol"),
        Some(&PROTOCOL_MODE_REPORT) => info!("Host selected report protocol"),
        _ => info!("Protocol mode write: {:02x?}", value),
    }
}

/// Build the HID, Device Information and Battery services under [`APP_PATH`]
pub fn build(identity: &DeviceIdentity) -> Result<HidProfile, GattError> {
    build_at(APP_PATH, identity)
}

pub fn build_at(base_path: &str, identity: &DeviceIdentity) -> Result<HidProfile, GattError> {
    let mut app = Application::new(base_path);

    let hid = app.add_service(HID_SERVICE_UUID, true);
    let protocol_mode = app.add_characteristic(
        hid,
        CharacteristicSpec::new(
            PROTOCOL_MODE_UUID,
            &[Flag::Read, Flag::WriteWithoutResponse],
            [PROTOCOL_MODE_REPORT],
        )
        .on_write(protocol_mode_written),
    )?;
    app.add_characteristic(
        hid,
        CharacteristicSpec::new(HID_INFORMATION_UUID, &[Flag::SecureRead], HID_INFORMATION),
    )?;
    let control_point = app.add_characteristic(
        hid,
        CharacteristicSpec::new(CONTROL_POINT_UUID, &[Flag::WriteWithoutResponse], [0x00u8])
            .on_write(control_point_written),
    )?;
    app.add_characteristic(
        hid,
        CharacteristicSpec::new(REPORT_MAP_UUID, &[Flag::Read], REPORT_MAP),
    )?;
    let report = app.add_characteristic(
        hid,
        CharacteristicSpec::new(
            REPORT_UUID,
            &[Flag::SecureRead, Flag::Notify],
            [0u8; INPUT_REPORT_LEN],
        ),
    )?;
    app.add_descriptor(report, REPORT_REFERENCE_UUID, &[Flag::Read], REPORT_REFERENCE)?;

    let dis = app.add_service(DEVICE_INFORMATION_SERVICE_UUID, true);
    for (uuid, value) in [
        (PNP_ID_UUID, PNP_ID.to_vec()),
        (MANUFACTURER_NAME_UUID, identity.manufacturer.as_bytes().to_vec()),
        (MODEL_NUMBER_UUID, identity.product.as_bytes().to_vec()),
        (SOFTWARE_REVISION_UUID, identity.version.as_bytes().to_vec()),
    ] {
        app.add_characteristic(dis, CharacteristicSpec::new(uuid, &[Flag::Read], value))?;
    }

    let battery = app.add_service(BATTERY_SERVICE_UUID, true);
    let battery_level = app.add_characteristic(
        battery,
        CharacteristicSpec::new(
            BATTERY_LEVEL_UUID,
            &[Flag::Read, Flag::Notify],
            [BATTERY_LEVEL_PERCENT],
        )
        .on_read(battery_level),
    )?;

    Ok(HidProfile {
        application: app,
        report,
        battery_level,
        protocol_mode,
        control_point,
    })
}
