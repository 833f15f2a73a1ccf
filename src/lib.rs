//! BLE HID-over-GATT keyboard bridge.
//!
//! Physical keyboards found through [`hidraw_keyboard`] are republished to a
//! BLE central as a HOGP peripheral hosted by BlueZ.
//!
//! - [`gatt`]: the GATT object tree and its checked operations
//! - [`profile`]: the HID, Device Information and Battery services
//! - [`advertisement`], [`agent`]: discoverability and pairing
//! - [`bridge`]: Report characteristic to keyboard registry link
//! - [`bluez`]: everything that touches D-Bus
//! - [`daemon`]: startup, event loop and shutdown

pub mod advertisement;
pub mod agent;
pub mod bluez;
pub mod bridge;
pub mod config;
pub mod daemon;
pub mod error;
pub mod gatt;
pub mod profile;

pub use config::Config;
pub use error::{Error, Result};
