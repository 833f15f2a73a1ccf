//! Keyboard discovery and raw input-report streaming over Linux hidraw.
//!
//! - [`hidraw`]: ioctl queries (report descriptor, name, bus identity) and a
//!   readiness-driven report stream
//! - [`descriptor`]: the "does this look like a keyboard" heuristic
//! - [`registry`]: accepted keyboards, hot-plug lifecycle and report fan-in
//! - `hotplug`: udev enumeration and netlink monitor (feature `hotplug`)

pub mod descriptor;
pub mod error;
pub mod hidraw;
pub mod registry;

#[cfg(feature = "hotplug")]
mod hotplug;

pub use descriptor::{classify, is_keyboard, Classification, KEYBOARD_DESCRIPTOR_PREFIX};
pub use error::HidrawError;
pub use hidraw::{BusInfo, BusType, Hidraw, HidrawStream, HID_MAX_DESCRIPTOR_SIZE};
pub use registry::{
    DeviceState, HidReport, HidrawBackend, HotplugAction, HotplugEvent, Keyboard,
    KeyboardRegistry, ProbedDevice, ReadEvent, ReportSink, SharedRegistry,
};

#[cfg(feature = "hotplug")]
pub use hotplug::{HotplugMonitor, UdevBackend, HIDRAW_SUBSYSTEM};
