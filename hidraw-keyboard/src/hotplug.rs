//! udev enumeration and hot-plug monitoring for the hidraw subsystem

use std::path::{Path, PathBuf};

use futures::StreamExt;
use tokio_udev::{AsyncMonitorSocket, Enumerator, EventType, MonitorBuilder};
use tracing::debug;

use crate::error::HidrawError;
use crate::hidraw::Hidraw;
use crate::registry::{HidrawBackend, HotplugAction, HotplugEvent, ProbedDevice};

pub const HIDRAW_SUBSYSTEM: &str = "hidraw";

/// Production backend: lists nodes through udev and opens real hidraw devices
#[derive(Debug, Default, Clone, Copy)]
pub struct UdevBackend;

impl HidrawBackend for UdevBackend {
    fn list_nodes(&self) -> Result<Vec<PathBuf>, HidrawError> {
        let mut enumerator = Enumerator::new().map_err(HidrawError::Udev)?;
        enumerator
            .match_subsystem(HIDRAW_SUBSYSTEM)
            .map_err(HidrawError::Udev)?;

        let mut nodes: Vec<PathBuf> = enumerator
            .scan_devices()
            .map_err(HidrawError::Udev)?
            .filter_map(|device| device.devnode().map(Path::to_path_buf))
            .collect();
        nodes.sort();
        Ok(nodes)
    }

    fn probe(&self, node: &Path) -> Result<ProbedDevice, HidrawError> {
        let hidraw = Hidraw::open(node)?;
        let descriptor = hidraw.report_descriptor()?;
        let name = hidraw.name().unwrap_or_else(|e| {
            debug!("No name for {}: {}", node.display(), e);
            String::new()
        });
        let bus_info = hidraw.bus_info().ok();
        let stream = hidraw.into_stream()?;

        Ok(ProbedDevice {
            name,
            descriptor,
            bus_info,
            reader: Box::new(stream),
        })
    }
}

/// Netlink monitor yielding add/remove events for hidraw nodes
pub struct HotplugMonitor {
    socket: AsyncMonitorSocket,
}

impl HotplugMonitor {
    pub fn new() -> Result<Self, HidrawError> {
        let socket = MonitorBuilder::new()
            .and_then(|builder| builder.match_subsystem(HIDRAW_SUBSYSTEM))
            .and_then(|builder| builder.listen())
            .map_err(HidrawError::Udev)?;
        let socket = AsyncMonitorSocket::new(socket).map_err(HidrawError::Udev)?;
        Ok(Self { socket })
    }

    /// Next event that carries a device node. `None` when the socket closes.
    pub async fn next_event(&mut self) -> Option<Result<HotplugEvent, HidrawError>> {
        loop {
            let event = match self.socket.next().await? {
                Ok(event) => event,
                Err(e) => return Some(Err(HidrawError::Udev(e))),
            };

            let Some(node) = event.devnode().map(Path::to_path_buf) else {
                continue;
            };

            let action = match event.event_type() {
                EventType::Add => HotplugAction::Add,
                EventType::Remove => HotplugAction::Remove,
                other => HotplugAction::Other(format!("{other:?}").to_lowercase()),
            };

            debug!("udev {:?} {}", action, node.display());
            return Some(Ok(HotplugEvent { action, node }));
        }
    }
}
