//! Link between the Report characteristic and the keyboard registry.
//!
//! StartNotify on the Report characteristic subscribes the bridge's sink to
//! the registry; the daemon loop drains that sink and turns every report into
//! a `Value` change on the characteristic.

use hidraw_keyboard::{HidReport, ReportSink, SharedRegistry};
use tracing::trace;

use crate::error::GattError;
use crate::gatt::{Application, NodeId, NotifyTransition, SharedApplication, ValueChanged};

#[derive(Clone)]
pub struct ReportBridge {
    registry: SharedRegistry,
    sink: ReportSink,
}

impl ReportBridge {
    pub fn new(registry: SharedRegistry, sink: ReportSink) -> Self {
        Self { registry, sink }
    }

    /// Subscribe to keyboard reports. Repeated calls keep one subscription.
    pub async fn start(&self) {
        self.registry.lock().await.watch(self.sink.clone());
    }

    pub async fn stop(&self) {
        self.registry.lock().await.unwatch();
    }

    pub async fn is_active(&self) -> bool {
        self.registry.lock().await.is_watched()
    }
}

/// StartNotify on `id`. Only the first subscription reaches the bridge.
pub async fn start_notify(
    app: &SharedApplication,
    id: NodeId,
    bridge: Option<&ReportBridge>,
) -> Result<NotifyTransition, GattError> {
    let transition = app.lock().await.start_notify(id)?;
    if transition == NotifyTransition::Started {
        if let Some(bridge) = bridge {
            bridge.start().await;
        }
    }
    Ok(transition)
}

pub async fn stop_notify(
    app: &SharedApplication,
    id: NodeId,
    bridge: Option<&ReportBridge>,
) -> Result<NotifyTransition, GattError> {
    let transition = app.lock().await.stop_notify(id)?;
    if transition == NotifyTransition::Stopped {
        if let Some(bridge) = bridge {
            bridge.stop().await;
        }
    }
    Ok(transition)
}

/// Publish one keyboard report on the Report characteristic, byte for byte
pub fn forward(
    app: &mut Application,
    report_char: NodeId,
    report: &HidReport,
) -> Result<ValueChanged, GattError> {
    trace!("{} -> {:02x?}", report.node.display(), report.data);
    app.send(report_char, &report.data)
}
