//! Keyboard report to Report characteristic notification, end to end
//! minus D-Bus: fake hidraw nodes feed the registry, the bridge subscribes
//! on StartNotify and reports come out as `Value` changes.

mod common;

use std::path::PathBuf;
use std::time::Duration;

use ble_hid_keyboard::bridge::{self, ReportBridge};
use ble_hid_keyboard::error::GattError;
use ble_hid_keyboard::gatt::{NotifyTransition, SharedApplication};
use ble_hid_keyboard::profile::{self, HidProfile};
use common::{identity, FakeBackend, KEY_A_DOWN, KEY_A_UP};
use hidraw_keyboard::{HidReport, KeyboardRegistry, ReadEvent, SharedRegistry};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

struct Rig {
    app: SharedApplication,
    hid: HidIds,
    registry: SharedRegistry,
    read_events: mpsc::UnboundedReceiver<ReadEvent>,
    reports: mpsc::UnboundedReceiver<HidReport>,
    bridge: ReportBridge,
    keyboards: Vec<DuplexStream>,
}

struct HidIds {
    report: ble_hid_keyboard::gatt::NodeId,
    protocol_mode: ble_hid_keyboard::gatt::NodeId,
    battery_level: ble_hid_keyboard::gatt::NodeId,
}

fn rig(nodes: &[&str]) -> Rig {
    let backend = FakeBackend::default();
    let keyboards = nodes.iter().map(|n| backend.plug_keyboard(n)).collect();

    let (mut registry, read_events) = KeyboardRegistry::new(backend);
    assert_eq!(registry.enumerate().unwrap(), nodes.len());
    let registry = registry.into_shared();

    let HidProfile {
        application,
        report,
        protocol_mode,
        battery_level,
        ..
    } = profile::build(&identity()).unwrap();

    let (sink, reports) = mpsc::unbounded_channel();
    let bridge = ReportBridge::new(registry.clone(), sink);

    Rig {
        app: application.into_shared(),
        hid: HidIds {
            report,
            protocol_mode,
            battery_level,
        },
        registry,
        read_events,
        reports,
        bridge,
        keyboards,
    }
}

impl Rig {
    /// Write a report on keyboard `index` and run it through the registry
    async fn press(&mut self, index: usize, report: &[u8]) {
        self.keyboards[index].write_all(report).await.unwrap();
        let event = tokio::time::timeout(Duration::from_secs(1), self.read_events.recv())
            .await
            .expect("no reader event within 1s")
            .expect("event channel closed");
        self.registry.lock().await.handle_read_event(event);
    }

    async fn start(&self) -> Result<NotifyTransition, GattError> {
        bridge::start_notify(&self.app, self.hid.report, Some(&self.bridge)).await
    }

    async fn stop(&self) -> Result<NotifyTransition, GattError> {
        bridge::stop_notify(&self.app, self.hid.report, Some(&self.bridge)).await
    }
}

#[tokio::test]
async fn key_press_becomes_identical_notification() {
    let mut rig = rig(&["/dev/hidraw0"]);
    assert_eq!(rig.start().await.unwrap(), NotifyTransition::Started);

    rig.press(0, &KEY_A_DOWN).await;
    let report = rig.reports.try_recv().unwrap();
    assert_eq!(report.node, PathBuf::from("/dev/hidraw0"));

    let change = {
        let mut app = rig.app.lock().await;
        bridge::forward(&mut app, rig.hid.report, &report).unwrap()
    };
    assert_eq!(change.value, KEY_A_DOWN);
    assert_eq!(change.path, "/org/bluez/ble_hid_keyboard/app/service0/char4");

    // stored as the characteristic's current value too
    let app = rig.app.lock().await;
    assert_eq!(app.characteristic(rig.hid.report).unwrap().value, KEY_A_DOWN);
}

#[tokio::test]
async fn double_start_notify_subscribes_once() {
    let mut rig = rig(&["/dev/hidraw0"]);
    assert_eq!(rig.start().await.unwrap(), NotifyTransition::Started);
    assert_eq!(rig.start().await.unwrap(), NotifyTransition::Unchanged);
    assert!(rig.bridge.is_active().await);

    rig.press(0, &KEY_A_DOWN).await;
    assert_eq!(rig.reports.try_recv().unwrap().data, KEY_A_DOWN);
    assert!(rig.reports.try_recv().is_err());
}

#[tokio::test]
async fn stop_notify_unsubscribes() {
    let mut rig = rig(&["/dev/hidraw0"]);
    rig.start().await.unwrap();
    assert_eq!(rig.stop().await.unwrap(), NotifyTransition::Stopped);
    assert!(!rig.bridge.is_active().await);
    assert_eq!(rig.stop().await.unwrap(), NotifyTransition::Unchanged);

    rig.press(0, &KEY_A_DOWN).await;
    assert!(rig.reports.try_recv().is_err());
}

#[tokio::test]
async fn two_keyboards_share_one_report_characteristic() {
    let mut rig = rig(&["/dev/hidraw0", "/dev/hidraw3"]);
    rig.start().await.unwrap();

    rig.press(1, &KEY_A_DOWN).await;
    rig.press(0, &KEY_A_UP).await;

    let first = rig.reports.try_recv().unwrap();
    let second = rig.reports.try_recv().unwrap();
    assert_eq!(first.node, PathBuf::from("/dev/hidraw3"));
    assert_eq!(first.data, KEY_A_DOWN);
    assert_eq!(second.node, PathBuf::from("/dev/hidraw0"));
    assert_eq!(second.data, KEY_A_UP);

    let mut app = rig.app.lock().await;
    for report in [first, second] {
        let change = bridge::forward(&mut app, rig.hid.report, &report).unwrap();
        assert_eq!(change.value, report.data);
    }
}

#[tokio::test]
async fn notify_rejected_on_characteristics_without_notify() {
    let rig = rig(&[]);
    let err = bridge::start_notify(&rig.app, rig.hid.protocol_mode, None)
        .await
        .unwrap_err();
    assert!(matches!(err, GattError::NotSupported(_)));
    assert!(!rig.bridge.is_active().await);

    // battery level notifies but is not wired to the registry
    let transition = bridge::start_notify(&rig.app, rig.hid.battery_level, None)
        .await
        .unwrap();
    assert_eq!(transition, NotifyTransition::Started);
    assert!(!rig.bridge.is_active().await);
}

#[tokio::test]
async fn reports_in_flight_at_drain_are_dropped() {
    let mut rig = rig(&["/dev/hidraw0"]);
    rig.start().await.unwrap();

    rig.keyboards[0].write_all(&KEY_A_DOWN).await.unwrap();
    let in_flight = tokio::time::timeout(Duration::from_secs(1), rig.read_events.recv())
        .await
        .unwrap()
        .unwrap();

    rig.registry.lock().await.drain();
    assert!(rig.registry.lock().await.is_empty());
    assert!(!rig.bridge.is_active().await);

    rig.registry.lock().await.handle_read_event(in_flight);
    assert!(rig.reports.try_recv().is_err());
}
