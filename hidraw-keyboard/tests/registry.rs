//! Registry lifecycle and report fan-in against in-memory hidraw nodes.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use hidraw_keyboard::{
    DeviceState, HidReport, HidrawBackend, HidrawError, HotplugAction, HotplugEvent,
    KeyboardRegistry, ProbedDevice, ReadEvent, KEYBOARD_DESCRIPTOR_PREFIX,
};
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::sync::mpsc;

const KEY_A_DOWN: [u8; 8] = [0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
const MOUSE_DESCRIPTOR: [u8; 8] = [0x05, 0x01, 0x09, 0x02, 0xa1, 0x01, 0x09, 0x01];

struct FakeDevice {
    descriptor: Vec<u8>,
    reader: Option<DuplexStream>,
}

/// Backend serving duplex streams; the test keeps the writing half.
#[derive(Clone, Default)]
struct FakeBackend {
    devices: Arc<StdMutex<BTreeMap<PathBuf, FakeDevice>>>,
}

impl FakeBackend {
    fn plug(&self, node: &str, descriptor: &[u8]) -> DuplexStream {
        let (reader, writer) = tokio::io::duplex(256);
        self.devices.lock().unwrap().insert(
            PathBuf::from(node),
            FakeDevice {
                descriptor: descriptor.to_vec(),
                reader: Some(reader),
            },
        );
        writer
    }

    fn keyboard_descriptor() -> Vec<u8> {
        let mut desc = KEYBOARD_DESCRIPTOR_PREFIX.to_vec();
        desc.extend_from_slice(&[0x29, 0xe7, 0x15, 0x00, 0x25, 0x01]);
        desc
    }
}

impl HidrawBackend for FakeBackend {
    fn list_nodes(&self) -> Result<Vec<PathBuf>, HidrawError> {
        Ok(self.devices.lock().unwrap().keys().cloned().collect())
    }

    fn probe(&self, node: &Path) -> Result<ProbedDevice, HidrawError> {
        let mut devices = self.devices.lock().unwrap();
        let device = devices.get_mut(node).ok_or_else(|| HidrawError::Open {
            path: node.to_path_buf(),
            source: io::Error::from(io::ErrorKind::NotFound),
        })?;
        let reader = device.reader.take().ok_or_else(|| HidrawError::Open {
            path: node.to_path_buf(),
            source: io::Error::from(io::ErrorKind::ResourceBusy),
        })?;
        Ok(ProbedDevice {
            name: format!("Fake {}", node.display()),
            descriptor: device.descriptor.clone(),
            bus_info: None,
            reader: Box::new(reader),
        })
    }
}

async fn pump(registry: &mut KeyboardRegistry, events: &mut mpsc::UnboundedReceiver<ReadEvent>) {
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no reader event within 1s")
        .expect("event channel closed");
    registry.handle_read_event(event);
}

#[tokio::test]
async fn enumerate_accepts_only_keyboards() {
    let backend = FakeBackend::default();
    let _kb = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());
    let _mouse = backend.plug("/dev/hidraw1", &MOUSE_DESCRIPTOR);

    let (mut registry, _events) = KeyboardRegistry::new(backend);
    assert_eq!(registry.enumerate().unwrap(), 1);

    assert_eq!(registry.state(Path::new("/dev/hidraw0")), DeviceState::Watching);
    assert_eq!(registry.state(Path::new("/dev/hidraw1")), DeviceState::Ignored);

    let kb = registry.keyboards().next().unwrap();
    assert_eq!(kb.node(), Path::new("/dev/hidraw0"));
    assert_eq!(kb.name(), "Fake /dev/hidraw0");
    assert!(kb.descriptor().starts_with(&KEYBOARD_DESCRIPTOR_PREFIX));
}

#[tokio::test]
async fn report_is_forwarded_verbatim() {
    let backend = FakeBackend::default();
    let mut writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, mut events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.watch(tx);

    writer.write_all(&KEY_A_DOWN).await.unwrap();
    pump(&mut registry, &mut events).await;

    let report = rx.try_recv().expect("report not delivered");
    assert_eq!(
        report,
        HidReport {
            node: PathBuf::from("/dev/hidraw0"),
            data: KEY_A_DOWN.to_vec(),
        }
    );
}

#[tokio::test]
async fn double_watch_delivers_once() {
    let backend = FakeBackend::default();
    let mut writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, mut events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.watch(tx.clone());
    registry.watch(tx);

    writer.write_all(&KEY_A_DOWN).await.unwrap();
    pump(&mut registry, &mut events).await;

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn reports_without_subscriber_are_dropped() {
    let backend = FakeBackend::default();
    let mut writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, mut events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();

    writer.write_all(&KEY_A_DOWN).await.unwrap();
    pump(&mut registry, &mut events).await;

    // Subscribing later must not replay the earlier report
    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.watch(tx);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn multiple_keyboards_fan_in() {
    let backend = FakeBackend::default();
    let mut first = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());
    let mut second = backend.plug("/dev/hidraw3", &FakeBackend::keyboard_descriptor());

    let (mut registry, mut events) = KeyboardRegistry::new(backend);
    assert_eq!(registry.enumerate().unwrap(), 2);

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.watch(tx);

    first.write_all(&KEY_A_DOWN).await.unwrap();
    pump(&mut registry, &mut events).await;
    second.write_all(&[0x02, 0, 0x05, 0, 0, 0, 0, 0]).await.unwrap();
    pump(&mut registry, &mut events).await;

    let mut nodes: Vec<PathBuf> = vec![rx.try_recv().unwrap().node, rx.try_recv().unwrap().node];
    nodes.sort();
    assert_eq!(
        nodes,
        vec![PathBuf::from("/dev/hidraw0"), PathBuf::from("/dev/hidraw3")]
    );
}

#[tokio::test]
async fn remove_is_idempotent() {
    let backend = FakeBackend::default();
    let _writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, _events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();

    let remove = HotplugEvent {
        action: HotplugAction::Remove,
        node: PathBuf::from("/dev/hidraw0"),
    };
    registry.on_hotplug(&remove);
    registry.on_hotplug(&remove);
    assert!(registry.is_empty());

    assert!(!registry.remove(Path::new("/dev/hidraw9")));
    assert_eq!(registry.state(Path::new("/dev/hidraw9")), DeviceState::Unknown);
}

#[tokio::test]
async fn hotplug_add_watches_new_keyboard() {
    let backend = FakeBackend::default();
    let (mut registry, _events) = KeyboardRegistry::new(backend.clone());
    assert_eq!(registry.enumerate().unwrap(), 0);

    let _writer = backend.plug("/dev/hidraw4", &FakeBackend::keyboard_descriptor());
    registry.on_hotplug(&HotplugEvent {
        action: HotplugAction::Add,
        node: PathBuf::from("/dev/hidraw4"),
    });

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.state(Path::new("/dev/hidraw4")), DeviceState::Watching);
}

#[tokio::test]
async fn end_of_stream_removes_keyboard() {
    let backend = FakeBackend::default();
    let writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, mut events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();
    assert_eq!(registry.len(), 1);

    drop(writer);
    pump(&mut registry, &mut events).await;

    assert!(registry.is_empty());
    assert_eq!(registry.state(Path::new("/dev/hidraw0")), DeviceState::Unknown);
}

#[tokio::test]
async fn stale_session_events_are_discarded() {
    let backend = FakeBackend::default();
    let _writer = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());

    let (mut registry, _events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    registry.watch(tx);

    registry.handle_read_event(ReadEvent::Report {
        session: 9999,
        report: HidReport {
            node: PathBuf::from("/dev/hidraw0"),
            data: KEY_A_DOWN.to_vec(),
        },
    });
    registry.handle_read_event(ReadEvent::Closed {
        session: 9999,
        node: PathBuf::from("/dev/hidraw0"),
        error: None,
    });

    assert!(rx.try_recv().is_err());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn drain_closes_everything() {
    let backend = FakeBackend::default();
    let _a = backend.plug("/dev/hidraw0", &FakeBackend::keyboard_descriptor());
    let _b = backend.plug("/dev/hidraw1", &FakeBackend::keyboard_descriptor());

    let (mut registry, _events) = KeyboardRegistry::new(backend);
    registry.enumerate().unwrap();
    let (tx, _rx) = mpsc::unbounded_channel();
    registry.watch(tx);

    registry.drain();
    assert!(registry.is_empty());
    assert!(!registry.is_watched());
}
