//! Shared fixtures: in-memory hidraw nodes and in-process D-Bus peers.
#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use ble_hid_keyboard::profile::DeviceIdentity;
use hidraw_keyboard::{
    HidrawBackend, HidrawError, KeyboardRegistry, ProbedDevice, ReadEvent,
    KEYBOARD_DESCRIPTOR_PREFIX,
};
use tokio::io::DuplexStream;
use tokio::sync::mpsc;
use zbus::connection::Builder;
use zbus::{Connection, Guid};

pub const KEY_A_DOWN: [u8; 8] = [0x00, 0x00, 0x04, 0x00, 0x00, 0x00, 0x00, 0x00];
pub const KEY_A_UP: [u8; 8] = [0u8; 8];

/// Keyboards backed by duplex pipes; the test writes reports into the
/// returned half.
#[derive(Clone, Default)]
pub struct FakeBackend {
    devices: Arc<StdMutex<BTreeMap<PathBuf, Option<DuplexStream>>>>,
    listings: Arc<AtomicUsize>,
}

impl FakeBackend {
    pub fn plug_keyboard(&self, node: &str) -> DuplexStream {
        let (reader, writer) = tokio::io::duplex(64);
        self.devices
            .lock()
            .unwrap()
            .insert(PathBuf::from(node), Some(reader));
        writer
    }

    /// How many times the node list was read
    pub fn listings(&self) -> usize {
        self.listings.load(Ordering::SeqCst)
    }
}

impl HidrawBackend for FakeBackend {
    fn list_nodes(&self) -> Result<Vec<PathBuf>, HidrawError> {
        self.listings.fetch_add(1, Ordering::SeqCst);
        Ok(self.devices.lock().unwrap().keys().cloned().collect())
    }

    fn probe(&self, node: &Path) -> Result<ProbedDevice, HidrawError> {
        let reader = self
            .devices
            .lock()
            .unwrap()
            .get_mut(node)
            .and_then(Option::take)
            .ok_or_else(|| HidrawError::Open {
                path: node.to_path_buf(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })?;
        let mut descriptor = KEYBOARD_DESCRIPTOR_PREFIX.to_vec();
        descriptor.extend_from_slice(&[0x29, 0xe7]);
        Ok(ProbedDevice {
            name: "Fake keyboard".to_string(),
            descriptor,
            bus_info: None,
            reader: Box::new(reader),
        })
    }
}

pub fn identity() -> DeviceIdentity {
    DeviceIdentity {
        manufacturer: "Test".to_string(),
        product: "Test Keyboard".to_string(),
        version: "0.0.1".to_string(),
    }
}

/// Wait for one reader event and apply it
pub async fn pump(registry: &mut KeyboardRegistry, events: &mut mpsc::UnboundedReceiver<ReadEvent>) {
    let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
        .await
        .expect("no reader event within 1s")
        .expect("event channel closed");
    registry.handle_read_event(event);
}

/// Two connections talking to each other over a socketpair, no bus daemon.
/// Returns (service side, client side).
pub async fn p2p_pair() -> (Connection, Connection) {
    let guid = Guid::generate();
    let (service, client) = tokio::net::UnixStream::pair().unwrap();
    futures::try_join!(
        Builder::unix_stream(service).server(guid).unwrap().p2p().build(),
        Builder::unix_stream(client).p2p().build(),
    )
    .unwrap()
}
