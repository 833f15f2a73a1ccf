//! Keyboard registry.
//!
//! Owns every accepted hidraw keyboard, keyed by device node, and fans their
//! input reports into one subscriber. Each keyboard gets a reader task that
//! waits on fd readiness; the task's handle is the keyboard's watch and
//! aborting it closes the node. Reader tasks never touch registry state:
//! they post [`ReadEvent`]s that the owner of the registry feeds back through
//! [`KeyboardRegistry::handle_read_event`] from its event loop.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::descriptor::{self, Classification};
use crate::error::HidrawError;
use crate::hidraw::BusInfo;

/// Bytes requested per read; hidraw returns at most one report per read
pub const READ_CHUNK_SIZE: usize = 4096;

/// A raw input report read verbatim from a keyboard node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HidReport {
    pub node: PathBuf,
    pub data: Vec<u8>,
}

/// Where fanned-in reports are delivered
pub type ReportSink = mpsc::UnboundedSender<HidReport>;

/// Registry shared between the event loop and the D-Bus objects
pub type SharedRegistry = Arc<Mutex<KeyboardRegistry>>;

/// Event posted by a keyboard reader task
#[derive(Debug)]
pub enum ReadEvent {
    Report {
        session: u64,
        report: HidReport,
    },
    /// The stream ended (zero-length read) or failed
    Closed {
        session: u64,
        node: PathBuf,
        error: Option<io::Error>,
    },
}

/// Hot-plug action reported by the device manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HotplugAction {
    Add,
    Remove,
    Other(String),
}

impl From<&str> for HotplugAction {
    fn from(action: &str) -> Self {
        match action {
            "add" => Self::Add,
            "remove" => Self::Remove,
            other => Self::Other(other.to_string()),
        }
    }
}

/// A hot-plug notification for one device node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotplugEvent {
    pub action: HotplugAction,
    pub node: PathBuf,
}

/// Per-node state as seen by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Unknown,
    /// Not a keyboard (or unreadable); skipped until the node is removed
    Ignored,
    Watching,
}

/// A device that has been opened and queried but not yet classified
pub struct ProbedDevice {
    pub name: String,
    pub descriptor: Vec<u8>,
    pub bus_info: Option<BusInfo>,
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
}

/// Source of hidraw nodes. The production backend enumerates via udev and
/// opens real nodes; tests substitute in-memory streams.
pub trait HidrawBackend: Send {
    /// Device nodes currently present
    fn list_nodes(&self) -> Result<Vec<PathBuf>, HidrawError>;

    /// Open a node and fetch what the registry needs to classify it
    fn probe(&self, node: &Path) -> Result<ProbedDevice, HidrawError>;
}

/// An accepted keyboard with a live reader task
pub struct Keyboard {
    node: PathBuf,
    name: String,
    descriptor: Vec<u8>,
    bus_info: Option<BusInfo>,
    session: u64,
    reader: JoinHandle<()>,
}

impl Keyboard {
    pub fn node(&self) -> &Path {
        &self.node
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn descriptor(&self) -> &[u8] {
        &self.descriptor
    }

    pub fn bus_info(&self) -> Option<BusInfo> {
        self.bus_info
    }
}

impl fmt::Debug for Keyboard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Keyboard")
            .field("node", &self.node)
            .field("name", &self.name)
            .field("bus_info", &self.bus_info)
            .field("session", &self.session)
            .finish()
    }
}

impl Drop for Keyboard {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Tracks keyboards by node and multiplexes their reports
pub struct KeyboardRegistry {
    backend: Box<dyn HidrawBackend>,
    keyboards: HashMap<PathBuf, Keyboard>,
    ignored: HashSet<PathBuf>,
    subscriber: Option<ReportSink>,
    events: mpsc::UnboundedSender<ReadEvent>,
    next_session: u64,
}

impl KeyboardRegistry {
    /// Create an empty registry. The returned receiver carries reader-task
    /// events and must be drained into [`Self::handle_read_event`].
    pub fn new(
        backend: impl HidrawBackend + 'static,
    ) -> (Self, mpsc::UnboundedReceiver<ReadEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let registry = Self {
            backend: Box::new(backend),
            keyboards: HashMap::new(),
            ignored: HashSet::new(),
            subscriber: None,
            events,
            next_session: 1,
        };
        (registry, events_rx)
    }

    /// Wrap for sharing with the D-Bus side
    pub fn into_shared(self) -> SharedRegistry {
        Arc::new(Mutex::new(self))
    }

    /// Probe every present node and start watching the keyboards.
    /// Returns the number of keyboards being watched afterwards.
    pub fn enumerate(&mut self) -> Result<usize, HidrawError> {
        let nodes = self.backend.list_nodes()?;
        debug!("Enumerating {} hidraw nodes", nodes.len());
        for node in nodes {
            self.add(&node);
        }
        info!("Watching {} keyboard(s)", self.keyboards.len());
        Ok(self.keyboards.len())
    }

    /// Apply a hot-plug notification
    pub fn on_hotplug(&mut self, event: &HotplugEvent) {
        match &event.action {
            HotplugAction::Add => {
                self.add(&event.node);
            }
            HotplugAction::Remove => {
                self.remove(&event.node);
            }
            HotplugAction::Other(action) => {
                debug!("Ignoring {} event for {}", action, event.node.display());
            }
        }
    }

    /// Accept/open/watch sequence for a single node
    pub fn add(&mut self, node: &Path) -> DeviceState {
        if self.keyboards.contains_key(node) {
            debug!("{} already watched", node.display());
            return DeviceState::Watching;
        }
        if self.ignored.contains(node) {
            return DeviceState::Ignored;
        }

        let probed = match self.backend.probe(node) {
            Ok(probed) => probed,
            Err(e) => {
                warn!("Skipping {}: {}", node.display(), e);
                self.ignored.insert(node.to_path_buf());
                return DeviceState::Ignored;
            }
        };

        if descriptor::classify(&probed.descriptor) == Classification::Ignored {
            info!(
                "{} ({}) is not a keyboard, ignoring",
                node.display(),
                probed.name
            );
            self.ignored.insert(node.to_path_buf());
            return DeviceState::Ignored;
        }

        let session = self.next_session;
        self.next_session += 1;

        let reader = tokio::spawn(read_reports(
            node.to_path_buf(),
            session,
            probed.reader,
            self.events.clone(),
        ));

        match probed.bus_info {
            Some(bus) => info!("Keyboard {} - {} ({})", node.display(), probed.name, bus),
            None => info!("Keyboard {} - {}", node.display(), probed.name),
        }
        debug!("Descriptor: {}", descriptor::to_hex(&probed.descriptor));

        self.keyboards.insert(
            node.to_path_buf(),
            Keyboard {
                node: node.to_path_buf(),
                name: probed.name,
                descriptor: probed.descriptor,
                bus_info: probed.bus_info,
                session,
                reader,
            },
        );
        DeviceState::Watching
    }

    /// Close and evict a node. Unknown nodes are a no-op.
    /// Returns whether a keyboard was removed.
    pub fn remove(&mut self, node: &Path) -> bool {
        self.ignored.remove(node);
        match self.keyboards.remove(node) {
            Some(keyboard) => {
                info!("Keyboard removed: {} - {}", node.display(), keyboard.name);
                true
            }
            None => false,
        }
    }

    /// Register the single report subscriber. A second call replaces the
    /// first, so there is never more than one delivery per report.
    pub fn watch(&mut self, sink: ReportSink) {
        if self.subscriber.replace(sink).is_some() {
            debug!("Report subscriber replaced");
        } else {
            info!("HID keyboard report watching started");
        }
    }

    /// Drop the report subscriber
    pub fn unwatch(&mut self) {
        if self.subscriber.take().is_some() {
            info!("HID keyboard report watching stopped");
        }
    }

    pub fn is_watched(&self) -> bool {
        self.subscriber.is_some()
    }

    /// Route one reader-task event: reports go to the subscriber, stream
    /// ends evict the node. Events from a previous session of the same node
    /// are discarded.
    pub fn handle_read_event(&mut self, event: ReadEvent) {
        match event {
            ReadEvent::Report { session, report } => {
                if !self.is_current(&report.node, session) {
                    trace!("Dropping stale report from {}", report.node.display());
                    return;
                }
                trace!("{}: {:02x?}", report.node.display(), report.data);
                if let Some(sink) = &self.subscriber {
                    if sink.send(report).is_err() {
                        debug!("Report subscriber went away");
                        self.subscriber = None;
                    }
                }
            }
            ReadEvent::Closed {
                session,
                node,
                error,
            } => {
                if !self.is_current(&node, session) {
                    return;
                }
                match error {
                    Some(e) => warn!("Read from {} failed: {}", node.display(), e),
                    None => info!("{} reached end of stream", node.display()),
                }
                self.remove(&node);
            }
        }
    }

    fn is_current(&self, node: &Path, session: u64) -> bool {
        self.keyboards
            .get(node)
            .is_some_and(|kb| kb.session == session)
    }

    pub fn state(&self, node: &Path) -> DeviceState {
        if self.keyboards.contains_key(node) {
            DeviceState::Watching
        } else if self.ignored.contains(node) {
            DeviceState::Ignored
        } else {
            DeviceState::Unknown
        }
    }

    pub fn keyboards(&self) -> impl Iterator<Item = &Keyboard> {
        self.keyboards.values()
    }

    pub fn len(&self) -> usize {
        self.keyboards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyboards.is_empty()
    }

    /// Close every keyboard and forget the subscriber (shutdown path)
    pub fn drain(&mut self) {
        let count = self.keyboards.len();
        self.keyboards.clear();
        self.ignored.clear();
        self.subscriber = None;
        if count > 0 {
            info!("Closed {} keyboard(s)", count);
        }
    }
}

async fn read_reports(
    node: PathBuf,
    session: u64,
    mut reader: Box<dyn AsyncRead + Send + Unpin>,
    events: mpsc::UnboundedSender<ReadEvent>,
) {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => {
                let _ = events.send(ReadEvent::Closed {
                    session,
                    node,
                    error: None,
                });
                return;
            }
            Ok(len) => {
                let report = HidReport {
                    node: node.clone(),
                    data: buf[..len].to_vec(),
                };
                if events.send(ReadEvent::Report { session, report }).is_err() {
                    return;
                }
            }
            Err(e) => {
                let _ = events.send(ReadEvent::Closed {
                    session,
                    node,
                    error: Some(e),
                });
                return;
            }
        }
    }
}
