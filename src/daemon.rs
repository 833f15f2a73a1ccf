//! Daemon orchestrator: wires the registry, the GATT application, the
//! advertisement and the pairing agent together, then runs one event loop
//! until interrupted.

use futures::{Stream, StreamExt};
use hidraw_keyboard::{
    HidReport, HidrawBackend, HidrawError, HotplugEvent, HotplugMonitor, KeyboardRegistry,
    ReadEvent, SharedRegistry, UdevBackend,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use zbus::fdo::{PropertiesChanged, PropertiesProxy};
use zbus::zvariant::{ObjectPath, OwnedObjectPath};
use zbus::Connection;

use crate::advertisement::Advertisement;
use crate::agent::{self, KeyReaders, AGENT_PATH};
use crate::bluez::{self, Adapter1Proxy, AgentManager1Proxy, BLUEZ_SERVICE};
use crate::bridge::{self, ReportBridge};
use crate::config::Config;
use crate::error::Result;
use crate::gatt::{NodeId, SharedApplication};
use crate::profile::{self, DeviceIdentity};

/// Capacity of the agent command queue; BlueZ runs one pairing at a time
const AGENT_QUEUE: usize = 4;

/// Everything that has to be undone on the way out
struct Session {
    conn: Connection,
    adapter: OwnedObjectPath,
    app_path: String,
    app_registered: bool,
    advertising: bool,
    agent: Option<JoinHandle<()>>,
}

impl Session {
    async fn shutdown(mut self, registry: &SharedRegistry) {
        info!("Shutting down");
        if self.app_registered {
            let result =
                bluez::unregister_application(&self.conn, &self.adapter, &self.app_path).await;
            if let Err(e) = result {
                debug!("Unregister application: {}", e);
            }
        }
        if self.advertising {
            if let Err(e) = bluez::unregister_advertisement(&self.conn, &self.adapter).await {
                debug!("Unregister advertisement: {}", e);
            }
        }
        if let Some(task) = self.agent.take() {
            if let Err(e) = unregister_agent(&self.conn).await {
                debug!("Unregister agent: {}", e);
            }
            task.abort();
        }

        match Adapter1Proxy::new(&self.conn, self.adapter.clone()).await {
            Ok(adapter) => match adapter.set_powered(false).await {
                Ok(()) => info!("Adapter {} powered off", self.adapter.as_str()),
                Err(e) => error!("Failed to power off {}: {}", self.adapter.as_str(), e),
            },
            Err(e) => error!("Failed to reach {}: {}", self.adapter.as_str(), e),
        }

        registry.lock().await.drain();
    }
}

async fn unregister_agent(conn: &Connection) -> zbus::Result<()> {
    let manager = AgentManager1Proxy::new(conn).await?;
    manager.unregister_agent(&ObjectPath::try_from(AGENT_PATH)?).await
}

async fn resolve_adapter(conn: &Connection, config: &Config) -> Result<OwnedObjectPath> {
    match &config.bluetooth.adapter {
        Some(path) => Ok(OwnedObjectPath::try_from(path.as_str()).map_err(zbus::Error::from)?),
        None => bluez::find_adapter(conn).await,
    }
}

/// Power the adapter on and give it the display name
async fn prepare_adapter(conn: &Connection, adapter: &OwnedObjectPath, name: &str) -> Result<()> {
    let proxy = Adapter1Proxy::new(conn, adapter.clone()).await?;
    proxy.set_powered(true).await?;
    match proxy.address().await {
        Ok(address) => info!("Adapter {} ({}) powered on", adapter.as_str(), address),
        Err(_) => info!("Adapter {} powered on", adapter.as_str()),
    }
    if let Err(e) = proxy.set_alias(name).await {
        warn!("Could not set adapter alias to {:?}: {}", name, e);
    }
    Ok(())
}

async fn set_discoverable(conn: &Connection, adapter: &OwnedObjectPath) -> Result<()> {
    let proxy = Adapter1Proxy::new(conn, adapter.clone()).await?;
    proxy.set_discoverable(true).await?;
    info!("Adapter is discoverable");
    Ok(())
}

/// Start the passkey collector and register the agent. The returned task
/// lives as long as the daemon.
async fn start_agent(conn: &Connection) -> JoinHandle<()> {
    let (keys_tx, keys_rx) = mpsc::unbounded_channel();
    let readers = KeyReaders::new(keys_tx);
    match readers.rescan() {
        0 => warn!("No local keyboard found for passkey entry yet"),
        n => debug!("Reading passkeys from {} input devices", n),
    }

    let (commands_tx, commands_rx) = mpsc::channel(AGENT_QUEUE);
    let task = tokio::spawn(agent::collect_passkeys(commands_rx, keys_rx, move || {
        let added = readers.rescan();
        if added > 0 {
            debug!("{} new passkey input device(s)", added);
        }
    }));
    if let Err(e) = bluez::register_agent(conn, commands_tx).await {
        error!("Agent registration failed: {}", e);
    }
    task
}

async fn watch_adapter(
    conn: &Connection,
    adapter: &OwnedObjectPath,
) -> zbus::Result<impl Stream<Item = PropertiesChanged> + Unpin> {
    let proxy = PropertiesProxy::builder(conn)
        .destination(BLUEZ_SERVICE)?
        .path(adapter.clone())?
        .build()
        .await?;
    proxy.receive_properties_changed().await
}

fn log_adapter_change(signal: PropertiesChanged) {
    match signal.args() {
        Ok(args) => {
            for (name, value) in args.changed_properties() {
                info!("Adapter {} changed: {:?}", name, value);
            }
        }
        Err(e) => debug!("Malformed adapter PropertiesChanged: {}", e),
    }
}

/// Next item of an optional stream; never resolves once the stream is gone
async fn next_item<S: Stream + Unpin>(stream: &mut Option<S>) -> Option<S::Item> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn next_hotplug(
    monitor: &mut Option<HotplugMonitor>,
) -> Option<std::result::Result<HotplugEvent, HidrawError>> {
    match monitor {
        Some(monitor) => monitor.next_event().await,
        None => std::future::pending().await,
    }
}

fn install_signal_handler() -> mpsc::UnboundedReceiver<()> {
    let (tx, rx) = mpsc::unbounded_channel();
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(());
    }) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }
    rx
}

/// Keyboard registry plus the hot-plug monitor feeding it
pub struct Discovery<M> {
    pub registry: KeyboardRegistry,
    pub read_events: mpsc::UnboundedReceiver<ReadEvent>,
    pub hotplug: Option<M>,
}

/// Open the hot-plug monitor, then enumerate. A keyboard plugged in between
/// the two shows up in both; the registry ignores the second add.
pub fn discover_keyboards<M>(
    backend: impl HidrawBackend + 'static,
    open_monitor: impl FnOnce() -> std::result::Result<M, HidrawError>,
) -> Discovery<M> {
    let (mut registry, read_events) = KeyboardRegistry::new(backend);
    let hotplug = match open_monitor() {
        Ok(monitor) => Some(monitor),
        Err(e) => {
            warn!("Hot-plug monitoring unavailable: {}", e);
            None
        }
    };
    match registry.enumerate() {
        Ok(count) => info!("{} keyboard(s) found", count),
        Err(e) => warn!("Keyboard enumeration failed: {}", e),
    }
    Discovery {
        registry,
        read_events,
        hotplug,
    }
}

/// The exported GATT application and the reports bound for it
struct Gatt {
    app: SharedApplication,
    report_char: NodeId,
    reports: mpsc::UnboundedReceiver<HidReport>,
}

/// Export the profile, start the agent and advertising, then register the
/// application. Whatever got set up is recorded in `session`.
async fn start(session: &mut Session, config: &Config, registry: &SharedRegistry) -> Result<Gatt> {
    let conn = session.conn.clone();
    let adapter = session.adapter.clone();

    let identity = DeviceIdentity::from(config);
    let hid = profile::build(&identity)?;
    let report_char = hid.report;
    let app = hid.application.into_shared();
    session.app_path = app.lock().await.base_path().to_string();

    let (reports_tx, reports) = mpsc::unbounded_channel();
    let report_bridge = ReportBridge::new(registry.clone(), reports_tx);
    let exported = bluez::export_application(&conn, &app, report_char, report_bridge).await?;
    debug!("{} GATT objects exported under {}", exported, session.app_path);

    let discoverable = config.discoverable();
    if discoverable {
        session.agent = Some(start_agent(&conn).await);
    }

    let advertisement = Advertisement::new(config.bluetooth.name.clone(), discoverable);
    match bluez::register_advertisement(&conn, &adapter, advertisement).await {
        Ok(()) => {
            session.advertising = true;
            if discoverable {
                if let Err(e) = set_discoverable(&conn, &adapter).await {
                    error!("Failed to make adapter discoverable: {}", e);
                }
            }
        }
        Err(e) => error!("Advertisement registration failed: {}", e),
    }

    bluez::register_application(&conn, &adapter, &session.app_path).await?;
    session.app_registered = true;

    Ok(Gatt {
        app,
        report_char,
        reports,
    })
}

/// Run the bridge until Ctrl-C
pub async fn run(config: Config) -> Result<()> {
    let shutdown = install_signal_handler();
    let discovery = discover_keyboards(UdevBackend, HotplugMonitor::new);
    let conn = Connection::system().await?;
    serve(conn, config, discovery, shutdown).await
}

/// Bridge on `conn` until `shutdown` yields. Once the adapter is powered on,
/// every exit path goes through [`Session::shutdown`].
pub async fn serve(
    conn: Connection,
    config: Config,
    discovery: Discovery<HotplugMonitor>,
    mut shutdown: mpsc::UnboundedReceiver<()>,
) -> Result<()> {
    let Discovery {
        registry,
        mut read_events,
        mut hotplug,
    } = discovery;
    let registry = registry.into_shared();

    let adapter = resolve_adapter(&conn, &config).await?;
    prepare_adapter(&conn, &adapter, &config.bluetooth.name).await?;

    let mut session = Session {
        conn: conn.clone(),
        adapter: adapter.clone(),
        app_path: String::new(),
        app_registered: false,
        advertising: false,
        agent: None,
    };

    let Gatt {
        app,
        report_char,
        mut reports,
    } = match start(&mut session, &config, &registry).await {
        Ok(gatt) => gatt,
        Err(e) => {
            error!("Startup failed: {}", e);
            session.shutdown(&registry).await;
            return Err(e);
        }
    };

    let mut adapter_changes = match watch_adapter(&conn, &adapter).await {
        Ok(stream) => Some(stream),
        Err(e) => {
            warn!("Not watching adapter properties: {}", e);
            None
        }
    };
    info!("Ready. Ctrl+C to stop.");

    loop {
        tokio::select! {
            Some(()) = shutdown.recv() => break,
            Some(event) = read_events.recv() => {
                registry.lock().await.handle_read_event(event);
            }
            Some(report) = reports.recv() => {
                forward_report(&conn, &app, report_char, report).await;
            }
            event = next_hotplug(&mut hotplug) => match event {
                Some(Ok(event)) => registry.lock().await.on_hotplug(&event),
                Some(Err(e)) => warn!("Hot-plug event error: {}", e),
                None => {
                    warn!("Hot-plug monitor closed");
                    hotplug = None;
                }
            },
            change = next_item(&mut adapter_changes) => match change {
                Some(change) => log_adapter_change(change),
                None => {
                    debug!("Adapter property stream ended");
                    adapter_changes = None;
                }
            },
        }
    }

    session.shutdown(&registry).await;
    Ok(())
}

async fn forward_report(
    conn: &Connection,
    app: &SharedApplication,
    report_char: NodeId,
    report: HidReport,
) {
    let change = {
        let mut tree = app.lock().await;
        bridge::forward(&mut tree, report_char, &report)
    };
    match change {
        Ok(change) => {
            if let Err(e) = bluez::emit_value_changed(conn, &change).await {
                warn!("Report notification failed: {}", e);
            }
        }
        Err(e) => warn!("Report from {} dropped: {}", report.node.display(), e),
    }
}
