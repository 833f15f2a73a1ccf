//! BlueZ D-Bus surface: exported objects, client proxies and the
//! registration calls that tie them together.

pub mod error;
pub mod objects;
pub mod proxies;

use std::collections::HashMap;

use tracing::{debug, info};
use zbus::fdo::{ObjectManager, ObjectManagerProxy};
use zbus::names::BusName;
use zbus::zvariant::{ObjectPath, OwnedObjectPath, Value};
use zbus::Connection;

use crate::advertisement::{Advertisement, ADVERTISEMENT_PATH};
use crate::agent::{AgentCommand, AGENT_CAPABILITY, AGENT_PATH};
use crate::bridge::ReportBridge;
use crate::error::{Error, Result};
use crate::gatt::{Interface, NodeId, SharedApplication, ValueChanged};

pub use error::BluezError;
pub use objects::{
    AdvertisementObject, AgentObject, CharacteristicObject, DescriptorObject, ServiceObject,
};
pub use proxies::{Adapter1Proxy, AgentManager1Proxy, GattManager1Proxy, LEAdvertisingManager1Proxy};

pub const BLUEZ_SERVICE: &str = "org.bluez";
const PROPERTIES_INTERFACE: &str = "org.freedesktop.DBus.Properties";

/// First adapter exposing both GATT server and LE advertising support
pub async fn find_adapter(conn: &Connection) -> Result<OwnedObjectPath> {
    let manager = ObjectManagerProxy::new(conn, BLUEZ_SERVICE, "/").await?;
    let mut adapters: Vec<OwnedObjectPath> = manager
        .get_managed_objects()
        .await?
        .into_iter()
        .filter(|(_, interfaces)| {
            interfaces.contains_key("org.bluez.GattManager1")
                && interfaces.contains_key("org.bluez.LEAdvertisingManager1")
        })
        .map(|(path, _)| path)
        .collect();
    adapters.sort_by(|a, b| a.as_str().cmp(b.as_str()));
    adapters.into_iter().next().ok_or(Error::AdapterNotFound)
}

/// Export the application root (with `ObjectManager`) and one object per
/// service, characteristic and descriptor. Returns the number of GATT
/// objects exported.
pub async fn export_application(
    conn: &Connection,
    app: &SharedApplication,
    report: NodeId,
    bridge: ReportBridge,
) -> Result<usize> {
    let (base_path, nodes) = {
        let tree = app.lock().await;
        let nodes: Vec<(NodeId, String, Interface)> = tree
            .managed_objects()
            .into_iter()
            .filter_map(|(path, interfaces)| {
                let id = tree.lookup(&path)?;
                let iface = interfaces.into_keys().next()?;
                Some((id, path, iface))
            })
            .collect();
        (tree.base_path().to_string(), nodes)
    };

    let server = conn.object_server();
    server.at(base_path.as_str(), ObjectManager).await?;

    for (id, path, iface) in &nodes {
        let id = *id;
        match iface {
            Interface::Service => {
                server
                    .at(path.as_str(), ServiceObject::new(app.clone(), id))
                    .await?
            }
            Interface::Characteristic => {
                let bridge = (id == report).then(|| bridge.clone());
                server
                    .at(path.as_str(), CharacteristicObject::new(app.clone(), id, bridge))
                    .await?
            }
            Interface::Descriptor => {
                server
                    .at(path.as_str(), DescriptorObject::new(app.clone(), id))
                    .await?
            }
        };
        debug!("Exported {} at {}", iface, path);
    }
    Ok(nodes.len())
}

/// Ask BlueZ to serve the exported application on `adapter`
pub async fn register_application(
    conn: &Connection,
    adapter: &OwnedObjectPath,
    app_path: &str,
) -> Result<()> {
    let manager = GattManager1Proxy::new(conn, adapter.clone()).await?;
    let path = ObjectPath::try_from(app_path).map_err(zbus::Error::from)?;
    manager
        .register_application(&path, HashMap::new())
        .await
        .map_err(Error::ApplicationRejected)?;
    info!("GATT application registered");
    Ok(())
}

pub async fn unregister_application(
    conn: &Connection,
    adapter: &OwnedObjectPath,
    app_path: &str,
) -> Result<()> {
    let manager = GattManager1Proxy::new(conn, adapter.clone()).await?;
    let path = ObjectPath::try_from(app_path).map_err(zbus::Error::from)?;
    manager.unregister_application(&path).await?;
    Ok(())
}

/// Export the advertisement object and register it with the adapter
pub async fn register_advertisement(
    conn: &Connection,
    adapter: &OwnedObjectPath,
    advertisement: Advertisement,
) -> Result<()> {
    conn.object_server()
        .at(ADVERTISEMENT_PATH, AdvertisementObject::new(advertisement))
        .await?;
    let manager = LEAdvertisingManager1Proxy::new(conn, adapter.clone()).await?;
    let path = ObjectPath::try_from(ADVERTISEMENT_PATH).map_err(zbus::Error::from)?;
    manager.register_advertisement(&path, HashMap::new()).await?;
    info!("Advertisement registered");
    Ok(())
}

pub async fn unregister_advertisement(conn: &Connection, adapter: &OwnedObjectPath) -> Result<()> {
    let manager = LEAdvertisingManager1Proxy::new(conn, adapter.clone()).await?;
    let path = ObjectPath::try_from(ADVERTISEMENT_PATH).map_err(zbus::Error::from)?;
    manager.unregister_advertisement(&path).await?;
    Ok(())
}

/// Export the pairing agent and make it the system default
pub async fn register_agent(
    conn: &Connection,
    commands: tokio::sync::mpsc::Sender<AgentCommand>,
) -> Result<()> {
    conn.object_server()
        .at(AGENT_PATH, AgentObject::new(commands))
        .await?;
    let manager = AgentManager1Proxy::new(conn).await?;
    let path = ObjectPath::try_from(AGENT_PATH).map_err(zbus::Error::from)?;
    manager.register_agent(&path, AGENT_CAPABILITY).await?;
    info!("Agent registered");
    manager.request_default_agent(&path).await?;
    info!("Agent is the default agent");
    Ok(())
}

/// Emit `PropertiesChanged` for a characteristic's `Value`
pub async fn emit_value_changed(conn: &Connection, change: &ValueChanged) -> zbus::Result<()> {
    let changed: HashMap<&str, Value<'_>> =
        HashMap::from([("Value", Value::from(change.value.clone()))]);
    let invalidated: Vec<&str> = Vec::new();
    conn.emit_signal(
        Option::<BusName<'_>>::None,
        change.path.as_str(),
        PROPERTIES_INTERFACE,
        "PropertiesChanged",
        &(Interface::Characteristic.name(), changed, invalidated),
    )
    .await
}
