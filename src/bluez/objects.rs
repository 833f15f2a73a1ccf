//! Objects exported to BlueZ.
//!
//! GATT objects are thin views onto the shared [`Application`]: every property
//! getter goes through the node's property table and every method through
//! the tree's checked operations.
//!
//! [`Application`]: crate::gatt::Application

use std::collections::HashMap;

use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tracing::{debug, info};
use zbus::interface;
use zbus::zvariant::{OwnedObjectPath, OwnedValue};

use super::error::BluezError;
use crate::advertisement::Advertisement;
use crate::agent::AgentCommand;
use crate::bridge::{self, ReportBridge};
use crate::gatt::{Interface, NodeId, PropertyName, PropertyValue, SharedApplication};

async fn property(
    app: &SharedApplication,
    id: NodeId,
    interface: Interface,
    name: PropertyName,
) -> zbus::fdo::Result<PropertyValue> {
    app.lock()
        .await
        .get(id, interface, name)
        .map_err(|e| zbus::fdo::Error::InvalidArgs(e.to_string()))
}

fn mismatch(name: PropertyName, value: &PropertyValue) -> zbus::fdo::Error {
    zbus::fdo::Error::Failed(format!("{} has unexpected type: {:?}", name.as_str(), value))
}

fn into_string(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<String> {
    match value {
        PropertyValue::Str(s) => Ok(s),
        other => Err(mismatch(name, &other)),
    }
}

fn into_bool(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<bool> {
    match value {
        PropertyValue::Bool(b) => Ok(b),
        other => Err(mismatch(name, &other)),
    }
}

fn into_bytes(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<Vec<u8>> {
    match value {
        PropertyValue::Bytes(bytes) => Ok(bytes),
        other => Err(mismatch(name, &other)),
    }
}

fn into_strings(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<Vec<String>> {
    match value {
        PropertyValue::Strings(list) => Ok(list),
        other => Err(mismatch(name, &other)),
    }
}

fn object_path(path: String) -> zbus::fdo::Result<OwnedObjectPath> {
    OwnedObjectPath::try_from(path).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn into_path(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<OwnedObjectPath> {
    match value {
        PropertyValue::Path(path) => object_path(path),
        other => Err(mismatch(name, &other)),
    }
}

fn into_paths(name: PropertyName, value: PropertyValue) -> zbus::fdo::Result<Vec<OwnedObjectPath>> {
    match value {
        PropertyValue::Paths(paths) => paths.into_iter().map(object_path).collect(),
        other => Err(mismatch(name, &other)),
    }
}

/// `org.bluez.GattService1`
pub struct ServiceObject {
    app: SharedApplication,
    id: NodeId,
}

impl ServiceObject {
    pub fn new(app: SharedApplication, id: NodeId) -> Self {
        Self { app, id }
    }

    async fn get(&self, name: PropertyName) -> zbus::fdo::Result<PropertyValue> {
        property(&self.app, self.id, Interface::Service, name).await
    }
}

#[interface(name = "org.bluez.GattService1")]
impl ServiceObject {
    #[zbus(property, name = "UUID")]
    async fn uuid(&self) -> zbus::fdo::Result<String> {
        into_string(PropertyName::Uuid, self.get(PropertyName::Uuid).await?)
    }

    #[zbus(property)]
    async fn primary(&self) -> zbus::fdo::Result<bool> {
        into_bool(PropertyName::Primary, self.get(PropertyName::Primary).await?)
    }

    #[zbus(property)]
    async fn characteristics(&self) -> zbus::fdo::Result<Vec<OwnedObjectPath>> {
        let name = PropertyName::Characteristics;
        into_paths(name, self.get(name).await?)
    }
}

/// `org.bluez.GattCharacteristic1`. The Report characteristic carries the
/// bridge so StartNotify/StopNotify reach the keyboard registry.
pub struct CharacteristicObject {
    app: SharedApplication,
    id: NodeId,
    bridge: Option<ReportBridge>,
}

impl CharacteristicObject {
    pub fn new(app: SharedApplication, id: NodeId, bridge: Option<ReportBridge>) -> Self {
        Self { app, id, bridge }
    }

    async fn get(&self, name: PropertyName) -> zbus::fdo::Result<PropertyValue> {
        property(&self.app, self.id, Interface::Characteristic, name).await
    }
}

#[interface(name = "org.bluez.GattCharacteristic1")]
impl CharacteristicObject {
    async fn read_value(
        &self,
        _options: HashMap<String, OwnedValue>,
    ) -> Result<Vec<u8>, BluezError> {
        Ok(self.app.lock().await.read_value(self.id)?)
    }

    async fn write_value(
        &self,
        #[zbus(connection)] conn: &zbus::Connection,
        value: Vec<u8>,
        _options: HashMap<String, OwnedValue>,
    ) -> Result<(), BluezError> {
        let changed = self.app.lock().await.write_value(self.id, &value)?;
        if let Some(changed) = changed {
            super::emit_value_changed(conn, &changed).await?;
        }
        Ok(())
    }

    async fn start_notify(&self) -> Result<(), BluezError> {
        bridge::start_notify(&self.app, self.id, self.bridge.as_ref()).await?;
        Ok(())
    }

    async fn stop_notify(&self) -> Result<(), BluezError> {
        bridge::stop_notify(&self.app, self.id, self.bridge.as_ref()).await?;
        Ok(())
    }

    #[zbus(property, name = "UUID")]
    async fn uuid(&self) -> zbus::fdo::Result<String> {
        into_string(PropertyName::Uuid, self.get(PropertyName::Uuid).await?)
    }

    #[zbus(property)]
    async fn service(&self) -> zbus::fdo::Result<OwnedObjectPath> {
        into_path(PropertyName::Service, self.get(PropertyName::Service).await?)
    }

    #[zbus(property)]
    async fn value(&self) -> zbus::fdo::Result<Vec<u8>> {
        into_bytes(PropertyName::Value, self.get(PropertyName::Value).await?)
    }

    #[zbus(property)]
    async fn notifying(&self) -> zbus::fdo::Result<bool> {
        into_bool(PropertyName::Notifying, self.get(PropertyName::Notifying).await?)
    }

    #[zbus(property)]
    async fn flags(&self) -> zbus::fdo::Result<Vec<String>> {
        into_strings(PropertyName::Flags, self.get(PropertyName::Flags).await?)
    }

    #[zbus(property)]
    async fn descriptors(&self) -> zbus::fdo::Result<Vec<OwnedObjectPath>> {
        into_paths(PropertyName::Descriptors, self.get(PropertyName::Descriptors).await?)
    }
}

/// `org.bluez.GattDescriptor1`
pub struct DescriptorObject {
    app: SharedApplication,
    id: NodeId,
}

impl DescriptorObject {
    pub fn new(app: SharedApplication, id: NodeId) -> Self {
        Self { app, id }
    }

    async fn get(&self, name: PropertyName) -> zbus::fdo::Result<PropertyValue> {
        property(&self.app, self.id, Interface::Descriptor, name).await
    }
}

#[interface(name = "org.bluez.GattDescriptor1")]
impl DescriptorObject {
    async fn read_value(
        &self,
        _options: HashMap<String, OwnedValue>,
    ) -> Result<Vec<u8>, BluezError> {
        Ok(self.app.lock().await.read_value(self.id)?)
    }

    async fn write_value(
        &self,
        value: Vec<u8>,
        _options: HashMap<String, OwnedValue>,
    ) -> Result<(), BluezError> {
        self.app.lock().await.write_value(self.id, &value)?;
        Ok(())
    }

    #[zbus(property, name = "UUID")]
    async fn uuid(&self) -> zbus::fdo::Result<String> {
        into_string(PropertyName::Uuid, self.get(PropertyName::Uuid).await?)
    }

    #[zbus(property)]
    async fn characteristic(&self) -> zbus::fdo::Result<OwnedObjectPath> {
        let name = PropertyName::Characteristic;
        into_path(name, self.get(name).await?)
    }

    #[zbus(property)]
    async fn value(&self) -> zbus::fdo::Result<Vec<u8>> {
        into_bytes(PropertyName::Value, self.get(PropertyName::Value).await?)
    }

    #[zbus(property)]
    async fn flags(&self) -> zbus::fdo::Result<Vec<String>> {
        into_strings(PropertyName::Flags, self.get(PropertyName::Flags).await?)
    }
}

/// `org.bluez.LEAdvertisement1`
pub struct AdvertisementObject {
    advertisement: Advertisement,
}

impl AdvertisementObject {
    pub fn new(advertisement: Advertisement) -> Self {
        Self { advertisement }
    }
}

#[interface(name = "org.bluez.LEAdvertisement1")]
impl AdvertisementObject {
    fn release(&self) {
        info!("Advertisement released");
    }

    #[zbus(property, name = "Type")]
    fn ad_type(&self) -> &str {
        self.advertisement.ad_type()
    }

    #[zbus(property, name = "ServiceUUIDs")]
    fn service_uuids(&self) -> Vec<String> {
        self.advertisement.service_uuids()
    }

    #[zbus(property)]
    fn local_name(&self) -> &str {
        &self.advertisement.local_name
    }

    #[zbus(property)]
    fn appearance(&self) -> u16 {
        self.advertisement.appearance()
    }

    #[zbus(property)]
    fn discoverable(&self) -> bool {
        self.advertisement.discoverable
    }
}

/// `org.bluez.Agent1`. Passkey requests are handed to the collector task.
pub struct AgentObject {
    commands: mpsc::Sender<AgentCommand>,
}

impl AgentObject {
    pub fn new(commands: mpsc::Sender<AgentCommand>) -> Self {
        Self { commands }
    }
}

#[interface(name = "org.bluez.Agent1")]
impl AgentObject {
    fn release(&self) {
        info!("Agent released");
    }

    async fn request_passkey(&self, device: OwnedObjectPath) -> Result<u32, BluezError> {
        info!("Passkey requested by {}", device.as_str());
        let (reply, answer) = oneshot::channel();
        self.commands
            .send(AgentCommand::Request {
                device: device.as_str().to_string(),
                reply,
            })
            .await
            .map_err(|_| BluezError::Failed("passkey collector is not running".to_string()))?;

        let passkey = answer
            .await
            .map_err(|_| BluezError::Canceled("passkey collector stopped".to_string()))??;
        Ok(passkey)
    }

    async fn cancel(&self) {
        debug!("Pairing canceled by BlueZ");
        if self.commands.send(AgentCommand::Cancel).await.is_err() {
            debug!("Passkey collector is not running");
        }
    }
}
