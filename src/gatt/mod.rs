//! GATT object tree.
//!
//! The application owns a flat arena of nodes. Services, characteristics and
//! descriptors refer to each other by [`NodeId`], so a characteristic can name
//! its service and its descriptors without any ownership cycle. Object paths
//! are derived from registration order when a node is added and never change:
//!
//! ```text
//! <base>/service0
//! <base>/service0/char0
//! <base>/service0/char0/desc0
//! ```
//!
//! Every remote operation (`GetAll`, `ReadValue`, `WriteValue`, `StartNotify`,
//! `StopNotify`) is checked here against the node's kind and flags, so the
//! D-Bus layer only translates.

mod types;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::error::GattError;

pub use types::{
    BtUuid, Flag, Flags, Interface, ManagedObjects, PropertyName, PropertyTable, PropertyValue,
};

/// Tree shared between the event loop and the exported D-Bus objects
pub type SharedApplication = Arc<Mutex<Application>>;

/// Index of a node in the application arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// Computes a characteristic value on read instead of returning the stored one
pub type ReadHook = fn() -> Vec<u8>;

/// Observes accepted writes (after the value is stored)
pub type WriteHook = fn(&[u8]);

#[derive(Debug, Clone)]
pub struct Service {
    pub uuid: BtUuid,
    pub primary: bool,
    pub characteristics: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Characteristic {
    pub uuid: BtUuid,
    pub flags: Flags,
    pub value: Vec<u8>,
    pub service: NodeId,
    pub descriptors: Vec<NodeId>,
    pub notifying: bool,
    pub read_hook: Option<ReadHook>,
    pub write_hook: Option<WriteHook>,
}

#[derive(Debug, Clone)]
pub struct Descriptor {
    pub uuid: BtUuid,
    pub flags: Flags,
    pub value: Vec<u8>,
    pub characteristic: NodeId,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Service(Service),
    Characteristic(Characteristic),
    Descriptor(Descriptor),
}

#[derive(Debug, Clone)]
struct Node {
    path: String,
    kind: NodeKind,
}

/// A `Value` property change to be signalled on `path`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueChanged {
    pub path: String,
    pub value: Vec<u8>,
}

/// Result of a Start/StopNotify call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyTransition {
    Started,
    Stopped,
    /// Already in the requested state
    Unchanged,
}

/// Characteristic construction parameters
#[derive(Debug, Clone)]
pub struct CharacteristicSpec {
    pub uuid: BtUuid,
    pub flags: Flags,
    pub value: Vec<u8>,
    pub read_hook: Option<ReadHook>,
    pub write_hook: Option<WriteHook>,
}

impl CharacteristicSpec {
    pub fn new(uuid: BtUuid, flags: &[Flag], value: impl Into<Vec<u8>>) -> Self {
        Self {
            uuid,
            flags: Flags::new(flags),
            value: value.into(),
            read_hook: None,
            write_hook: None,
        }
    }

    pub fn on_read(mut self, hook: ReadHook) -> Self {
        self.read_hook = Some(hook);
        self
    }

    pub fn on_write(mut self, hook: WriteHook) -> Self {
        self.write_hook = Some(hook);
        self
    }
}

/// Root of the object tree
#[derive(Debug, Clone)]
pub struct Application {
    base_path: String,
    nodes: Vec<Node>,
    services: Vec<NodeId>,
    by_path: HashMap<String, NodeId>,
}

impl Application {
    pub fn new(base_path: impl Into<String>) -> Self {
        Self {
            base_path: base_path.into(),
            nodes: Vec::new(),
            services: Vec::new(),
            by_path: HashMap::new(),
        }
    }

    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    pub fn into_shared(self) -> SharedApplication {
        Arc::new(Mutex::new(self))
    }

    fn push(&mut self, path: String, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.by_path.insert(path.clone(), id);
        self.nodes.push(Node { path, kind });
        id
    }

    pub fn add_service(&mut self, uuid: BtUuid, primary: bool) -> NodeId {
        let path = format!("{}/service{}", self.base_path, self.services.len());
        let id = self.push(
            path,
            NodeKind::Service(Service {
                uuid,
                primary,
                characteristics: Vec::new(),
            }),
        );
        self.services.push(id);
        id
    }

    pub fn add_characteristic(
        &mut self,
        service: NodeId,
        spec: CharacteristicSpec,
    ) -> Result<NodeId, GattError> {
        let (service_path, index) = match self.node(service)? {
            Node {
                path,
                kind: NodeKind::Service(svc),
            } => (path.clone(), svc.characteristics.len()),
            node => return Err(wrong_kind(&node.path, "service")),
        };

        let id = self.push(
            format!("{service_path}/char{index}"),
            NodeKind::Characteristic(Characteristic {
                uuid: spec.uuid,
                flags: spec.flags,
                value: spec.value,
                service,
                descriptors: Vec::new(),
                notifying: false,
                read_hook: spec.read_hook,
                write_hook: spec.write_hook,
            }),
        );
        if let NodeKind::Service(svc) = &mut self.nodes[service.0].kind {
            svc.characteristics.push(id);
        }
        Ok(id)
    }

    pub fn add_descriptor(
        &mut self,
        characteristic: NodeId,
        uuid: BtUuid,
        flags: &[Flag],
        value: impl Into<Vec<u8>>,
    ) -> Result<NodeId, GattError> {
        let (chrc_path, index) = match self.node(characteristic)? {
            Node {
                path,
                kind: NodeKind::Characteristic(chrc),
            } => (path.clone(), chrc.descriptors.len()),
            node => return Err(wrong_kind(&node.path, "characteristic")),
        };

        let id = self.push(
            format!("{chrc_path}/desc{index}"),
            NodeKind::Descriptor(Descriptor {
                uuid,
                flags: Flags::new(flags),
                value: value.into(),
                characteristic,
            }),
        );
        if let NodeKind::Characteristic(chrc) = &mut self.nodes[characteristic.0].kind {
            chrc.descriptors.push(id);
        }
        Ok(id)
    }

    fn node(&self, id: NodeId) -> Result<&Node, GattError> {
        self.nodes
            .get(id.0)
            .ok_or_else(|| GattError::UnknownObject(format!("node #{}", id.0)))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, GattError> {
        self.nodes
            .get_mut(id.0)
            .ok_or_else(|| GattError::UnknownObject(format!("node #{}", id.0)))
    }

    pub fn path(&self, id: NodeId) -> Result<&str, GattError> {
        Ok(&self.node(id)?.path)
    }

    pub fn lookup(&self, path: &str) -> Option<NodeId> {
        self.by_path.get(path).copied()
    }

    pub fn kind(&self, id: NodeId) -> Result<&NodeKind, GattError> {
        Ok(&self.node(id)?.kind)
    }

    pub fn interface(&self, id: NodeId) -> Result<Interface, GattError> {
        Ok(match self.kind(id)? {
            NodeKind::Service(_) => Interface::Service,
            NodeKind::Characteristic(_) => Interface::Characteristic,
            NodeKind::Descriptor(_) => Interface::Descriptor,
        })
    }

    pub fn characteristic(&self, id: NodeId) -> Result<&Characteristic, GattError> {
        match &self.node(id)?.kind {
            NodeKind::Characteristic(chrc) => Ok(chrc),
            _ => Err(wrong_kind(&self.node(id)?.path, "characteristic")),
        }
    }

    fn characteristic_mut(&mut self, id: NodeId) -> Result<(&str, &mut Characteristic), GattError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Characteristic(chrc) => Ok((node.path.as_str(), chrc)),
            _ => Err(wrong_kind(&node.path, "characteristic")),
        }
    }

    /// Services in registration order
    pub fn services(&self) -> &[NodeId] {
        &self.services
    }

    /// Every node in tree order: each service, then its characteristics, each
    /// followed by its descriptors
    pub fn walk(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        for &service in &self.services {
            order.push(service);
            let Ok(NodeKind::Service(svc)) = self.kind(service) else {
                continue;
            };
            for &chrc in &svc.characteristics {
                order.push(chrc);
                if let Ok(NodeKind::Characteristic(c)) = self.kind(chrc) {
                    order.extend(c.descriptors.iter().copied());
                }
            }
        }
        order
    }

    /// Property table for the node's single interface. Any other interface
    /// name is rejected. Over D-Bus the object server already answers
    /// `org.freedesktop.DBus.Error.UnknownInterface` for those, so this check
    /// only guards in-process callers.
    pub fn get_all(&self, id: NodeId, interface: &str) -> Result<PropertyTable, GattError> {
        let node = self.node(id)?;
        let own = self.interface(id)?;
        if Interface::from_name(interface) != Some(own) {
            return Err(GattError::InvalidArgs(format!(
                "{} does not implement {}",
                node.path, interface
            )));
        }

        let mut table = PropertyTable::new();
        match &node.kind {
            NodeKind::Service(svc) => {
                table.insert(PropertyName::Uuid, PropertyValue::Str(svc.uuid.to_string()));
                table.insert(PropertyName::Primary, PropertyValue::Bool(svc.primary));
                table.insert(
                    PropertyName::Characteristics,
                    PropertyValue::Paths(self.paths(&svc.characteristics)),
                );
            }
            NodeKind::Characteristic(chrc) => {
                table.insert(PropertyName::Uuid, PropertyValue::Str(chrc.uuid.to_string()));
                table.insert(
                    PropertyName::Service,
                    PropertyValue::Path(self.path(chrc.service)?.to_string()),
                );
                table.insert(PropertyName::Value, PropertyValue::Bytes(chrc.value.clone()));
                table.insert(PropertyName::Notifying, PropertyValue::Bool(chrc.notifying));
                table.insert(PropertyName::Flags, PropertyValue::Strings(chrc.flags.names()));
                table.insert(
                    PropertyName::Descriptors,
                    PropertyValue::Paths(self.paths(&chrc.descriptors)),
                );
            }
            NodeKind::Descriptor(desc) => {
                table.insert(PropertyName::Uuid, PropertyValue::Str(desc.uuid.to_string()));
                table.insert(
                    PropertyName::Characteristic,
                    PropertyValue::Path(self.path(desc.characteristic)?.to_string()),
                );
                table.insert(PropertyName::Value, PropertyValue::Bytes(desc.value.clone()));
                table.insert(PropertyName::Flags, PropertyValue::Strings(desc.flags.names()));
            }
        }
        Ok(table)
    }

    /// Single property lookup through [`Self::get_all`]
    pub fn get(
        &self,
        id: NodeId,
        interface: Interface,
        name: PropertyName,
    ) -> Result<PropertyValue, GattError> {
        self.get_all(id, interface.name())?
            .remove(&name)
            .ok_or_else(|| {
                GattError::InvalidArgs(format!("{} has no property {}", interface, name.as_str()))
            })
    }

    fn paths(&self, ids: &[NodeId]) -> Vec<String> {
        ids.iter()
            .filter_map(|&id| self.path(id).ok().map(str::to_string))
            .collect()
    }

    /// `GetManagedObjects` body: one entry per service, characteristic and
    /// descriptor, keyed by object path
    pub fn managed_objects(&self) -> ManagedObjects {
        let mut objects = ManagedObjects::new();
        for id in self.walk() {
            let (Ok(node), Ok(iface)) = (self.node(id), self.interface(id)) else {
                continue;
            };
            if let Ok(table) = self.get_all(id, iface.name()) {
                objects.insert(node.path.clone(), BTreeMap::from([(iface, table)]));
            }
        }
        objects
    }

    /// `ReadValue` on a characteristic or descriptor
    pub fn read_value(&self, id: NodeId) -> Result<Vec<u8>, GattError> {
        let node = self.node(id)?;
        match &node.kind {
            NodeKind::Characteristic(chrc) => {
                if !chrc.flags.readable() {
                    return Err(GattError::NotPermitted(format!("{} is not readable", node.path)));
                }
                let value = match chrc.read_hook {
                    Some(hook) => hook(),
                    None => chrc.value.clone(),
                };
                debug!("ReadValue {} -> {:02x?}", node.path, value);
                Ok(value)
            }
            NodeKind::Descriptor(desc) => {
                if !desc.flags.readable() {
                    return Err(GattError::NotPermitted(format!("{} is not readable", node.path)));
                }
                debug!("ReadValue {} -> {:02x?}", node.path, desc.value);
                Ok(desc.value.clone())
            }
            NodeKind::Service(_) => Err(GattError::NotSupported(format!(
                "{} is a service",
                node.path
            ))),
        }
    }

    /// `WriteValue` on a characteristic or descriptor. Stores the value and
    /// returns the change to signal when the characteristic notifies.
    pub fn write_value(
        &mut self,
        id: NodeId,
        value: &[u8],
    ) -> Result<Option<ValueChanged>, GattError> {
        let node = self.node_mut(id)?;
        match &mut node.kind {
            NodeKind::Characteristic(chrc) => {
                if !chrc.flags.writable() {
                    return Err(GattError::NotPermitted(format!("{} is not writable", node.path)));
                }
                debug!("WriteValue {} <- {:02x?}", node.path, value);
                chrc.value = value.to_vec();
                if let Some(hook) = chrc.write_hook {
                    hook(value);
                }
                Ok(chrc.flags.notifiable().then(|| ValueChanged {
                    path: node.path.clone(),
                    value: value.to_vec(),
                }))
            }
            NodeKind::Descriptor(desc) => {
                if !desc.flags.writable() {
                    return Err(GattError::NotPermitted(format!("{} is not writable", node.path)));
                }
                debug!("WriteValue {} <- {:02x?}", node.path, value);
                desc.value = value.to_vec();
                Ok(None)
            }
            NodeKind::Service(_) => Err(GattError::NotSupported(format!(
                "{} is a service",
                node.path
            ))),
        }
    }

    pub fn start_notify(&mut self, id: NodeId) -> Result<NotifyTransition, GattError> {
        self.set_notifying(id, true)
    }

    pub fn stop_notify(&mut self, id: NodeId) -> Result<NotifyTransition, GattError> {
        self.set_notifying(id, false)
    }

    fn set_notifying(&mut self, id: NodeId, on: bool) -> Result<NotifyTransition, GattError> {
        let (path, chrc) = self.characteristic_mut(id)?;
        if !chrc.flags.notifiable() {
            return Err(GattError::NotSupported(format!(
                "{path} does not support notifications"
            )));
        }
        if chrc.notifying == on {
            return Ok(NotifyTransition::Unchanged);
        }
        chrc.notifying = on;
        debug!("{} notifying={}", path, on);
        Ok(if on {
            NotifyTransition::Started
        } else {
            NotifyTransition::Stopped
        })
    }

    /// Replace a notifying characteristic's value and return the change to
    /// signal. Signals regardless of current subscribers.
    pub fn send(&mut self, id: NodeId, value: &[u8]) -> Result<ValueChanged, GattError> {
        let (path, chrc) = self.characteristic_mut(id)?;
        if !chrc.flags.notifiable() {
            return Err(GattError::NotSupported(format!(
                "{path} does not support notifications"
            )));
        }
        chrc.value = value.to_vec();
        Ok(ValueChanged {
            path: path.to_string(),
            value: value.to_vec(),
        })
    }
}

fn wrong_kind(path: &str, expected: &str) -> GattError {
    GattError::InvalidArgs(format!("{path} is not a {expected}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "/test/app";

    fn tree() -> (Application, NodeId, NodeId, NodeId) {
        let mut app = Application::new(BASE);
        let svc = app.add_service(BtUuid::Short(0x1812), true);
        let report = app
            .add_characteristic(
                svc,
                CharacteristicSpec::new(BtUuid::Short(0x2a4d), &[Flag::SecureRead, Flag::Notify], [0u8; 8]),
            )
            .unwrap();
        let reference = app
            .add_descriptor(report, BtUuid::Short(0x2908), &[Flag::Read], [1u8, 1])
            .unwrap();
        (app, svc, report, reference)
    }

    #[test]
    fn test_paths_follow_registration_order() {
        let (mut app, svc, report, reference) = tree();
        let second = app
            .add_characteristic(svc, CharacteristicSpec::new(BtUuid::Short(0x2a4b), &[Flag::Read], [0u8; 0]))
            .unwrap();

        assert_eq!(app.path(svc).unwrap(), "/test/app/service0");
        assert_eq!(app.path(report).unwrap(), "/test/app/service0/char0");
        assert_eq!(app.path(reference).unwrap(), "/test/app/service0/char0/desc0");
        assert_eq!(app.path(second).unwrap(), "/test/app/service0/char1");
        assert_eq!(app.lookup("/test/app/service0/char1"), Some(second));
        assert_eq!(app.walk(), vec![svc, report, reference, second]);
    }

    #[test]
    fn test_get_all_rejects_foreign_interface() {
        let (app, svc, report, reference) = tree();
        assert!(app.get_all(svc, "org.bluez.GattService1").is_ok());
        assert!(matches!(
            app.get_all(svc, "org.bluez.GattCharacteristic1"),
            Err(GattError::InvalidArgs(_))
        ));
        assert!(matches!(
            app.get_all(report, "org.bluez.GattDescriptor1"),
            Err(GattError::InvalidArgs(_))
        ));
        assert!(matches!(
            app.get_all(reference, "org.example.Bogus"),
            Err(GattError::InvalidArgs(_))
        ));
    }

    #[test]
    fn test_characteristic_properties() {
        let (app, _, report, _) = tree();
        let table = app.get_all(report, Interface::Characteristic.name()).unwrap();
        assert_eq!(table[&PropertyName::Uuid], PropertyValue::Str("2a4d".into()));
        assert_eq!(
            table[&PropertyName::Service],
            PropertyValue::Path("/test/app/service0".into())
        );
        assert_eq!(
            table[&PropertyName::Flags],
            PropertyValue::Strings(vec!["secure-read".into(), "notify".into()])
        );
        assert_eq!(
            table[&PropertyName::Descriptors],
            PropertyValue::Paths(vec!["/test/app/service0/char0/desc0".into()])
        );
        assert_eq!(table[&PropertyName::Notifying], PropertyValue::Bool(false));
    }

    #[test]
    fn test_write_rejected_without_write_flag() {
        let (mut app, svc, report, reference) = tree();
        assert!(matches!(
            app.write_value(report, &[1]),
            Err(GattError::NotPermitted(_))
        ));
        assert!(matches!(
            app.write_value(reference, &[1]),
            Err(GattError::NotPermitted(_))
        ));
        assert!(matches!(app.write_value(svc, &[1]), Err(GattError::NotSupported(_))));
        assert_eq!(app.read_value(report).unwrap(), vec![0u8; 8]);
    }

    #[test]
    fn test_notify_rejected_without_notify_flag() {
        let (mut app, svc, _, reference) = tree();
        let plain = app
            .add_characteristic(svc, CharacteristicSpec::new(BtUuid::Short(0x2a4b), &[Flag::Read], [0u8; 0]))
            .unwrap();
        assert!(matches!(app.start_notify(plain), Err(GattError::NotSupported(_))));
        assert!(matches!(app.stop_notify(plain), Err(GattError::NotSupported(_))));
        assert!(app.start_notify(reference).is_err());
        assert!(matches!(app.send(plain, &[1]), Err(GattError::NotSupported(_))));
    }

    #[test]
    fn test_notify_transitions() {
        let (mut app, _, report, _) = tree();
        assert_eq!(app.start_notify(report).unwrap(), NotifyTransition::Started);
        assert_eq!(app.start_notify(report).unwrap(), NotifyTransition::Unchanged);
        assert!(app.characteristic(report).unwrap().notifying);
        assert_eq!(app.stop_notify(report).unwrap(), NotifyTransition::Stopped);
        assert_eq!(app.stop_notify(report).unwrap(), NotifyTransition::Unchanged);
    }

    #[test]
    fn test_send_updates_value_without_subscriber() {
        let (mut app, _, report, _) = tree();
        let changed = app.send(report, &[0, 0, 4, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(changed.path, "/test/app/service0/char0");
        assert_eq!(changed.value, vec![0, 0, 4, 0, 0, 0, 0, 0]);
        assert_eq!(app.characteristic(report).unwrap().value, changed.value);
    }

    #[test]
    fn test_hooks() {
        fn level() -> Vec<u8> {
            vec![42]
        }
        fn observe(_: &[u8]) {}

        let mut app = Application::new(BASE);
        let svc = app.add_service(BtUuid::Short(0x180f), true);
        let battery = app
            .add_characteristic(
                svc,
                CharacteristicSpec::new(BtUuid::Short(0x2a19), &[Flag::Read, Flag::Notify], [0u8])
                    .on_read(level),
            )
            .unwrap();
        let sink = app
            .add_characteristic(
                svc,
                CharacteristicSpec::new(BtUuid::Short(0x2a4c), &[Flag::WriteWithoutResponse], [0u8])
                    .on_write(observe),
            )
            .unwrap();

        assert_eq!(app.read_value(battery).unwrap(), vec![42]);
        assert_eq!(app.write_value(sink, &[1]).unwrap(), None);
        assert!(matches!(app.read_value(sink), Err(GattError::NotPermitted(_))));
    }

    #[test]
    fn test_unknown_node() {
        let (app, ..) = tree();
        assert!(matches!(
            app.read_value(NodeId(99)),
            Err(GattError::UnknownObject(_))
        ));
        assert_eq!(app.lookup("/test/app/service9"), None);
    }
}
