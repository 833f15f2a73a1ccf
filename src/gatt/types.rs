//! Value types shared by every GATT tree node: UUIDs, access flags, the
//! three object interfaces and the typed property table.

use std::collections::BTreeMap;
use std::fmt;

/// Bluetooth SIG UUID, either a 16-bit alias or a full 128-bit value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BtUuid {
    Short(u16),
    Full(u128),
}

impl fmt::Display for BtUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            BtUuid::Short(v) => write!(f, "{v:04x}"),
            BtUuid::Full(v) => write!(
                f,
                "{:08x}-{:04x}-{:04x}-{:04x}-{:012x}",
                (v >> 96) as u32,
                (v >> 80) as u16,
                (v >> 64) as u16,
                (v >> 48) as u16,
                v & 0xffff_ffff_ffff
            ),
        }
    }
}

/// Characteristic/descriptor access flag, spelled as BlueZ expects
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Flag {
    Broadcast,
    Read,
    WriteWithoutResponse,
    Write,
    Notify,
    Indicate,
    AuthenticatedSignedWrites,
    ReliableWrite,
    WritableAuxiliaries,
    EncryptRead,
    EncryptWrite,
    EncryptAuthenticatedRead,
    EncryptAuthenticatedWrite,
    SecureRead,
    SecureWrite,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Broadcast => "broadcast",
            Flag::Read => "read",
            Flag::WriteWithoutResponse => "write-without-response",
            Flag::Write => "write",
            Flag::Notify => "notify",
            Flag::Indicate => "indicate",
            Flag::AuthenticatedSignedWrites => "authenticated-signed-writes",
            Flag::ReliableWrite => "reliable-write",
            Flag::WritableAuxiliaries => "writable-auxiliaries",
            Flag::EncryptRead => "encrypt-read",
            Flag::EncryptWrite => "encrypt-write",
            Flag::EncryptAuthenticatedRead => "encrypt-authenticated-read",
            Flag::EncryptAuthenticatedWrite => "encrypt-authenticated-write",
            Flag::SecureRead => "secure-read",
            Flag::SecureWrite => "secure-write",
        }
    }

    fn is_read(&self) -> bool {
        matches!(
            self,
            Flag::Read | Flag::EncryptRead | Flag::EncryptAuthenticatedRead | Flag::SecureRead
        )
    }

    fn is_write(&self) -> bool {
        matches!(
            self,
            Flag::Write
                | Flag::WriteWithoutResponse
                | Flag::ReliableWrite
                | Flag::AuthenticatedSignedWrites
                | Flag::EncryptWrite
                | Flag::EncryptAuthenticatedWrite
                | Flag::SecureWrite
        )
    }
}

/// Ordered, duplicate-free flag set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Flags(Vec<Flag>);

impl Flags {
    pub fn new(flags: &[Flag]) -> Self {
        let mut set = Vec::with_capacity(flags.len());
        for &flag in flags {
            if !set.contains(&flag) {
                set.push(flag);
            }
        }
        Self(set)
    }

    pub fn contains(&self, flag: Flag) -> bool {
        self.0.contains(&flag)
    }

    pub fn readable(&self) -> bool {
        self.0.iter().any(Flag::is_read)
    }

    pub fn writable(&self) -> bool {
        self.0.iter().any(Flag::is_write)
    }

    /// `notify` or `indicate`
    pub fn notifiable(&self) -> bool {
        self.contains(Flag::Notify) || self.contains(Flag::Indicate)
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|f| f.as_str().to_string()).collect()
    }
}

/// The three BlueZ GATT object interfaces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Interface {
    Service,
    Characteristic,
    Descriptor,
}

impl Interface {
    pub const fn name(&self) -> &'static str {
        match self {
            Interface::Service => "org.bluez.GattService1",
            Interface::Characteristic => "org.bluez.GattCharacteristic1",
            Interface::Descriptor => "org.bluez.GattDescriptor1",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        [Self::Service, Self::Characteristic, Self::Descriptor]
            .into_iter()
            .find(|iface| iface.name() == name)
    }
}

impl fmt::Display for Interface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Every property name a GATT object can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PropertyName {
    Uuid,
    Primary,
    Characteristics,
    Service,
    Characteristic,
    Value,
    Notifying,
    Flags,
    Descriptors,
}

impl PropertyName {
    pub fn as_str(&self) -> &'static str {
        match self {
            PropertyName::Uuid => "UUID",
            PropertyName::Primary => "Primary",
            PropertyName::Characteristics => "Characteristics",
            PropertyName::Service => "Service",
            PropertyName::Characteristic => "Characteristic",
            PropertyName::Value => "Value",
            PropertyName::Notifying => "Notifying",
            PropertyName::Flags => "Flags",
            PropertyName::Descriptors => "Descriptors",
        }
    }
}

/// Typed property value; maps 1:1 onto a D-Bus signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// `s`
    Str(String),
    /// `b`
    Bool(bool),
    /// `ay`
    Bytes(Vec<u8>),
    /// `o`
    Path(String),
    /// `ao`
    Paths(Vec<String>),
    /// `as`
    Strings(Vec<String>),
}

/// Properties of one interface on one object
pub type PropertyTable = BTreeMap<PropertyName, PropertyValue>;

/// path -> interface -> properties
pub type ManagedObjects = BTreeMap<String, BTreeMap<Interface, PropertyTable>>;
