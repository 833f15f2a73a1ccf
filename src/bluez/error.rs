//! Errors returned to BlueZ from exported objects

use zbus::DBusError;

use crate::agent::PasskeyError;
use crate::error::GattError;

#[derive(Debug, DBusError)]
#[zbus(prefix = "org.bluez.Error")]
pub enum BluezError {
    #[zbus(error)]
    ZBus(zbus::Error),
    InvalidArguments(String),
    NotPermitted(String),
    NotSupported(String),
    Failed(String),
    Rejected(String),
    Canceled(String),
}

impl From<GattError> for BluezError {
    fn from(e: GattError) -> Self {
        match e {
            GattError::InvalidArgs(msg) => Self::InvalidArguments(msg),
            GattError::NotPermitted(msg) => Self::NotPermitted(msg),
            GattError::NotSupported(msg) => Self::NotSupported(msg),
            GattError::UnknownObject(msg) => Self::Failed(msg),
        }
    }
}

impl From<PasskeyError> for BluezError {
    fn from(e: PasskeyError) -> Self {
        match e {
            PasskeyError::Rejected(msg) => Self::Rejected(msg),
            PasskeyError::Canceled => Self::Canceled("pairing canceled".to_string()),
        }
    }
}
