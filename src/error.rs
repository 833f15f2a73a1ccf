//! Error types for the bridge daemon

use std::path::PathBuf;

use hidraw_keyboard::HidrawError;
use thiserror::Error;

/// Protocol violations raised by the GATT object tree
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GattError {
    #[error("Invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Operation not permitted: {0}")]
    NotPermitted(String),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    #[error("No such object: {0}")]
    UnknownObject(String),
}

/// Configuration file errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level daemon error
#[derive(Debug, Error)]
pub enum Error {
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),
    #[error("D-Bus call failed: {0}")]
    Fdo(#[from] zbus::fdo::Error),
    #[error(transparent)]
    Hidraw(#[from] HidrawError),
    #[error(transparent)]
    Gatt(#[from] GattError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("BlueZ rejected the GATT application: {0}")]
    ApplicationRejected(#[source] zbus::Error),
    #[error("No Bluetooth adapter with GATT and LE advertising support found")]
    AdapterNotFound,
}

pub type Result<T> = std::result::Result<T, Error>;
