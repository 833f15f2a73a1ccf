//! Daemon configuration
//!
//! Stored as TOML (default `/etc/ble-hid-keyboard.toml`). A missing file is
//! not an error: the daemon starts unpaired with default identity strings.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ble-hid-keyboard.toml";
pub const DEFAULT_NAME: &str = "BLE Keyboard";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BluetoothConfig {
    /// Once paired, the daemon stops advertising as discoverable and does
    /// not register a pairing agent
    pub paired: bool,
    /// Advertised LocalName, adapter alias and DIS product name
    pub name: String,
    /// Adapter object path (e.g. `/org/bluez/hci0`); autodetected when unset
    pub adapter: Option<String>,
}

impl Default for BluetoothConfig {
    fn default() -> Self {
        Self {
            paired: false,
            name: DEFAULT_NAME.to_string(),
            adapter: None,
        }
    }
}

/// Firmware revision advertised when the config file sets none
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Device Information Service strings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub manufacturer: String,
    pub version: String,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            manufacturer: "ble-hid-keyboard".to_string(),
            version: DEFAULT_VERSION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bluetooth: BluetoothConfig,
    pub device: DeviceConfig,
}

impl Config {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_CONFIG_PATH)
    }

    /// Load config from a file, or return default if not found
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &content)
    }

    fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Save config to a file
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_err = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(write_err)
    }

    /// Discoverable (and pairing agent registered) until the host is paired
    pub fn discoverable(&self) -> bool {
        !self.bluetooth.paired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let config = Config::load(Path::new("/nonexistent/ble-hid-keyboard.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert!(config.discoverable());
        assert_eq!(config.bluetooth.name, "BLE Keyboard");
        assert_eq!(config.device.version, "1.0.0");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::parse(
            Path::new("test.toml"),
            "[bluetooth]\npaired = true\nadapter = \"/org/bluez/hci1\"\n",
        )
        .unwrap();
        assert!(!config.discoverable());
        assert_eq!(config.bluetooth.adapter.as_deref(), Some("/org/bluez/hci1"));
        assert_eq!(config.bluetooth.name, DEFAULT_NAME);
        assert_eq!(config.device, DeviceConfig::default());
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let err = Config::parse(Path::new("bad.toml"), "[bluetooth\npaired = yes").unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_save_round_trip() {
        let dir = std::env::temp_dir().join(format!("ble-hid-keyboard-{}", std::process::id()));
        let path = dir.join("config.toml");

        let mut config = Config::default();
        config.bluetooth.paired = true;
        config.bluetooth.name = "Desk".to_string();
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
        std::fs::remove_dir_all(&dir).ok();
    }
}
