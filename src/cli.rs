// CLI definitions using clap

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "ble-hid-keyboard")]
#[command(author, version, about = "Bridge local keyboards to a BLE central (HID over GATT)")]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default /etc/ble-hid-keyboard.toml)
    #[arg(short, long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// BlueZ adapter object path, e.g. /org/bluez/hci0
    #[arg(long, global = true, value_name = "PATH")]
    pub adapter: Option<String>,

    /// Advertise as discoverable and accept pairing even if already paired
    #[arg(long, global = true)]
    pub discoverable: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the bridge daemon (default)
    Run,

    /// List hidraw devices and whether they would be bridged
    #[command(visible_alias = "ls")]
    List,
}
