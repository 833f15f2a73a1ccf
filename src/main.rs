//! ble-hid-keyboard
//!
//! Makes this host look like a Bluetooth LE keyboard: every local keyboard's
//! input reports are forwarded to the paired central.

use anyhow::{Context, Result};
use clap::Parser;
use hidraw_keyboard::descriptor::{classify, Classification};
use hidraw_keyboard::{Hidraw, HidrawBackend, UdevBackend};
use tracing::info;

use ble_hid_keyboard::{daemon, Config};

mod cli;
use cli::{Cli, Commands};

fn setup_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    fmt().with_env_filter(filter).with_target(false).init();
}

/// Config file plus command-line overrides
fn load_config(cli: &Cli) -> Result<Config> {
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let mut config = Config::load(&path)?;
    if let Some(adapter) = &cli.adapter {
        config.bluetooth.adapter = Some(adapter.clone());
    }
    if cli.discoverable {
        config.bluetooth.paired = false;
    }
    Ok(config)
}

fn do_list() -> Result<()> {
    let nodes = UdevBackend
        .list_nodes()
        .context("Failed to enumerate hidraw devices")?;
    if nodes.is_empty() {
        println!("No hidraw devices found");
        return Ok(());
    }

    for node in nodes {
        let device = match Hidraw::open(&node) {
            Ok(device) => device,
            Err(e) => {
                println!("{}: {}", node.display(), e);
                continue;
            }
        };

        let name = device.name().unwrap_or_default();
        println!("{}: {}", node.display(), name);
        if let Ok(bus) = device.bus_info() {
            println!("  Bus:        {}", bus);
        }
        if let Ok(phys) = device.physical_address() {
            println!("  Physical:   {}", phys);
        }
        if let Ok(uniq) = device.unique_id() {
            if !uniq.is_empty() {
                println!("  Unique ID:  {}", uniq);
            }
        }
        match device.report_descriptor() {
            Ok(descriptor) => {
                let verdict = match classify(&descriptor) {
                    Classification::Accepted => "keyboard (bridged)",
                    Classification::Ignored => "not a keyboard",
                };
                println!("  Descriptor: {} bytes, {}", descriptor.len(), verdict);
            }
            Err(e) => println!("  Descriptor: {}", e),
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    match cli.command {
        Some(Commands::List) => do_list(),
        None | Some(Commands::Run) => {
            let config = load_config(&cli)?;
            info!(
                "Starting as {:?} ({})",
                config.bluetooth.name,
                if config.discoverable() {
                    "discoverable"
                } else {
                    "paired"
                }
            );

            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start tokio runtime")?;
            runtime.block_on(daemon::run(config))?;
            Ok(())
        }
    }
}
