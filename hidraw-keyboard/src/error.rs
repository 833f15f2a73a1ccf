//! Raw-HID error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur while talking to hidraw nodes
#[derive(Error, Debug)]
pub enum HidrawError {
    #[error("Failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{request} failed on {path}: {source}")]
    Ioctl {
        request: &'static str,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    /// The kernel reported a zero-length report descriptor
    #[error("Empty report descriptor on {0}")]
    EmptyDescriptor(PathBuf),

    #[error("Report descriptor on {path} is {size} bytes (max {max})")]
    DescriptorTooLarge { path: PathBuf, size: usize, max: usize },

    #[error("udev error: {0}")]
    Udev(#[source] std::io::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
