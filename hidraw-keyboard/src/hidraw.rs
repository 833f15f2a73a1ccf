//! Raw-HID access layer: report descriptor and identity queries over the
//! hidraw ioctl interface, plus a readiness-driven input report stream.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, Interest, ReadBuf};

use crate::error::HidrawError;

/// Largest report descriptor the kernel hands out (HID_MAX_DESCRIPTOR_SIZE)
pub const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;

/// Buffer length for the name / physical address / unique id queries
pub const STRING_READ_LENGTH: usize = 1024;

// HIDRAW ioctl definitions
// From linux/hidraw.h:
// #define HIDIOCGRDESCSIZE  _IOR('H', 0x01, int)
// #define HIDIOCGRDESC      _IOR('H', 0x02, struct hidraw_report_descriptor)
// #define HIDIOCGRAWINFO    _IOR('H', 0x03, struct hidraw_devinfo)
// #define HIDIOCGRAWNAME(len)  _IOC(_IOC_READ, 'H', 0x04, len)
// #define HIDIOCGRAWPHYS(len)  _IOC(_IOC_READ, 'H', 0x05, len)
// #define HIDIOCGRAWUNIQ(len)  _IOC(_IOC_READ, 'H', 0x08, len)
mod sys {
    use super::HID_MAX_DESCRIPTOR_SIZE;

    pub const HIDRAW_MAGIC: u8 = b'H';

    #[repr(C)]
    pub struct ReportDescriptor {
        pub size: u32,
        pub value: [u8; HID_MAX_DESCRIPTOR_SIZE],
    }

    #[repr(C)]
    #[derive(Default)]
    pub struct DevInfo {
        pub bustype: u32,
        pub vendor: i16,
        pub product: i16,
    }

    nix::ioctl_read!(hidiocgrdescsize, HIDRAW_MAGIC, 0x01, libc::c_int);
    nix::ioctl_read!(hidiocgrdesc, HIDRAW_MAGIC, 0x02, ReportDescriptor);
    nix::ioctl_read!(hidiocgrawinfo, HIDRAW_MAGIC, 0x03, DevInfo);
    nix::ioctl_read_buf!(hidiocgrawname, HIDRAW_MAGIC, 0x04, u8);
    nix::ioctl_read_buf!(hidiocgrawphys, HIDRAW_MAGIC, 0x05, u8);
    nix::ioctl_read_buf!(hidiocgrawuniq, HIDRAW_MAGIC, 0x08, u8);
}

/// Bus a HID device is attached through (from linux/input.h)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusType {
    Usb,
    Hil,
    Bluetooth,
    Virtual,
    I2c,
    Other(u32),
}

impl From<u32> for BusType {
    fn from(raw: u32) -> Self {
        match raw {
            0x03 => Self::Usb,
            0x04 => Self::Hil,
            0x05 => Self::Bluetooth,
            0x06 => Self::Virtual,
            0x18 => Self::I2c,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for BusType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Usb => f.write_str("usb"),
            Self::Hil => f.write_str("hil"),
            Self::Bluetooth => f.write_str("bluetooth"),
            Self::Virtual => f.write_str("virtual"),
            Self::I2c => f.write_str("i2c"),
            Self::Other(raw) => write!(f, "bus 0x{raw:02x}"),
        }
    }
}

/// Bus identity of a hidraw device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusInfo {
    pub bus_type: BusType,
    pub vendor_id: u16,
    pub product_id: u16,
}

impl fmt::Display for BusInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:04x}:{:04x}",
            self.bus_type, self.vendor_id, self.product_id
        )
    }
}

/// An open hidraw device node
#[derive(Debug)]
pub struct Hidraw {
    path: PathBuf,
    file: File,
}

impl Hidraw {
    /// Open a hidraw node for reading. The descriptor is nonblocking so it can
    /// later be handed to the reactor via [`Hidraw::into_stream`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HidrawError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(&path)
            .map_err(|source| HidrawError::Open {
                path: path.clone(),
                source,
            })?;
        Ok(Self { path, file })
    }

    fn ioctl_err(&self, request: &'static str) -> impl FnOnce(nix::Error) -> HidrawError + '_ {
        move |source| HidrawError::Ioctl {
            request,
            path: self.path.clone(),
            source,
        }
    }

    /// Size of the report descriptor in bytes
    pub fn report_descriptor_size(&self) -> Result<usize, HidrawError> {
        let mut size: libc::c_int = 0;
        // SAFETY: fd is open for the lifetime of self and `size` outlives the call
        unsafe { sys::hidiocgrdescsize(self.file.as_raw_fd(), &mut size) }
            .map_err(self.ioctl_err("HIDIOCGRDESCSIZE"))?;
        Ok(size.max(0) as usize)
    }

    /// Fetch the report descriptor. A zero-length descriptor is an error.
    pub fn report_descriptor(&self) -> Result<Vec<u8>, HidrawError> {
        let size = self.report_descriptor_size()?;
        if size == 0 {
            return Err(HidrawError::EmptyDescriptor(self.path.clone()));
        }
        if size > HID_MAX_DESCRIPTOR_SIZE {
            return Err(HidrawError::DescriptorTooLarge {
                path: self.path.clone(),
                size,
                max: HID_MAX_DESCRIPTOR_SIZE,
            });
        }

        // The kernel reads `size` from the struct to bound the copy.
        let mut desc = Box::new(sys::ReportDescriptor {
            size: size as u32,
            value: [0u8; HID_MAX_DESCRIPTOR_SIZE],
        });
        // SAFETY: `desc` matches struct hidraw_report_descriptor
        unsafe { sys::hidiocgrdesc(self.file.as_raw_fd(), &mut *desc) }
            .map_err(self.ioctl_err("HIDIOCGRDESC"))?;

        Ok(desc.value[..size].to_vec())
    }

    /// Human-readable device name
    pub fn name(&self) -> Result<String, HidrawError> {
        let mut buf = [0u8; STRING_READ_LENGTH];
        // SAFETY: the macro passes buf.len() as the ioctl size
        let len = unsafe { sys::hidiocgrawname(self.file.as_raw_fd(), &mut buf) }
            .map_err(self.ioctl_err("HIDIOCGRAWNAME"))?;
        Ok(decode_string(&buf, len))
    }

    /// Physical location string (e.g. `usb-0000:00:14.0-2/input0`)
    pub fn physical_address(&self) -> Result<String, HidrawError> {
        let mut buf = [0u8; STRING_READ_LENGTH];
        // SAFETY: see `name`
        let len = unsafe { sys::hidiocgrawphys(self.file.as_raw_fd(), &mut buf) }
            .map_err(self.ioctl_err("HIDIOCGRAWPHYS"))?;
        Ok(decode_string(&buf, len))
    }

    /// Unique identifier (often a serial number or BT address, may be empty)
    pub fn unique_id(&self) -> Result<String, HidrawError> {
        let mut buf = [0u8; STRING_READ_LENGTH];
        // SAFETY: see `name`
        let len = unsafe { sys::hidiocgrawuniq(self.file.as_raw_fd(), &mut buf) }
            .map_err(self.ioctl_err("HIDIOCGRAWUNIQ"))?;
        Ok(decode_string(&buf, len))
    }

    /// Bus type plus vendor/product id
    pub fn bus_info(&self) -> Result<BusInfo, HidrawError> {
        let mut info = sys::DevInfo::default();
        // SAFETY: `info` matches struct hidraw_devinfo
        unsafe { sys::hidiocgrawinfo(self.file.as_raw_fd(), &mut info) }
            .map_err(self.ioctl_err("HIDIOCGRAWINFO"))?;
        Ok(BusInfo {
            bus_type: BusType::from(info.bustype),
            vendor_id: info.vendor as u16,
            product_id: info.product as u16,
        })
    }

    /// Register the node with the reactor and turn it into an input report stream
    pub fn into_stream(self) -> io::Result<HidrawStream> {
        // SAFETY: the File owns the fd and moves into the AsyncFd, so the fd
        // stays open and unchanged until the stream is dropped
        let inner = unsafe { AsyncFd::register_with_interest(self.file, Interest::READABLE) }?;
        Ok(HidrawStream { inner })
    }
}

/// Trim a fixed-length ioctl string buffer at the returned length and strip NUL padding.
fn decode_string(buf: &[u8], len: libc::c_int) -> String {
    let len = (len.max(0) as usize).min(buf.len());
    String::from_utf8_lossy(&buf[..len])
        .trim_end_matches('\0')
        .to_string()
}

/// Readiness-driven reader over a hidraw node. Each successful read yields one
/// input report; a zero-length read means the node went away.
#[derive(Debug)]
pub struct HidrawStream {
    inner: AsyncFd<File>,
}

impl AsyncRead for HidrawStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        loop {
            let mut guard = ready!(this.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                let mut file: &File = inner.get_ref();
                file.read(unfilled)
            }) {
                Ok(Ok(len)) => {
                    buf.advance(len);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}
