//! Locate attached Black Magic Probe debuggers and the operating-system names
//! of their interfaces.
//!
//! A probe is a USB composite device with a GDB-server serial port, a UART
//! serial port, a DFU interface and (on genuine hardware) a SWO trace
//! interface. The scan counts physical probes by their GDB interface, then
//! derives the requested interface from the same device node. On Linux the
//! result is a `/dev` path or a sysfs interface name, on Windows it is a COM
//! port name or a device interface GUID.
//!
//! ```no_run
//! use bmpscan::{InterfaceSelector, find_probe};
//!
//! if let Some(port) = find_probe(0, InterfaceSelector::Gdb) {
//!     println!("first probe serves GDB on {port}");
//! }
//! ```

mod platform;
pub mod registry;
pub mod sysfs;

use std::fmt;
use std::path::PathBuf;

#[cfg(target_os = "windows")]
pub use platform::WindowsHive;
pub use registry::{RegistryHive, RegistryResolver};
pub use sysfs::SysfsResolver;

/// Result alias for fallible scan steps.
pub type Result<T> = std::result::Result<T, Error>;

/// A USB vendor/product pair identifying the probe hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceIdentity {
    pub vendor_id: u16,
    pub product_id: u16,
}

impl DeviceIdentity {
    pub const fn new(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id,
            product_id,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04x}:{:04x}", self.vendor_id, self.product_id)
    }
}

/// The Black Magic Probe in its application (non-bootloader) mode.
pub const BLACK_MAGIC_PROBE: DeviceIdentity = DeviceIdentity::new(0x1d50, 0x6018);

/// A logical function of the probe, tied to its USB interface number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceSelector {
    /// CDC-ACM port running the GDB server. Used to count probes.
    Gdb,
    /// CDC-ACM port bridged to the target's UART.
    Uart,
    /// DFU interface for firmware upgrades.
    Dfu,
    /// SWO trace capture. Missing on some clones.
    Trace,
}

impl InterfaceSelector {
    pub const ALL: [InterfaceSelector; 4] = [
        InterfaceSelector::Gdb,
        InterfaceSelector::Uart,
        InterfaceSelector::Dfu,
        InterfaceSelector::Trace,
    ];

    /// The interface number in the USB configuration descriptor.
    pub const fn number(self) -> u8 {
        match self {
            InterfaceSelector::Gdb => 0,
            InterfaceSelector::Uart => 2,
            InterfaceSelector::Dfu => 4,
            InterfaceSelector::Trace => 5,
        }
    }

    /// Whether the interface is bound to a serial-port driver.
    pub const fn is_serial(self) -> bool {
        matches!(self, InterfaceSelector::Gdb | InterfaceSelector::Uart)
    }
}

impl TryFrom<u8> for InterfaceSelector {
    type Error = Error;

    fn try_from(number: u8) -> Result<Self> {
        InterfaceSelector::ALL
            .into_iter()
            .find(|iface| iface.number() == number)
            .ok_or(Error::UnknownInterface(number))
    }
}

impl fmt::Display for InterfaceSelector {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            InterfaceSelector::Gdb => "gdb",
            InterfaceSelector::Uart => "uart",
            InterfaceSelector::Dfu => "dfu",
            InterfaceSelector::Trace => "trace",
        };
        f.write_str(name)
    }
}

/// A non-empty port name, device path or interface identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResolvedAddress(String);

impl ResolvedAddress {
    /// Longest address the platform can hand back (`MAX_PATH` on Windows,
    /// `PATH_MAX` elsewhere).
    #[cfg(target_os = "windows")]
    pub const MAX_LEN: usize = 260;
    #[cfg(not(target_os = "windows"))]
    pub const MAX_LEN: usize = 4096;

    /// Wraps `value`, returning `None` when it is empty.
    pub fn new(value: impl Into<String>) -> Result<Option<Self>> {
        let value = value.into();
        if value.len() > Self::MAX_LEN {
            return Err(Error::CapacityExceeded {
                len: value.len(),
                max: Self::MAX_LEN,
            });
        }
        Ok((!value.is_empty()).then_some(Self(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    /// Copies the address into `buf` followed by a NUL byte and returns the
    /// length without the terminator.
    pub fn copy_to(&self, buf: &mut [u8]) -> Result<usize> {
        let bytes = self.0.as_bytes();
        if bytes.len() >= buf.len() {
            return Err(Error::CapacityExceeded {
                len: bytes.len() + 1,
                max: buf.len(),
            });
        }
        buf[..bytes.len()].copy_from_slice(bytes);
        buf[bytes.len()] = 0;
        Ok(bytes.len())
    }
}

impl fmt::Display for ResolvedAddress {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ResolvedAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Why a scan step failed. The public lookups fold all of these into
/// "not found"; [`ProbeResolver::try_resolve`] exposes them.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("value {name} holds more data than was read")]
    MoreData { name: String, partial: String },
    #[error("OS error {0}")]
    Os(i32),
    #[error("malformed {kind}: {value:?}")]
    Malformed { kind: &'static str, value: String },
    #[error("{len} bytes exceed the capacity of {max}")]
    CapacityExceeded { len: usize, max: usize },
    #[error("no probe interface with number {0}")]
    UnknownInterface(u8),
    #[error("operation not supported on this platform")]
    NotSupported,
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

/// The addresses of every interface of one attached probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbePorts {
    pub occurrence: usize,
    pub gdb: ResolvedAddress,
    pub uart: Option<ResolvedAddress>,
    pub dfu: Option<ResolvedAddress>,
    pub trace: Option<ResolvedAddress>,
}

/// Maps an occurrence index and interface to a platform address.
///
/// The occurrence is the zero-based ordinal of the probe among all attached
/// probes, counted in the order the platform enumerates their GDB
/// interfaces. Every call is a fresh, read-only scan.
pub trait ProbeResolver {
    /// One scan, stopping at the first failed query.
    fn try_resolve(
        &self,
        occurrence: usize,
        interface: InterfaceSelector,
    ) -> Result<Option<ResolvedAddress>>;

    /// The address of `interface` on the `occurrence`-th probe, or `None`
    /// when that probe or interface is not present.
    fn resolve(&self, occurrence: usize, interface: InterfaceSelector) -> Option<ResolvedAddress> {
        match self.try_resolve(occurrence, interface) {
            Ok(address) => address,
            Err(err) => {
                tracing::debug!(occurrence, %interface, error = %err, "probe lookup failed");
                None
            }
        }
    }

    /// Writes the address as a NUL-terminated string into `buf` and reports
    /// whether anything was found.
    fn resolve_into(
        &self,
        occurrence: usize,
        interface: InterfaceSelector,
        buf: &mut [u8],
    ) -> Result<bool> {
        if let Some(first) = buf.first_mut() {
            *first = 0;
        }
        match self.resolve(occurrence, interface) {
            Some(address) => address.copy_to(buf).map(|len| len > 0),
            None => Ok(false),
        }
    }

    /// Every attached probe with all of its interfaces.
    fn probes(&self) -> Vec<ProbePorts> {
        let mut found = Vec::new();
        for occurrence in 0.. {
            let Some(gdb) = self.resolve(occurrence, InterfaceSelector::Gdb) else {
                break;
            };
            found.push(ProbePorts {
                occurrence,
                gdb,
                uart: self.resolve(occurrence, InterfaceSelector::Uart),
                dfu: self.resolve(occurrence, InterfaceSelector::Dfu),
                trace: self.resolve(occurrence, InterfaceSelector::Trace),
            });
        }
        found
    }
}

/// Looks up `interface` on the `occurrence`-th attached probe using the
/// native strategy for this platform.
pub fn find_probe(occurrence: usize, interface: InterfaceSelector) -> Option<ResolvedAddress> {
    platform::native().resolve(occurrence, interface)
}

/// Like [`find_probe`], writing the result into a caller buffer.
pub fn find_probe_into(
    occurrence: usize,
    interface: InterfaceSelector,
    buf: &mut [u8],
) -> Result<bool> {
    platform::native().resolve_into(occurrence, interface, buf)
}

/// Scans for every attached probe.
pub fn probes() -> Vec<ProbePorts> {
    platform::native().probes()
}

/// True when `name` contains at least one ASCII digit. Port names without a
/// number cannot belong to an enumerated serial port.
pub(crate) fn has_digit(name: &str) -> bool {
    name.bytes().any(|b| b.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interface_numbers_round_trip() {
        for iface in InterfaceSelector::ALL {
            assert_eq!(InterfaceSelector::try_from(iface.number()).unwrap(), iface);
        }
        assert!(matches!(
            InterfaceSelector::try_from(1),
            Err(Error::UnknownInterface(1))
        ));
    }

    #[test]
    fn empty_address_is_absent() {
        assert!(ResolvedAddress::new("").unwrap().is_none());
        assert_eq!(
            ResolvedAddress::new("COM3").unwrap().unwrap().as_str(),
            "COM3"
        );
    }

    #[test]
    fn oversized_address_is_rejected() {
        let long = "x".repeat(ResolvedAddress::MAX_LEN + 1);
        assert!(matches!(
            ResolvedAddress::new(long),
            Err(Error::CapacityExceeded { .. })
        ));
    }

    #[test]
    fn copy_to_writes_terminator() {
        let address = ResolvedAddress::new("/dev/ttyACM0").unwrap().unwrap();
        let mut buf = [0xffu8; 16];
        assert_eq!(address.copy_to(&mut buf).unwrap(), 12);
        assert_eq!(&buf[..13], b"/dev/ttyACM0\0");
    }

    #[test]
    fn copy_to_refuses_to_truncate() {
        let address = ResolvedAddress::new("/dev/ttyACM0").unwrap().unwrap();
        let mut buf = [0u8; 12];
        assert!(matches!(
            address.copy_to(&mut buf),
            Err(Error::CapacityExceeded { len: 13, max: 12 })
        ));
    }

    #[test]
    fn digit_check() {
        assert!(has_digit("COM12"));
        assert!(!has_digit("COM"));
        assert!(!has_digit(""));
    }
}
