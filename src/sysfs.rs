//! Filesystem strategy built on the kernel's sysfs view of the USB bus.
//!
//! Every bound interface shows up under `/sys/bus/usb/devices` as a node
//! named `<bus>-<ports>:<config>.<interface>` carrying a `modalias`
//! attribute. CDC-ACM interfaces additionally hold a `tty/<name>` entry
//! naming their `/dev` node. Probes are counted by their GDB interface node
//! and the other interfaces are found by building the sibling node name for
//! the same `<bus>-<ports>:<config>` prefix.

use crate::{
    BLACK_MAGIC_PROBE, DeviceIdentity, Error, InterfaceSelector, ProbeResolver, ResolvedAddress,
    Result, has_digit,
};
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

const SYSFS_USB_DEVICES: &str = "/sys/bus/usb/devices";
const DEV_ROOT: &str = "/dev";
/// Longest file name a Linux filesystem accepts.
const NAME_MAX: usize = 255;

/// The fields of a USB interface `modalias` attribute that the scan uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Modalias {
    pub vendor_id: u16,
    pub product_id: u16,
    pub interface_class: Option<u8>,
    pub interface_number: Option<u8>,
}

impl Modalias {
    /// Parses `usb:vVVVVpPPPPdDDDDdcXXdscXXdpXX[icXXiscXXipXXinXX]`.
    pub fn parse(raw: &str) -> Result<Self> {
        let whole = raw.trim();
        let mut rest = whole
            .strip_prefix("usb:")
            .ok_or_else(|| malformed_modalias(whole))?;

        let vendor_id = take_hex(&mut rest, "v", 4, whole)?;
        let product_id = take_hex(&mut rest, "p", 4, whole)?;
        take_hex(&mut rest, "d", 4, whole)?;
        take_hex(&mut rest, "dc", 2, whole)?;
        take_hex(&mut rest, "dsc", 2, whole)?;
        take_hex(&mut rest, "dp", 2, whole)?;

        if rest.is_empty() {
            return Ok(Self {
                vendor_id,
                product_id,
                interface_class: None,
                interface_number: None,
            });
        }

        let interface_class = take_hex(&mut rest, "ic", 2, whole)? as u8;
        take_hex(&mut rest, "isc", 2, whole)?;
        take_hex(&mut rest, "ip", 2, whole)?;
        let interface_number = take_hex(&mut rest, "in", 2, whole)? as u8;

        Ok(Self {
            vendor_id,
            product_id,
            interface_class: Some(interface_class),
            interface_number: Some(interface_number),
        })
    }

    pub fn identity(&self) -> DeviceIdentity {
        DeviceIdentity::new(self.vendor_id, self.product_id)
    }
}

fn take_hex<'a>(rest: &mut &'a str, tag: &str, width: usize, whole: &str) -> Result<u16> {
    let current: &'a str = *rest;
    let tail = current
        .strip_prefix(tag)
        .ok_or_else(|| malformed_modalias(whole))?;
    let digits = tail
        .get(..width)
        .filter(|digits| digits.bytes().all(|b| b.is_ascii_hexdigit()))
        .ok_or_else(|| malformed_modalias(whole))?;
    let value = u16::from_str_radix(digits, 16).map_err(|_| malformed_modalias(whole))?;
    *rest = &tail[width..];
    Ok(value)
}

fn malformed_modalias(value: &str) -> Error {
    Error::Malformed {
        kind: "modalias",
        value: value.to_string(),
    }
}

/// Location of one interface of a USB device in sysfs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceNode {
    /// `<bus>-<port>[.<port>...]`, identical for all interfaces of a device.
    pub port: String,
    pub configuration: u8,
    pub interface: u8,
}

impl InterfaceNode {
    pub fn parse(name: &str) -> Result<Self> {
        if name.len() > NAME_MAX {
            return Err(Error::CapacityExceeded {
                len: name.len(),
                max: NAME_MAX,
            });
        }
        let malformed = || Error::Malformed {
            kind: "sysfs interface name",
            value: name.to_string(),
        };
        let (port, tail) = name.rsplit_once(':').ok_or_else(malformed)?;
        let (configuration, interface) = tail.split_once('.').ok_or_else(malformed)?;
        if port.is_empty() || !port.contains('-') {
            return Err(malformed());
        }
        Ok(Self {
            port: port.to_string(),
            configuration: configuration.parse().map_err(|_| malformed())?,
            interface: interface.parse().map_err(|_| malformed())?,
        })
    }

    /// The node of another interface on the same device.
    pub fn sibling(&self, interface: u8) -> Self {
        Self {
            port: self.port.clone(),
            configuration: self.configuration,
            interface,
        }
    }
}

impl fmt::Display for InterfaceNode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}.{}", self.port, self.configuration, self.interface)
    }
}

/// The GDB interface of the probe selected by the anchor pass.
#[derive(Debug)]
struct Anchor {
    node: InterfaceNode,
    tty: String,
}

/// Resolves probe interfaces by walking a sysfs tree.
#[derive(Debug, Clone)]
pub struct SysfsResolver {
    root: PathBuf,
    dev_root: PathBuf,
    identity: DeviceIdentity,
}

impl Default for SysfsResolver {
    fn default() -> Self {
        Self {
            root: PathBuf::from(SYSFS_USB_DEVICES),
            dev_root: PathBuf::from(DEV_ROOT),
            identity: BLACK_MAGIC_PROBE,
        }
    }
}

impl SysfsResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory listing one node per USB device and interface.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Directory prepended to tty names.
    pub fn with_dev_root(mut self, dev_root: impl Into<PathBuf>) -> Self {
        self.dev_root = dev_root.into();
        self
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn anchor(&self, occurrence: usize) -> Result<Option<Anchor>> {
        let mut seen = 0usize;
        for name in sorted_entries(&self.root)? {
            let Some(node) = self.gdb_candidate(&name) else {
                continue;
            };
            let Some(tty) = first_tty(&self.root.join(&name))? else {
                debug!(node = %name, "GDB interface has no tty, skipping");
                continue;
            };
            if !has_digit(&tty) {
                debug!(node = %name, tty = %tty, "tty name has no digit, skipping");
                continue;
            }
            trace!(node = %name, tty = %tty, seen, "found GDB interface");
            if seen == occurrence {
                return Ok(Some(Anchor { node, tty }));
            }
            seen += 1;
        }
        Ok(None)
    }

    /// Parses `name` if it is the GDB interface node of a matching device.
    fn gdb_candidate(&self, name: &str) -> Option<InterfaceNode> {
        if name.starts_with('.') {
            return None;
        }
        let path = self.root.join(name).join("modalias");
        let modalias = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) => {
                trace!(path = %path.display(), error = %err, "no modalias");
                return None;
            }
        };
        let modalias = Modalias::parse(&modalias).ok()?;
        if modalias.identity() != self.identity
            || modalias.interface_number != Some(InterfaceSelector::Gdb.number())
        {
            return None;
        }
        match InterfaceNode::parse(name) {
            Ok(node) => Some(node),
            Err(err) => {
                debug!(node = %name, error = %err, "unexpected interface node name");
                None
            }
        }
    }

    fn dev_path(&self, tty: &str) -> Result<Option<ResolvedAddress>> {
        ResolvedAddress::new(self.dev_root.join(tty).to_string_lossy().into_owned())
    }
}

impl ProbeResolver for SysfsResolver {
    fn try_resolve(
        &self,
        occurrence: usize,
        interface: InterfaceSelector,
    ) -> Result<Option<ResolvedAddress>> {
        let Some(anchor) = self.anchor(occurrence)? else {
            return Ok(None);
        };
        if interface == InterfaceSelector::Gdb {
            return self.dev_path(&anchor.tty);
        }

        let sibling = anchor.node.sibling(interface.number());
        let sibling_path = self.root.join(sibling.to_string());
        if interface.is_serial() {
            return match first_tty(&sibling_path)? {
                Some(tty) => self.dev_path(&tty),
                None => Ok(None),
            };
        }

        // Non-serial interfaces are addressed by their node name.
        if exists(&sibling_path.join("modalias"))? {
            ResolvedAddress::new(sibling.to_string())
        } else {
            debug!(node = %sibling, "interface not present");
            Ok(None)
        }
    }
}

/// Entry names of `dir` in byte order, skipping names that are not UTF-8.
fn sorted_entries(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
        let entry = entry.map_err(|err| Error::io(dir, err))?;
        if let Ok(name) = entry.file_name().into_string() {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Name of the first entry in `<node>/tty`, or `None` when the interface is
/// not bound to a tty driver.
fn first_tty(node: &Path) -> Result<Option<String>> {
    let tty_dir = node.join("tty");
    match sorted_entries(&tty_dir) {
        Ok(names) => Ok(names.into_iter().find(|name| !name.starts_with('.'))),
        Err(Error::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

fn exists(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(_) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(Error::io(path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_interface_modalias() {
        let alias = Modalias::parse("usb:v1D50p6018d0100dcEFdsc02dp01ic02isc02ip01in00\n").unwrap();
        assert_eq!(alias.identity(), BLACK_MAGIC_PROBE);
        assert_eq!(alias.interface_class, Some(0x02));
        assert_eq!(alias.interface_number, Some(0));
    }

    #[test]
    fn parses_lowercase_and_device_level_modalias() {
        let alias = Modalias::parse("usb:v1d50p6018d0100dcefdsc02dp01").unwrap();
        assert_eq!(alias.vendor_id, 0x1d50);
        assert_eq!(alias.interface_number, None);

        let alias = Modalias::parse("usb:v1D50p6018d0100dcEFdsc02dp01icFEisc01ip01in04").unwrap();
        assert_eq!(alias.interface_class, Some(0xfe));
        assert_eq!(alias.interface_number, Some(4));
    }

    #[test]
    fn rejects_foreign_modalias() {
        assert!(Modalias::parse("pci:v00008086d00001234").is_err());
        assert!(Modalias::parse("usb:v1D5").is_err());
        assert!(Modalias::parse("usb:v+1D5p6018d0100dcEFdsc02dp01").is_err());
    }

    #[test]
    fn interface_node_round_trips() {
        let node = InterfaceNode::parse("3-1.4.2:1.0").unwrap();
        assert_eq!(node.port, "3-1.4.2");
        assert_eq!(node.configuration, 1);
        assert_eq!(node.interface, 0);
        assert_eq!(node.to_string(), "3-1.4.2:1.0");
        assert_eq!(node.sibling(5).to_string(), "3-1.4.2:1.5");
    }

    #[test]
    fn sibling_handles_multi_digit_interfaces() {
        let node = InterfaceNode::parse("1-2:1.0").unwrap();
        assert_eq!(node.sibling(12).to_string(), "1-2:1.12");
    }

    #[test]
    fn rejects_non_interface_node_names() {
        assert!(InterfaceNode::parse("usb1").is_err());
        assert!(InterfaceNode::parse("1-2").is_err());
        assert!(InterfaceNode::parse("1-2:x.0").is_err());
        assert!(matches!(
            InterfaceNode::parse(&format!("1-{}:1.0", "2".repeat(NAME_MAX))),
            Err(Error::CapacityExceeded { .. })
        ));
    }
}
