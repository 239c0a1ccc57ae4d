//! Registry strategy: reads the device records Windows keeps under
//! `HKEY_LOCAL_MACHINE`.
//!
//! Each interface of a composite device has its own section
//! `SYSTEM\CurrentControlSet\Enum\USB\VID_xxxx&PID_xxxx&MI_xx`, with one
//! subkey per physical device ever seen. Sibling interfaces of one device
//! share the instance key name apart from its trailing interface number.
//!
//! A `PortName` in a section may belong to a probe that is not plugged in,
//! so ports are checked against `HARDWARE\DEVICEMAP\SERIALCOMM`, which only
//! lists live serial ports.
//!
//! The strategy talks to the registry through [`RegistryHive`], so it runs
//! against the live registry on Windows and against in-memory hives in
//! tests.

use crate::{
    BLACK_MAGIC_PROBE, DeviceIdentity, Error, InterfaceSelector, ProbeResolver, ResolvedAddress,
    Result, has_digit,
};
use std::fmt;
use tracing::{debug, trace};

const ENUM_USB: &str = r"SYSTEM\CurrentControlSet\Enum\USB";
const SERIALCOMM: &str = r"HARDWARE\DEVICEMAP\SERIALCOMM";
const DEVICE_PARAMETERS: &str = "Device Parameters";
const PORT_NAME: &str = "PortName";
const DEVICE_INTERFACE_GUIDS: &str = "DeviceInterfaceGUIDs";
/// Longest registry key name.
pub const MAX_KEY_NAME: usize = 255;

/// Read-only view of the `HKEY_LOCAL_MACHINE` hive. Paths are relative to
/// the hive root and use `\` as separator.
///
/// A missing key or value is reported as [`Error::NotFound`].
pub trait RegistryHive {
    /// Name of the `index`-th subkey of `path`, or `None` past the last one.
    fn subkey(&self, path: &str, index: u32) -> Result<Option<String>>;

    /// A string value.
    fn string(&self, path: &str, name: &str) -> Result<String>;

    /// A multi-string value. When the value could only be read in part the
    /// hive returns [`Error::MoreData`] carrying the first entry.
    fn multi_string(&self, path: &str, name: &str) -> Result<Vec<String>>;

    /// The data of every value under `path`, in enumeration order.
    fn string_values(&self, path: &str) -> Result<Vec<String>>;
}

/// Instance key of one interface of a composite device, such as
/// `6&1a2b3c4d&0&0002`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceId {
    /// Everything before the final `&`, shared by all interfaces.
    pub parent: String,
    pub interface: u8,
}

impl InstanceId {
    pub fn parse(name: &str) -> Result<Self> {
        if name.len() > MAX_KEY_NAME {
            return Err(Error::CapacityExceeded {
                len: name.len(),
                max: MAX_KEY_NAME,
            });
        }
        let malformed = || Error::Malformed {
            kind: "device instance key",
            value: name.to_string(),
        };
        let (parent, suffix) = name.rsplit_once('&').ok_or_else(malformed)?;
        if parent.is_empty() || suffix.len() != 4 || !suffix.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return Err(malformed());
        }
        let interface = u16::from_str_radix(suffix, 16).map_err(|_| malformed())?;
        Ok(Self {
            parent: parent.to_string(),
            interface: u8::try_from(interface).map_err(|_| malformed())?,
        })
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}&{:04X}", self.parent, self.interface)
    }
}

/// Registry location of one interface of one physical device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryLocation {
    pub identity: DeviceIdentity,
    pub instance: InstanceId,
}

impl RegistryLocation {
    /// The key holding one subkey per device for this interface.
    pub fn section(&self) -> String {
        section_path(self.identity, self.instance.interface)
    }

    pub fn parameters(&self) -> String {
        format!(r"{}\{}\{}", self.section(), self.instance, DEVICE_PARAMETERS)
    }

    /// The record of another interface on the same device.
    pub fn sibling(&self, interface: u8) -> Self {
        Self {
            identity: self.identity,
            instance: InstanceId {
                parent: self.instance.parent.clone(),
                interface,
            },
        }
    }
}

fn section_path(identity: DeviceIdentity, interface: u8) -> String {
    format!(
        r"{ENUM_USB}\VID_{:04X}&PID_{:04X}&MI_{:02X}",
        identity.vendor_id, identity.product_id, interface
    )
}

/// Drops a device namespace prefix such as `\\.\` from a port name.
fn base_name(port: &str) -> &str {
    port.rsplit_once('\\').map_or(port, |(_, tail)| tail)
}

/// The GDB interface of the probe selected by the anchor pass.
#[derive(Debug)]
struct Anchor {
    location: RegistryLocation,
    port: String,
}

/// Resolves probe interfaces from registry device records.
#[derive(Debug, Clone)]
pub struct RegistryResolver<H> {
    hive: H,
    identity: DeviceIdentity,
}

impl<H: RegistryHive> RegistryResolver<H> {
    pub fn new(hive: H) -> Self {
        Self {
            hive,
            identity: BLACK_MAGIC_PROBE,
        }
    }

    pub fn with_identity(mut self, identity: DeviceIdentity) -> Self {
        self.identity = identity;
        self
    }

    pub fn hive(&self) -> &H {
        &self.hive
    }

    fn anchor(&self, occurrence: usize) -> Result<Option<Anchor>> {
        let section = section_path(self.identity, InterfaceSelector::Gdb.number());
        let mut live_ports: Option<Vec<String>> = None;
        let mut seen = 0usize;

        for index in 0.. {
            let Some(name) = self.hive.subkey(&section, index)? else {
                return Ok(None);
            };
            let params = format!(r"{section}\{name}\{DEVICE_PARAMETERS}");
            let port = base_name(&self.hive.string(&params, PORT_NAME)?).to_string();
            if !has_digit(&port) {
                debug!(instance = %name, port = %port, "port name has no digit, skipping");
                continue;
            }

            if live_ports.is_none() {
                let table = self.hive.string_values(SERIALCOMM)?;
                live_ports = Some(table.iter().map(|v| base_name(v).to_string()).collect());
            }
            let live = live_ports.as_deref().unwrap_or_default();
            if !live.iter().any(|p| p.eq_ignore_ascii_case(&port)) {
                debug!(instance = %name, port = %port, "port is not connected, skipping");
                continue;
            }

            let instance = match InstanceId::parse(&name) {
                Ok(instance) => instance,
                Err(err) => {
                    debug!(instance = %name, error = %err, "unexpected instance key, skipping");
                    continue;
                }
            };
            trace!(instance = %name, port = %port, seen, "found GDB interface");
            if seen == occurrence {
                let location = RegistryLocation {
                    identity: self.identity,
                    instance,
                };
                return Ok(Some(Anchor { location, port }));
            }
            seen += 1;
        }
        Ok(None)
    }
}

impl<H: RegistryHive> ProbeResolver for RegistryResolver<H> {
    fn try_resolve(
        &self,
        occurrence: usize,
        interface: InterfaceSelector,
    ) -> Result<Option<ResolvedAddress>> {
        let Some(anchor) = self.anchor(occurrence)? else {
            return Ok(None);
        };
        if interface == InterfaceSelector::Gdb {
            return ResolvedAddress::new(anchor.port);
        }

        let params = anchor.location.sibling(interface.number()).parameters();
        let value = if interface.is_serial() {
            base_name(&self.hive.string(&params, PORT_NAME)?).to_string()
        } else {
            // Only the first GUID is needed, and clones without trace
            // support have no GUID at all.
            match self.hive.multi_string(&params, DEVICE_INTERFACE_GUIDS) {
                Ok(guids) => guids.into_iter().next().unwrap_or_default(),
                Err(Error::MoreData { partial, .. }) => partial,
                Err(Error::NotFound(what)) => {
                    debug!(%what, "no device interface GUID");
                    String::new()
                }
                Err(err) => return Err(err),
            }
        };
        ResolvedAddress::new(value)
    }
}
