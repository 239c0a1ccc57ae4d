//! Linux and Android resolve probes through sysfs.

use crate::SysfsResolver;

pub fn native() -> SysfsResolver {
    SysfsResolver::default()
}
