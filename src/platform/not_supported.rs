//! Fallback for platforms without a device-tree strategy.

use crate::{Error, InterfaceSelector, ProbeResolver, ResolvedAddress, Result};

/// Finds nothing.
pub struct NotSupportedResolver;

impl ProbeResolver for NotSupportedResolver {
    fn try_resolve(
        &self,
        _occurrence: usize,
        _interface: InterfaceSelector,
    ) -> Result<Option<ResolvedAddress>> {
        Err(Error::NotSupported)
    }
}

pub fn native() -> NotSupportedResolver {
    NotSupportedResolver
}
