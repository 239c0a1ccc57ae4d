//! Lists attached probes.
//!
//! `cargo run --example scan` scans for Black Magic Probes. Set
//! `BMPSCAN_VID`/`BMPSCAN_PID` (hex) to look for another device with the
//! same interface layout and `BMPSCAN_SYSFS_ROOT` to scan a copied sysfs
//! tree. `RUST_LOG=bmpscan=debug` shows why candidates were skipped.

use bmpscan::{BLACK_MAGIC_PROBE, DeviceIdentity, ProbePorts, ProbeResolver};
use std::env;
use tracing_subscriber::EnvFilter;

fn identity_from_env() -> DeviceIdentity {
    let hex = |name: &str| {
        env::var(name)
            .ok()
            .and_then(|v| u16::from_str_radix(v.trim_start_matches("0x"), 16).ok())
    };
    DeviceIdentity::new(
        hex("BMPSCAN_VID").unwrap_or(BLACK_MAGIC_PROBE.vendor_id),
        hex("BMPSCAN_PID").unwrap_or(BLACK_MAGIC_PROBE.product_id),
    )
}

#[cfg(target_os = "windows")]
fn scan(identity: DeviceIdentity) -> Vec<ProbePorts> {
    bmpscan::RegistryResolver::new(bmpscan::WindowsHive)
        .with_identity(identity)
        .probes()
}

#[cfg(not(target_os = "windows"))]
fn scan(identity: DeviceIdentity) -> Vec<ProbePorts> {
    let mut resolver = bmpscan::SysfsResolver::new().with_identity(identity);
    if let Ok(root) = env::var("BMPSCAN_SYSFS_ROOT") {
        resolver = resolver.with_root(root);
    }
    resolver.probes()
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let identity = identity_from_env();
    let probes = scan(identity);
    if probes.is_empty() {
        println!("No {identity} probe found");
        return;
    }
    let show = |address: &Option<bmpscan::ResolvedAddress>| {
        address
            .as_ref()
            .map_or_else(|| "-".to_string(), ToString::to_string)
    };
    for probe in &probes {
        println!(
            "#{} gdb={} uart={} dfu={} trace={}",
            probe.occurrence,
            probe.gdb,
            show(&probe.uart),
            show(&probe.dfu),
            show(&probe.trace)
        );
    }
}
