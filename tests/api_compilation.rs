use bmpscan::{InterfaceSelector, ProbePorts, ProbeResolver, ResolvedAddress};

#[allow(dead_code)]
fn test_api<R: ProbeResolver>(resolver: &R) {
    let _: Option<ResolvedAddress> = resolver.resolve(0, InterfaceSelector::Gdb);
    let mut buf = [0u8; 64];
    let _ = resolver.resolve_into(0, InterfaceSelector::Uart, &mut buf);
    let _: Vec<ProbePorts> = resolver.probes();
    let _ = bmpscan::find_probe(0, InterfaceSelector::Trace);
    let _ = bmpscan::find_probe_into(0, InterfaceSelector::Dfu, &mut buf);
    let _ = bmpscan::probes();
}

#[test]
fn native_lookup_never_panics() {
    // Whatever is attached to the build machine, both calls settle on an answer.
    let all = bmpscan::probes();
    for (i, probe) in all.iter().enumerate() {
        assert_eq!(probe.occurrence, i);
    }
    assert!(bmpscan::find_probe(all.len(), InterfaceSelector::Gdb).is_none());
}
