//! Host sampler against the machine running the tests.

use hostpulse_agent::error::SourceKind;
use hostpulse_agent::logbook::LogBook;
use hostpulse_agent::sampler::{HostSampler, Sample, Sampler, SourceHealth};
use hostpulse_agent::types::MemoryGauge;

#[test]
fn reads_this_host() {
    let mut sampler = HostSampler::new(LogBook::default(), 5, 3);
    let host = sampler.host_info();
    assert!(host.cpu_count > 0);
    assert!(!host.arch.is_empty());

    let s = sampler.sample();
    assert!(s.counters.ts > 0.0);
    if let Ok(p) = &s.gauges.processes {
        assert!(p.by_cpu.len() <= 3);
        assert!(p.by_memory.len() <= 3);
        assert!(p.count >= p.by_memory.len());
        assert!(p.by_memory.windows(2).all(|w| w[0].mem_bytes >= w[1].mem_bytes));
    }
    if let Ok(ifaces) = &s.gauges.interfaces {
        for a in ifaces.iter().flat_map(|i| &i.addrs) {
            assert_eq!(a.netmask.is_some(), a.addr.contains('.'));
        }
    }
    if cfg!(target_os = "linux") {
        assert!(host.boot_time > 0);
    }
    if cfg!(target_os = "linux") {
        assert!(s.counters.cpu.is_ok(), "{:?}", s.counters.cpu);
        assert!(s.gauges.memory.is_ok());
    }
}

#[test]
fn health_tracks_transitions() {
    let mut health = SourceHealth::default();
    let mut s = Sample::unavailable(1.0, "boot");
    health.record(&s);
    assert!(health.is_failing(SourceKind::Memory));

    s.gauges.memory = Ok(MemoryGauge {
        total: 1,
        used: 0,
        swap_total: 0,
        swap_used: 0,
    });
    health.record(&s);
    assert!(!health.is_failing(SourceKind::Memory));
    assert!(health.is_failing(SourceKind::Cpu));
}

#[test]
fn failures_are_listed_in_source_order() {
    let mut s = Sample::unavailable(1.0, "x");
    s.counters.cpu = Ok(Vec::new());
    let kinds: Vec<SourceKind> = s.failures().into_iter().map(|f| f.kind).collect();
    assert_eq!(kinds.len(), SourceKind::ALL.len() - 1);
    assert_eq!(kinds[0], SourceKind::Network);
}
