//! Snapshot assembly, metric filters and per-viewer rendering.

use std::collections::BTreeMap;

use hostpulse_agent::error::{SourceKind, SourceUnavailable};
use hostpulse_agent::history::HistoryStore;
use hostpulse_agent::rates::RateSet;
use hostpulse_agent::snapshot::{
    assemble, dropped_warning, history_points, AssemblyInput, MetricFilter,
};
use hostpulse_agent::types::{
    DiskUsage, GaugeSample, HostInfo, MemoryGauge, MetricPoint, Temperature,
};

fn rates(pairs: &[(&str, f64)]) -> RateSet {
    RateSet {
        values: pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        ..RateSet::default()
    }
}

fn gauges() -> GaugeSample {
    let mut g = GaugeSample::unavailable("not sampled");
    g.memory = Ok(MemoryGauge {
        total: 8_000,
        used: 2_000,
        swap_total: 1_000,
        swap_used: 500,
    });
    g.disks = Ok(vec![DiskUsage {
        name: "nvme0n1p2".to_string(),
        mount: "/".to_string(),
        fs: "ext4".to_string(),
        total: 100,
        available: 25,
    }]);
    g.temperatures = Ok(vec![
        Temperature {
            label: "Package id 0".to_string(),
            celsius: 61.0,
        },
        Temperature {
            label: "nvme".to_string(),
            celsius: 44.5,
        },
    ]);
    g
}

#[test]
fn filter_patterns() {
    let f = MetricFilter::parse("cpu, net.eth*");
    assert!(f.matches("cpu.total"));
    assert!(f.matches("cpu"));
    assert!(!f.matches("cpufreq.core0"));
    assert!(f.matches("net.eth0.rx_bps"));
    assert!(!f.matches("net.rx_bps"));
    assert!(!f.matches("disk.read_bps"));
    assert!(MetricFilter::parse(" , ").is_all());
    assert!(MetricFilter::all().matches("anything"));
}

#[test]
fn history_points_include_derived_percentages() {
    let pts: BTreeMap<String, f64> = history_points(&rates(&[("cpu.total", 10.0)]), &gauges())
        .into_iter()
        .collect();
    assert_eq!(pts["cpu.total"], 10.0);
    assert_eq!(pts["mem.used_pct"], 25.0);
    assert_eq!(pts["swap.used_pct"], 50.0);
    assert_eq!(pts["fs./.used_pct"], 75.0);
    assert_eq!(pts["temp.max_c"], 61.0);
    assert!(!pts.contains_key("load.one"));
}

#[test]
fn assemble_applies_include_filter_to_rates_and_history() {
    let mut history = HistoryStore::new(10);
    history.push("cpu.total", MetricPoint::new(1.0, 5.0));
    history.push("net.rx_bps", MetricPoint::new(1.0, 7.0));
    let include = MetricFilter::parse("cpu");
    let r = rates(&[("cpu.total", 5.0), ("net.rx_bps", 7.0)]);
    let g = gauges();
    let host = HostInfo::default();
    let s = assemble(AssemblyInput {
        seq: 3,
        ts: 1.0,
        rates: &r,
        gauges: &g,
        previous: None,
        history: &history,
        host: &host,
        window: 5,
        include: &include,
    });
    assert_eq!(s.rates.keys().collect::<Vec<_>>(), vec!["cpu.total"]);
    assert_eq!(s.history.keys().collect::<Vec<_>>(), vec!["cpu.total"]);
    assert_eq!(s.seq, 3);
}

#[test]
fn never_seen_gauges_are_null_not_zero() {
    let history = HistoryStore::new(4);
    let include = MetricFilter::all();
    let r = RateSet {
        stale: vec![SourceKind::Cpu],
        warnings: vec![SourceUnavailable::new(SourceKind::Cpu, "x").to_string()],
        ..RateSet::default()
    };
    let g = GaugeSample::unavailable("boot");
    let host = HostInfo::default();
    let s = assemble(AssemblyInput {
        seq: 0,
        ts: 0.0,
        rates: &r,
        gauges: &g,
        previous: None,
        history: &history,
        host: &host,
        window: 4,
        include: &include,
    });
    assert!(s.gauges.memory.is_none());
    assert!(s.rates.is_empty());
    assert_eq!(s.unavailable.len(), 9);
    let v: serde_json::Value = serde_json::to_value(&s).unwrap();
    assert!(v["gauges"]["memory"].is_null());
    assert!(v["gauges"]["cpu_freq"].is_null());
    assert!(v["gauges"]["interfaces"].is_null());
    assert!(v["unavailable"]
        .as_array()
        .unwrap()
        .iter()
        .any(|k| k == "cpu_freq"));
    assert_eq!(v["unavailable"][0], "cpu");
}

#[test]
fn render_adds_drop_warning_only_when_needed() {
    let history = HistoryStore::new(4);
    let include = MetricFilter::all();
    let r = rates(&[("cpu.total", 1.0)]);
    let g = gauges();
    let host = HostInfo::default();
    let s = assemble(AssemblyInput {
        seq: 9,
        ts: 9.0,
        rates: &r,
        gauges: &g,
        previous: None,
        history: &history,
        host: &host,
        window: 4,
        include: &include,
    });
    let plain = s.render(&MetricFilter::all(), 0).unwrap();
    assert_eq!(plain, serde_json::to_string(&s).unwrap());

    let lossy: serde_json::Value =
        serde_json::from_str(&s.render(&MetricFilter::all(), 3).unwrap()).unwrap();
    let warnings = lossy["warnings"].as_array().unwrap();
    assert_eq!(warnings.last().unwrap(), "3 snapshots dropped");
    assert_eq!(dropped_warning(1), "1 snapshot dropped");
}
