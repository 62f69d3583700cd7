//! Snapshot assembly: one immutable view of every metric per tick.

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Reading, SourceKind};
use crate::history::HistoryStore;
use crate::rates::RateSet;
use crate::types::{GaugeSample, Gauges, HostInfo, MetricPoint};

/// Everything a viewer sees for one tick. Never mutated once published.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub seq: u64,
    /// Seconds since the Unix epoch.
    pub ts: f64,
    pub warming_up: bool,
    pub rates: BTreeMap<String, f64>,
    pub gauges: Gauges,
    pub history: BTreeMap<String, Vec<MetricPoint>>,
    pub warnings: Vec<String>,
    pub unavailable: Vec<SourceKind>,
}

/// Metric name patterns: `cpu` matches `cpu` and everything under `cpu.`,
/// `net.eth*` matches by plain prefix. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricFilter {
    patterns: Vec<String>,
}

impl MetricFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(Into::into)
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    /// Comma separated list, as used on the command line and in query strings.
    pub fn parse(csv: &str) -> Self {
        Self::new(csv.split(','))
    }

    pub fn all() -> Self {
        Self::default()
    }

    pub fn is_all(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }

    pub fn matches(&self, metric: &str) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        self.patterns.iter().any(|p| {
            if let Some(prefix) = p.strip_suffix('*') {
                metric.starts_with(prefix)
            } else {
                metric == p
                    || (metric.starts_with(p.as_str())
                        && metric.as_bytes().get(p.len()) == Some(&b'.'))
            }
        })
    }
}

/// Metric-name prefix of the rates a counter source produces.
fn rate_prefix(kind: SourceKind) -> Option<&'static str> {
    match kind {
        SourceKind::Cpu => Some("cpu."),
        SourceKind::Network => Some("net."),
        SourceKind::DiskIo => Some("disk."),
        _ => None,
    }
}

/// Values recorded into history this tick: fresh rates plus percentages
/// derived from the gauges that were readable.
pub fn history_points(rates: &RateSet, gauges: &GaugeSample) -> Vec<(String, f64)> {
    let mut points: Vec<(String, f64)> = rates
        .values
        .iter()
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    if let Ok(mem) = &gauges.memory {
        points.push(("mem.used_pct".to_string(), mem.used_pct()));
        if mem.swap_total > 0 {
            points.push(("swap.used_pct".to_string(), mem.swap_used_pct()));
        }
    }
    if let Ok(disks) = &gauges.disks {
        for d in disks {
            points.push((format!("fs.{}.used_pct", d.mount), d.used_pct()));
        }
    }
    if let Ok(load) = &gauges.load {
        points.push(("load.one".to_string(), load.one));
    }
    if let Ok(temps) = &gauges.temperatures {
        let hottest = temps
            .iter()
            .map(|t| t.celsius as f64)
            .fold(None, |acc: Option<f64>, t| Some(acc.map_or(t, |a| a.max(t))));
        if let Some(t) = hottest {
            points.push(("temp.max_c".to_string(), t));
        }
    }
    points
}

/// Inputs for one tick's snapshot.
pub struct AssemblyInput<'a> {
    pub seq: u64,
    pub ts: f64,
    pub rates: &'a RateSet,
    pub gauges: &'a GaugeSample,
    /// Source of held values for anything unavailable this tick.
    pub previous: Option<&'a Snapshot>,
    pub history: &'a HistoryStore,
    pub host: &'a HostInfo,
    /// Points per metric sent to viewers.
    pub window: usize,
    pub include: &'a MetricFilter,
}

fn held<T: Clone>(reading: &Reading<T>, previous: Option<&T>) -> Option<T> {
    match reading {
        Ok(v) => Some(v.clone()),
        Err(_) => previous.cloned(),
    }
}

/// Pure aggregation; never fails, partial inputs produce a partial snapshot.
pub fn assemble(input: AssemblyInput<'_>) -> Snapshot {
    let AssemblyInput {
        seq,
        ts,
        rates,
        gauges,
        previous,
        history,
        host,
        window,
        include,
    } = input;

    let mut out_rates: BTreeMap<String, f64> = rates
        .values
        .iter()
        .filter(|(k, _)| include.matches(k))
        .map(|(k, v)| (k.clone(), *v))
        .collect();
    if let Some(prev) = previous {
        for prefix in rates.stale.iter().filter_map(|k| rate_prefix(*k)) {
            for (k, v) in prev.rates.iter().filter(|(k, _)| k.starts_with(prefix)) {
                out_rates.entry(k.clone()).or_insert(*v);
            }
        }
    }

    let pg = previous.map(|p| &p.gauges);
    let out_gauges = Gauges {
        memory: held(&gauges.memory, pg.and_then(|g| g.memory.as_ref())),
        disks: held(&gauges.disks, pg.and_then(|g| g.disks.as_ref())),
        processes: held(&gauges.processes, pg.and_then(|g| g.processes.as_ref())),
        load: held(&gauges.load, pg.and_then(|g| g.load.as_ref())),
        uptime_secs: held(&gauges.uptime_secs, pg.and_then(|g| g.uptime_secs.as_ref())),
        temperatures: held(&gauges.temperatures, pg.and_then(|g| g.temperatures.as_ref())),
        cpu_freq: held(&gauges.cpu_freq, pg.and_then(|g| g.cpu_freq.as_ref())),
        interfaces: held(&gauges.interfaces, pg.and_then(|g| g.interfaces.as_ref())),
        host: host.clone(),
        logs: gauges.logs.clone(),
    };

    let out_history: BTreeMap<String, Vec<MetricPoint>> = history
        .metrics()
        .filter(|m| include.matches(m))
        .map(|m| (m.to_string(), history.window(m, window)))
        .filter(|(_, pts)| !pts.is_empty())
        .collect();

    let mut unavailable: Vec<SourceKind> = rates.stale.clone();
    let gauge_failures = [
        gauges.memory.as_ref().err(),
        gauges.disks.as_ref().err(),
        gauges.processes.as_ref().err(),
        gauges.load.as_ref().err(),
        gauges.uptime_secs.as_ref().err(),
        gauges.temperatures.as_ref().err(),
        gauges.cpu_freq.as_ref().err(),
        gauges.interfaces.as_ref().err(),
    ];
    let mut warnings: Vec<String> = rates.warnings.clone();
    warnings.extend(rates.anomalies.iter().map(|a| a.to_string()));
    for f in gauge_failures.into_iter().flatten() {
        unavailable.push(f.kind);
        warnings.push(f.to_string());
    }
    unavailable.sort();
    unavailable.dedup();

    Snapshot {
        seq,
        ts,
        warming_up: rates.warming_up,
        rates: out_rates,
        gauges: out_gauges,
        history: out_history,
        warnings,
        unavailable,
    }
}

#[derive(Serialize)]
struct SnapshotView<'a> {
    seq: u64,
    ts: f64,
    warming_up: bool,
    rates: BTreeMap<&'a str, f64>,
    gauges: &'a Gauges,
    history: BTreeMap<&'a str, &'a [MetricPoint]>,
    warnings: Vec<Cow<'a, str>>,
    unavailable: &'a [SourceKind],
}

pub fn dropped_warning(dropped: u64) -> String {
    if dropped == 1 {
        "1 snapshot dropped".to_string()
    } else {
        format!("{dropped} snapshots dropped")
    }
}

impl Snapshot {
    /// JSON for one viewer: rates and history limited to `filter`, plus a
    /// drop-count warning when the viewer's backlog overflowed.
    pub fn render(&self, filter: &MetricFilter, dropped: u64) -> serde_json::Result<String> {
        if filter.is_all() && dropped == 0 {
            return serde_json::to_string(self);
        }
        let mut warnings: Vec<Cow<'_, str>> =
            self.warnings.iter().map(|w| Cow::Borrowed(w.as_str())).collect();
        if dropped > 0 {
            warnings.push(Cow::Owned(dropped_warning(dropped)));
        }
        let view = SnapshotView {
            seq: self.seq,
            ts: self.ts,
            warming_up: self.warming_up,
            rates: self
                .rates
                .iter()
                .filter(|(k, _)| filter.matches(k))
                .map(|(k, v)| (k.as_str(), *v))
                .collect(),
            gauges: &self.gauges,
            history: self
                .history
                .iter()
                .filter(|(k, _)| filter.matches(k))
                .map(|(k, v)| (k.as_str(), v.as_slice()))
                .collect(),
            warnings,
            unavailable: &self.unavailable,
        };
        serde_json::to_string(&view)
    }
}
