//! Per-second rates from successive cumulative counter readings.

use std::collections::BTreeMap;

use serde::Deserialize;
use tracing::warn;

use crate::error::{CounterAnomaly, Reading, SourceKind, SourceUnavailable};
use crate::types::{CpuTicks, DiskIoCounters, NetCounters, RawCounterSample};

/// How CPU utilisation is exposed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CpuBreakdown {
    /// Only `cpu.total`, the mean across cores.
    Average,
    /// `cpu.total` plus one `cpu.core<N>` per core.
    #[default]
    PerCore,
}

/// Rates derived for one tick.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateSet {
    pub values: BTreeMap<String, f64>,
    pub anomalies: Vec<CounterAnomaly>,
    /// Sources with no fresh rates this tick (held by the assembler).
    pub stale: Vec<SourceKind>,
    pub warnings: Vec<String>,
    /// Set on the very first observation after startup.
    pub warming_up: bool,
}

/// `(current - previous) / dt`, or 0 plus an anomaly when the counter went back.
pub fn counter_rate(
    metric: &str,
    previous: u64,
    current: u64,
    dt: f64,
) -> (f64, Option<CounterAnomaly>) {
    if current < previous {
        let anomaly = CounterAnomaly {
            metric: metric.to_string(),
            previous,
            current,
        };
        return (0.0, Some(anomaly));
    }
    if dt <= 0.0 {
        return (0.0, None);
    }
    ((current - previous) as f64 / dt, None)
}

/// Busy share of one core between two readings, 0..=100.
/// `None` when any tick category went backwards.
pub fn cpu_percent(previous: &CpuTicks, current: &CpuTicks) -> Option<f64> {
    let prev = previous.fields();
    let cur = current.fields();
    if cur.iter().zip(prev.iter()).any(|(c, p)| c < p) {
        return None;
    }
    let total = current.total().saturating_sub(previous.total());
    if total == 0 {
        return Some(0.0);
    }
    let idle = current.idle_all().saturating_sub(previous.idle_all());
    let busy = total.saturating_sub(idle);
    Some((busy as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}

fn cpu_rates(
    previous: &[CpuTicks],
    current: &[CpuTicks],
    breakdown: CpuBreakdown,
    out: &mut RateSet,
) {
    let mut per_core = Vec::with_capacity(current.len());
    for (i, cur) in current.iter().enumerate() {
        let metric = format!("cpu.core{i}");
        let pct = match previous.get(i) {
            Some(prev) => match cpu_percent(prev, cur) {
                Some(p) => p,
                None => {
                    out.anomalies.push(CounterAnomaly {
                        metric: metric.clone(),
                        previous: prev.total(),
                        current: cur.total(),
                    });
                    0.0
                }
            },
            // core came online since the last reading
            None => 0.0,
        };
        per_core.push(pct);
        if breakdown == CpuBreakdown::PerCore {
            out.values.insert(metric, pct);
        }
    }
    let avg = if per_core.is_empty() {
        0.0
    } else {
        per_core.iter().sum::<f64>() / per_core.len() as f64
    };
    out.values.insert("cpu.total".to_string(), avg);
}

fn net_rates(
    previous: &BTreeMap<String, NetCounters>,
    current: &BTreeMap<String, NetCounters>,
    dt: f64,
    out: &mut RateSet,
) {
    let (mut rx_sum, mut tx_sum) = (0.0, 0.0);
    for (iface, cur) in current {
        let prev = previous.get(iface).copied().unwrap_or(*cur);
        let rx_metric = format!("net.{iface}.rx_bps");
        let tx_metric = format!("net.{iface}.tx_bps");
        let (rx, rx_anomaly) = counter_rate(&rx_metric, prev.rx_bytes, cur.rx_bytes, dt);
        let (tx, tx_anomaly) = counter_rate(&tx_metric, prev.tx_bytes, cur.tx_bytes, dt);
        out.anomalies.extend(rx_anomaly);
        out.anomalies.extend(tx_anomaly);
        rx_sum += rx;
        tx_sum += tx;
        out.values.insert(rx_metric, rx);
        out.values.insert(tx_metric, tx);
    }
    out.values.insert("net.rx_bps".to_string(), rx_sum);
    out.values.insert("net.tx_bps".to_string(), tx_sum);
}

fn disk_rates(
    previous: &BTreeMap<String, DiskIoCounters>,
    current: &BTreeMap<String, DiskIoCounters>,
    dt: f64,
    out: &mut RateSet,
) {
    let (mut read_sum, mut write_sum) = (0.0, 0.0);
    for (dev, cur) in current {
        let prev = previous.get(dev).copied().unwrap_or(*cur);
        let read_metric = format!("disk.{dev}.read_bps");
        let write_metric = format!("disk.{dev}.write_bps");
        let (r, r_anomaly) = counter_rate(&read_metric, prev.read_bytes, cur.read_bytes, dt);
        let (w, w_anomaly) = counter_rate(&write_metric, prev.write_bytes, cur.write_bytes, dt);
        out.anomalies.extend(r_anomaly);
        out.anomalies.extend(w_anomaly);
        read_sum += r;
        write_sum += w;
        out.values.insert(read_metric, r);
        out.values.insert(write_metric, w);
    }
    out.values.insert("disk.read_bps".to_string(), read_sum);
    out.values.insert("disk.write_bps".to_string(), write_sum);
}

/// Pure rate computation between two full samples.
///
/// Counters that are unavailable in either sample yield no rates and are
/// listed in [`RateSet::stale`].
pub fn rate(
    previous: &RawCounterSample,
    current: &RawCounterSample,
    breakdown: CpuBreakdown,
) -> RateSet {
    let mut out = RateSet::default();
    let dt = current.ts - previous.ts;
    if dt <= 0.0 {
        out.warnings
            .push(format!("non-increasing sample clock (dt = {dt:.3}s), rates zeroed"));
    }
    match (&previous.cpu, &current.cpu) {
        (Ok(p), Ok(c)) => cpu_rates(p, c, breakdown, &mut out),
        (_, cur) => stale(&mut out, SourceKind::Cpu, cur.as_ref().err()),
    }
    match (&previous.net, &current.net) {
        (Ok(p), Ok(c)) => net_rates(p, c, dt, &mut out),
        (_, cur) => stale(&mut out, SourceKind::Network, cur.as_ref().err()),
    }
    match (&previous.disk_io, &current.disk_io) {
        (Ok(p), Ok(c)) => disk_rates(p, c, dt, &mut out),
        (_, cur) => stale(&mut out, SourceKind::DiskIo, cur.as_ref().err()),
    }
    for a in &out.anomalies {
        warn!(metric = %a.metric, previous = a.previous, current = a.current, "counter went backwards; clamping rate to 0");
    }
    out
}

fn stale(out: &mut RateSet, kind: SourceKind, err: Option<&SourceUnavailable>) {
    out.stale.push(kind);
    if let Some(e) = err {
        out.warnings.push(e.to_string());
    }
}

#[derive(Debug, Clone)]
struct LastGood<T> {
    ts: f64,
    value: T,
}

/// Keeps the last good reading of every counter source, each with its own
/// timestamp, so a source that drops out for a few ticks resumes with a rate
/// over the whole gap instead of restarting from zero.
#[derive(Debug, Default)]
pub struct RateCalculator {
    breakdown: CpuBreakdown,
    observed: bool,
    cpu: Option<LastGood<Vec<CpuTicks>>>,
    net: Option<LastGood<BTreeMap<String, NetCounters>>>,
    disk_io: Option<LastGood<BTreeMap<String, DiskIoCounters>>>,
}

impl CpuBreakdown {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "average" | "avg" | "total" => Some(CpuBreakdown::Average),
            "per_core" | "percore" | "cores" => Some(CpuBreakdown::PerCore),
            _ => None,
        }
    }
}

impl RateCalculator {
    pub fn new(breakdown: CpuBreakdown) -> Self {
        Self {
            breakdown,
            ..Self::default()
        }
    }

    pub fn observe(&mut self, current: &RawCounterSample) -> RateSet {
        let mut out = RateSet {
            warming_up: !self.observed,
            ..RateSet::default()
        };
        self.observed = true;
        let breakdown = self.breakdown;
        let ts = current.ts;

        step(&mut self.cpu, &current.cpu, ts, SourceKind::Cpu, &mut out, |prev, cur, _dt, out| {
            cpu_rates(prev, cur, breakdown, out)
        });
        step(&mut self.net, &current.net, ts, SourceKind::Network, &mut out, net_rates);
        step(&mut self.disk_io, &current.disk_io, ts, SourceKind::DiskIo, &mut out, disk_rates);

        for a in &out.anomalies {
            warn!(metric = %a.metric, previous = a.previous, current = a.current, "counter went backwards; clamping rate to 0");
        }
        out
    }
}

// First sight of a source compares it with itself, which yields zero rates
// for every metric it carries.
fn step<T: Clone>(
    last: &mut Option<LastGood<T>>,
    reading: &Reading<T>,
    ts: f64,
    kind: SourceKind,
    out: &mut RateSet,
    compute: impl FnOnce(&T, &T, f64, &mut RateSet),
) {
    let cur = match reading {
        Ok(cur) => cur,
        Err(e) => {
            out.stale.push(kind);
            out.warnings.push(e.to_string());
            return;
        }
    };
    match last.as_ref() {
        Some(prev) => {
            let dt = ts - prev.ts;
            if dt <= 0.0 {
                out.warnings.push(format!(
                    "non-increasing sample clock for {kind} (dt = {dt:.3}s), rates zeroed"
                ));
            }
            compute(&prev.value, cur, dt, out);
        }
        None => compute(cur, cur, 0.0, out),
    }
    *last = Some(LastGood {
        ts,
        value: cur.clone(),
    });
}
