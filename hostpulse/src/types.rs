//! Types that mirror the agent's snapshot JSON. Unknown fields are ignored
//! and missing ones default, so older and newer agents both decode.

use std::collections::BTreeMap;

use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Memory {
    pub total: u64,
    pub used: u64,
    #[serde(default)]
    pub swap_total: u64,
    #[serde(default)]
    pub swap_used: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Disk {
    pub name: String,
    pub mount: String,
    pub total: u64,
    pub available: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    #[serde(default)]
    pub user: Option<String>,
    pub cpu_pct: f32,
    #[serde(default)]
    pub mem_bytes: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessTable {
    pub count: usize,
    #[serde(default)]
    pub by_cpu: Vec<ProcessInfo>,
    #[serde(default)]
    pub by_memory: Vec<ProcessInfo>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Host {
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub os: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LogLine {
    pub at: String,
    pub level: String,
    pub message: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Gauges {
    pub memory: Option<Memory>,
    pub disks: Option<Vec<Disk>>,
    pub processes: Option<ProcessTable>,
    pub load: Option<LoadAverage>,
    pub uptime_secs: Option<u64>,
    pub host: Host,
    pub logs: Vec<LogLine>,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct Point {
    pub ts: f64,
    pub value: f64,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Snapshot {
    pub seq: u64,
    pub ts: f64,
    pub warming_up: bool,
    pub rates: BTreeMap<String, f64>,
    pub gauges: Gauges,
    pub history: BTreeMap<String, Vec<Point>>,
    pub warnings: Vec<String>,
    pub unavailable: Vec<String>,
}

impl Snapshot {
    pub fn rate(&self, metric: &str) -> Option<f64> {
        self.rates.get(metric).copied()
    }

    pub fn mem_used_pct(&self) -> Option<f64> {
        self.gauges
            .memory
            .as_ref()
            .filter(|m| m.total > 0)
            .map(|m| m.used as f64 / m.total as f64 * 100.0)
    }
}
