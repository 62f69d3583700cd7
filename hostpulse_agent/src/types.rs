//! Data types shared by the sampler, the assembler and the wire format.
//! Serialized shapes are consumed by browser charts; keep them stable.

use std::collections::BTreeMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

use crate::error::{Reading, SourceKind, SourceUnavailable};

/// Seconds since the Unix epoch, sub-second precision.
pub fn unix_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

// ---------- Cumulative counters ----------

/// Cumulative jiffies for one core, in `/proc/stat` column order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    pub fn fields(&self) -> [u64; 8] {
        [
            self.user,
            self.nice,
            self.system,
            self.idle,
            self.iowait,
            self.irq,
            self.softirq,
            self.steal,
        ]
    }

    pub fn total(&self) -> u64 {
        self.fields().iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }

    pub fn idle_all(&self) -> u64 {
        self.idle.saturating_add(self.iowait)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NetCounters {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiskIoCounters {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

/// Cumulative counters read once per tick.
#[derive(Debug, Clone)]
pub struct RawCounterSample {
    pub ts: f64,
    pub cpu: Reading<Vec<CpuTicks>>,
    pub net: Reading<BTreeMap<String, NetCounters>>,
    pub disk_io: Reading<BTreeMap<String, DiskIoCounters>>,
}

impl RawCounterSample {
    /// A sample with every counter marked unavailable for the same reason.
    pub fn unavailable(ts: f64, reason: &str) -> Self {
        Self {
            ts,
            cpu: Err(SourceUnavailable::new(SourceKind::Cpu, reason)),
            net: Err(SourceUnavailable::new(SourceKind::Network, reason)),
            disk_io: Err(SourceUnavailable::new(SourceKind::DiskIo, reason)),
        }
    }
}

// ---------- Gauges ----------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryGauge {
    pub total: u64,
    pub used: u64,
    pub swap_total: u64,
    pub swap_used: u64,
}

impl MemoryGauge {
    pub fn used_pct(&self) -> f64 {
        percent(self.used, self.total)
    }

    pub fn swap_used_pct(&self) -> f64 {
        percent(self.swap_used, self.swap_total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiskUsage {
    pub name: String,
    pub mount: String,
    pub fs: String,
    pub total: u64,
    pub available: u64,
}

impl DiskUsage {
    pub fn used_pct(&self) -> f64 {
        percent(self.total.saturating_sub(self.available), self.total)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessInfo {
    pub pid: u32,
    pub name: String,
    /// Owning user name; `None` when the uid has no passwd entry.
    pub user: Option<String>,
    pub cpu_pct: f32,
    pub mem_pct: f32,
    pub mem_bytes: u64,
}

/// Which ranking of the process list to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRanking {
    Cpu,
    Memory,
}

impl ProcessRanking {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "cpu" => Some(ProcessRanking::Cpu),
            "memory" | "mem" => Some(ProcessRanking::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessTable {
    /// Every process on the host, not just the listed ones.
    pub count: usize,
    pub by_cpu: Vec<ProcessInfo>,
    pub by_memory: Vec<ProcessInfo>,
}

impl ProcessTable {
    /// Keep the `top_k` busiest processes by CPU and, separately, the
    /// `top_k` largest by resident memory.
    pub fn rank(all: Vec<ProcessInfo>, top_k: usize) -> Self {
        let count = all.len();
        let mut by_cpu = all.clone();
        by_cpu.sort_by(|a, b| {
            b.cpu_pct
                .total_cmp(&a.cpu_pct)
                .then_with(|| a.pid.cmp(&b.pid))
        });
        by_cpu.truncate(top_k);

        let mut by_memory = all;
        by_memory.sort_by(|a, b| b.mem_bytes.cmp(&a.mem_bytes).then_with(|| a.pid.cmp(&b.pid)));
        by_memory.truncate(top_k);

        Self {
            count,
            by_cpu,
            by_memory,
        }
    }

    pub fn ranked(&self, ranking: ProcessRanking) -> &[ProcessInfo] {
        match ranking {
            ProcessRanking::Cpu => &self.by_cpu,
            ProcessRanking::Memory => &self.by_memory,
        }
    }
}

/// Current clock of each core in MHz, as the OS reports it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CpuFrequency {
    pub avg_mhz: u64,
    pub min_mhz: u64,
    pub max_mhz: u64,
    pub per_core_mhz: Vec<u64>,
}

impl CpuFrequency {
    /// `None` when no core reports a clock.
    pub fn from_cores(per_core_mhz: Vec<u64>) -> Option<Self> {
        let known: Vec<u64> = per_core_mhz.iter().copied().filter(|f| *f > 0).collect();
        let min_mhz = *known.iter().min()?;
        let max_mhz = *known.iter().max()?;
        let avg_mhz = known.iter().sum::<u64>() / known.len() as u64;
        Some(Self {
            avg_mhz,
            min_mhz,
            max_mhz,
            per_core_mhz,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterfaceAddr {
    pub addr: String,
    pub prefix: u8,
    /// Dotted netmask, IPv4 only.
    pub netmask: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetInterface {
    pub name: String,
    pub mac: String,
    pub addrs: Vec<InterfaceAddr>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LoadAverage {
    pub one: f64,
    pub five: f64,
    pub fifteen: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Temperature {
    pub label: String,
    pub celsius: f32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostInfo {
    pub hostname: String,
    pub os: String,
    pub os_version: String,
    pub kernel: String,
    pub arch: String,
    pub cpu_count: usize,
    /// Seconds since the Unix epoch.
    pub boot_time: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogLine {
    pub ts: f64,
    /// Local wall-clock time, `YYYY-MM-DD HH:MM:SS`.
    pub at: String,
    pub level: String,
    pub target: String,
    pub message: String,
}

/// Instantaneous readings for one tick.
#[derive(Debug, Clone)]
pub struct GaugeSample {
    pub memory: Reading<MemoryGauge>,
    pub disks: Reading<Vec<DiskUsage>>,
    pub processes: Reading<ProcessTable>,
    pub load: Reading<LoadAverage>,
    pub uptime_secs: Reading<u64>,
    pub temperatures: Reading<Vec<Temperature>>,
    pub cpu_freq: Reading<CpuFrequency>,
    pub interfaces: Reading<Vec<NetInterface>>,
    pub logs: Vec<LogLine>,
}

impl GaugeSample {
    pub fn unavailable(reason: &str) -> Self {
        Self {
            memory: Err(SourceUnavailable::new(SourceKind::Memory, reason)),
            disks: Err(SourceUnavailable::new(SourceKind::Disks, reason)),
            processes: Err(SourceUnavailable::new(SourceKind::Processes, reason)),
            load: Err(SourceUnavailable::new(SourceKind::Load, reason)),
            uptime_secs: Err(SourceUnavailable::new(SourceKind::Uptime, reason)),
            temperatures: Err(SourceUnavailable::new(SourceKind::Temperatures, reason)),
            cpu_freq: Err(SourceUnavailable::new(SourceKind::CpuFrequency, reason)),
            interfaces: Err(SourceUnavailable::new(SourceKind::Interfaces, reason)),
            logs: Vec::new(),
        }
    }
}

/// Gauges as published: `None` only when a source has never been readable.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Gauges {
    pub memory: Option<MemoryGauge>,
    pub disks: Option<Vec<DiskUsage>>,
    pub processes: Option<ProcessTable>,
    pub load: Option<LoadAverage>,
    pub uptime_secs: Option<u64>,
    pub temperatures: Option<Vec<Temperature>>,
    pub cpu_freq: Option<CpuFrequency>,
    pub interfaces: Option<Vec<NetInterface>>,
    pub host: HostInfo,
    pub logs: Vec<LogLine>,
}

/// One stored history value; the metric name is the key it is stored under.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricPoint {
    pub ts: f64,
    pub value: f64,
}

impl MetricPoint {
    pub fn new(ts: f64, value: f64) -> Self {
        Self { ts, value }
    }
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}
