//! Counter sampler: one call per tick, every OS read isolated per field.

use std::collections::BTreeMap;

use tracing::{info, warn};

use crate::error::{SourceKind, SourceUnavailable};
use crate::logbook::LogBook;
use crate::metrics::{read_cpu_ticks, read_disk_io, SysHandles};
use crate::types::{unix_now, GaugeSample, HostInfo, RawCounterSample};

/// Everything read from the OS in one tick.
#[derive(Debug, Clone)]
pub struct Sample {
    pub counters: RawCounterSample,
    pub gauges: GaugeSample,
}

impl Sample {
    pub fn unavailable(ts: f64, reason: &str) -> Self {
        Self {
            counters: RawCounterSample::unavailable(ts, reason),
            gauges: GaugeSample::unavailable(reason),
        }
    }

    /// Every source that failed this tick, in a stable order.
    pub fn failures(&self) -> Vec<&SourceUnavailable> {
        let c = &self.counters;
        let g = &self.gauges;
        [
            c.cpu.as_ref().err(),
            c.net.as_ref().err(),
            c.disk_io.as_ref().err(),
            g.memory.as_ref().err(),
            g.disks.as_ref().err(),
            g.processes.as_ref().err(),
            g.load.as_ref().err(),
            g.uptime_secs.as_ref().err(),
            g.temperatures.as_ref().err(),
            g.cpu_freq.as_ref().err(),
            g.interfaces.as_ref().err(),
        ]
        .into_iter()
        .flatten()
        .collect()
    }
}

/// Source of per-tick readings. Implementations may block; the driver runs
/// them on the blocking pool under a timeout.
pub trait Sampler: Send + 'static {
    fn sample(&mut self) -> Sample;

    fn host_info(&self) -> HostInfo {
        HostInfo::default()
    }
}

/// Reads the local host through `/proc` and sysinfo.
pub struct HostSampler {
    handles: SysHandles,
    logbook: LogBook,
    log_lines: usize,
    top_k: usize,
}

impl HostSampler {
    pub fn new(logbook: LogBook, log_lines: usize, top_k: usize) -> Self {
        Self {
            handles: SysHandles::new(),
            logbook,
            log_lines,
            top_k,
        }
    }
}

impl Sampler for HostSampler {
    fn sample(&mut self) -> Sample {
        let ts = unix_now();
        let counters = RawCounterSample {
            ts,
            cpu: read_cpu_ticks(),
            net: self.handles.net_counters(),
            disk_io: read_disk_io(),
        };
        let gauges = GaugeSample {
            memory: self.handles.memory(),
            disks: self.handles.disks(),
            processes: self.handles.processes(self.top_k),
            load: self.handles.load(),
            uptime_secs: self.handles.uptime(),
            temperatures: self.handles.temperatures(),
            cpu_freq: self.handles.cpu_frequency(),
            // reuses the network refresh done for the counters above
            interfaces: self.handles.interfaces(),
            logs: self.logbook.recent(self.log_lines),
        };
        Sample { counters, gauges }
    }

    fn host_info(&self) -> HostInfo {
        self.handles.host_info()
    }
}

/// Logs a source going away once and coming back once, instead of every tick.
#[derive(Debug, Default)]
pub struct SourceHealth {
    // kind -> consecutive failed ticks
    failing: BTreeMap<SourceKind, u64>,
}

impl SourceHealth {
    pub fn record(&mut self, sample: &Sample) {
        let failed: BTreeMap<SourceKind, &SourceUnavailable> = sample
            .failures()
            .into_iter()
            .map(|f| (f.kind, f))
            .collect();
        for kind in SourceKind::ALL {
            match (failed.get(&kind), self.failing.get_mut(&kind)) {
                (Some(err), None) => {
                    warn!(source = %kind, reason = %err.reason, "source unavailable; holding previous values");
                    self.failing.insert(kind, 1);
                }
                (Some(_), Some(n)) => *n += 1,
                (None, Some(n)) => {
                    info!(source = %kind, ticks = *n, "source recovered");
                    self.failing.remove(&kind);
                }
                (None, None) => {}
            }
        }
    }

    pub fn is_failing(&self, kind: SourceKind) -> bool {
        self.failing.contains_key(&kind)
    }
}
