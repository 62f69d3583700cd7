//! OS readers: `/proc` counters on Linux and persistent sysinfo handles.

use std::collections::BTreeMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::panic::{catch_unwind, AssertUnwindSafe};

use sysinfo::{
    Components, CpuRefreshKind, Disks, MemoryRefreshKind, Networks, ProcessRefreshKind,
    ProcessesToUpdate, RefreshKind, System, UpdateKind, Users,
};

use crate::error::{Reading, SourceKind, SourceUnavailable};
use crate::types::{
    CpuFrequency, CpuTicks, DiskIoCounters, DiskUsage, HostInfo, InterfaceAddr, LoadAverage,
    MemoryGauge, NetCounters, NetInterface, ProcessInfo, ProcessTable, Temperature,
};

/// Sector size used by `/proc/diskstats`, independent of the device.
const SECTOR_BYTES: u64 = 512;

// ---------- /proc parsing ----------

/// Per-core lines (`cpu0`, `cpu1`, ...) of `/proc/stat`; the aggregate `cpu`
/// line is skipped. Missing trailing columns (old kernels) read as 0.
pub fn parse_proc_stat(text: &str) -> Vec<CpuTicks> {
    let mut cores = Vec::new();
    for line in text.lines() {
        let mut it = line.split_whitespace();
        let Some(label) = it.next() else { continue };
        let Some(idx) = label.strip_prefix("cpu") else { continue };
        if idx.is_empty() || !idx.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        let mut v = [0u64; 8];
        for (slot, tok) in v.iter_mut().zip(it) {
            *slot = tok.parse().unwrap_or(0);
        }
        cores.push(CpuTicks {
            user: v[0],
            nice: v[1],
            system: v[2],
            idle: v[3],
            iowait: v[4],
            irq: v[5],
            softirq: v[6],
            steal: v[7],
        });
    }
    cores
}

/// `/proc/diskstats`: field 3 is the device, 6 sectors read, 10 sectors written.
pub fn parse_diskstats(
    text: &str,
    is_whole_device: impl Fn(&str) -> bool,
) -> BTreeMap<String, DiskIoCounters> {
    let mut out = BTreeMap::new();
    for line in text.lines() {
        let cols: Vec<&str> = line.split_whitespace().collect();
        if cols.len() < 10 {
            continue;
        }
        let dev = cols[2];
        if dev.starts_with("loop") || dev.starts_with("ram") || !is_whole_device(dev) {
            continue;
        }
        let sectors_read: u64 = cols[5].parse().unwrap_or(0);
        let sectors_written: u64 = cols[9].parse().unwrap_or(0);
        out.insert(
            dev.to_string(),
            DiskIoCounters {
                read_bytes: sectors_read.saturating_mul(SECTOR_BYTES),
                write_bytes: sectors_written.saturating_mul(SECTOR_BYTES),
            },
        );
    }
    out
}

#[cfg(target_os = "linux")]
pub fn read_cpu_ticks() -> Reading<Vec<CpuTicks>> {
    let text = fs::read_to_string("/proc/stat")
        .map_err(|e| SourceUnavailable::new(SourceKind::Cpu, format!("/proc/stat: {e}")))?;
    let cores = parse_proc_stat(&text);
    if cores.is_empty() {
        return Err(SourceUnavailable::new(SourceKind::Cpu, "no per-core lines in /proc/stat"));
    }
    Ok(cores)
}

#[cfg(not(target_os = "linux"))]
pub fn read_cpu_ticks() -> Reading<Vec<CpuTicks>> {
    Err(SourceUnavailable::new(
        SourceKind::Cpu,
        "tick counters are only read on Linux",
    ))
}

#[cfg(target_os = "linux")]
pub fn read_disk_io() -> Reading<BTreeMap<String, DiskIoCounters>> {
    let text = fs::read_to_string("/proc/diskstats").map_err(|e| {
        SourceUnavailable::new(SourceKind::DiskIo, format!("/proc/diskstats: {e}"))
    })?;
    Ok(parse_diskstats(&text, |dev| {
        std::path::Path::new("/sys/block").join(dev).exists()
    }))
}

#[cfg(not(target_os = "linux"))]
pub fn read_disk_io() -> Reading<BTreeMap<String, DiskIoCounters>> {
    Err(SourceUnavailable::new(
        SourceKind::DiskIo,
        "disk counters are only read on Linux",
    ))
}

/// Dotted IPv4 netmask for a prefix length; lengths past 32 read as 32.
pub fn ipv4_netmask(prefix: u8) -> Ipv4Addr {
    let bits = u32::from(prefix.min(32));
    Ipv4Addr::from(u32::MAX.checked_shl(32 - bits).unwrap_or(0))
}

// ---------- sysinfo ----------

/// sysinfo has panicked on exotic platforms during refresh; keep that from
/// taking down a tick.
fn guarded<T>(kind: SourceKind, f: impl FnOnce() -> Reading<T>) -> Reading<T> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(e) => {
            let msg = e
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| e.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(SourceUnavailable::new(kind, format!("sysinfo panicked: {msg}")))
        }
    }
}

/// sysinfo handles kept alive across ticks so refreshes stay incremental.
pub struct SysHandles {
    sys: System,
    networks: Networks,
    disks: Disks,
    components: Components,
    users: Users,
}

impl SysHandles {
    pub fn new() -> Self {
        let refresh_kind = RefreshKind::nothing()
            .with_cpu(CpuRefreshKind::everything())
            .with_memory(MemoryRefreshKind::everything());
        Self {
            sys: System::new_with_specifics(refresh_kind),
            networks: Networks::new_with_refreshed_list(),
            disks: Disks::new_with_refreshed_list(),
            components: Components::new_with_refreshed_list(),
            users: Users::new_with_refreshed_list(),
        }
    }

    pub fn host_info(&self) -> HostInfo {
        let hostname = hostname::get()
            .ok()
            .and_then(|s| s.into_string().ok())
            .or_else(System::host_name)
            .unwrap_or_else(|| "unknown".to_string());
        HostInfo {
            hostname,
            os: System::name().unwrap_or_default(),
            os_version: System::os_version().unwrap_or_default(),
            kernel: System::kernel_version().unwrap_or_default(),
            arch: std::env::consts::ARCH.to_string(),
            cpu_count: self.sys.cpus().len(),
            boot_time: System::boot_time(),
        }
    }

    pub fn net_counters(&mut self) -> Reading<BTreeMap<String, NetCounters>> {
        guarded(SourceKind::Network, || {
            // drop interfaces that disappeared so history can retire them
            self.networks.refresh(true);
            Ok(self
                .networks
                .iter()
                .map(|(name, data)| {
                    (
                        name.to_string(),
                        NetCounters {
                            rx_bytes: data.total_received(),
                            tx_bytes: data.total_transmitted(),
                        },
                    )
                })
                .collect())
        })
    }

    pub fn memory(&mut self) -> Reading<MemoryGauge> {
        guarded(SourceKind::Memory, || {
            self.sys.refresh_memory();
            let total = self.sys.total_memory();
            if total == 0 {
                return Err(SourceUnavailable::new(
                    SourceKind::Memory,
                    "total memory reported as zero",
                ));
            }
            Ok(MemoryGauge {
                total,
                used: total.saturating_sub(self.sys.available_memory()),
                swap_total: self.sys.total_swap(),
                swap_used: self.sys.used_swap(),
            })
        })
    }

    pub fn disks(&mut self) -> Reading<Vec<DiskUsage>> {
        guarded(SourceKind::Disks, || {
            self.disks.refresh(true);
            Ok(self
                .disks
                .list()
                .iter()
                // pseudo filesystems (overlay, proc) report nothing useful
                .filter(|d| d.total_space() > 0)
                .map(|d| DiskUsage {
                    name: d.name().to_string_lossy().into_owned(),
                    mount: d.mount_point().to_string_lossy().into_owned(),
                    fs: d.file_system().to_string_lossy().into_owned(),
                    total: d.total_space(),
                    available: d.available_space(),
                })
                .collect())
        })
    }

    /// Every process is counted; the `top_k` busiest by CPU and the
    /// `top_k` largest by memory are listed.
    pub fn processes(&mut self, top_k: usize) -> Reading<ProcessTable> {
        guarded(SourceKind::Processes, || {
            self.sys.refresh_processes_specifics(
                ProcessesToUpdate::All,
                true,
                ProcessRefreshKind::nothing()
                    .with_cpu()
                    .with_memory()
                    .with_user(UpdateKind::OnlyIfNotSet),
            );
            // users created since the last tick
            let unknown_uid = self
                .sys
                .processes()
                .values()
                .filter_map(|p| p.user_id())
                .any(|uid| self.users.get_user_by_id(uid).is_none());
            if unknown_uid {
                self.users.refresh();
            }
            let n_cpus = self.sys.cpus().len().max(1) as f32;
            let total_mem = self.sys.total_memory().max(1) as f32;
            let all: Vec<ProcessInfo> = self
                .sys
                .processes()
                .values()
                .map(|p| ProcessInfo {
                    pid: p.pid().as_u32(),
                    name: p.name().to_string_lossy().into_owned(),
                    user: p
                        .user_id()
                        .and_then(|uid| self.users.get_user_by_id(uid))
                        .map(|u| u.name().to_string()),
                    cpu_pct: (p.cpu_usage() / n_cpus).clamp(0.0, 100.0),
                    mem_pct: (p.memory() as f32 / total_mem * 100.0).clamp(0.0, 100.0),
                    mem_bytes: p.memory(),
                })
                .collect();
            Ok(ProcessTable::rank(all, top_k))
        })
    }

    pub fn cpu_frequency(&mut self) -> Reading<CpuFrequency> {
        guarded(SourceKind::CpuFrequency, || {
            self.sys.refresh_cpu_frequency();
            let cores: Vec<u64> = self.sys.cpus().iter().map(|c| c.frequency()).collect();
            CpuFrequency::from_cores(cores).ok_or_else(|| {
                SourceUnavailable::new(SourceKind::CpuFrequency, "no core reports a clock")
            })
        })
    }

    /// Addresses of every interface seen by the last network refresh.
    pub fn interfaces(&self) -> Reading<Vec<NetInterface>> {
        guarded(SourceKind::Interfaces, || {
            Ok(self
                .networks
                .iter()
                .map(|(name, data)| NetInterface {
                    name: name.to_string(),
                    mac: data.mac_address().to_string(),
                    addrs: data
                        .ip_networks()
                        .iter()
                        .map(|net| InterfaceAddr {
                            addr: net.addr.to_string(),
                            prefix: net.prefix,
                            netmask: match net.addr {
                                IpAddr::V4(_) => Some(ipv4_netmask(net.prefix).to_string()),
                                IpAddr::V6(_) => None,
                            },
                        })
                        .collect(),
                })
                .collect())
        })
    }

    pub fn load(&self) -> Reading<LoadAverage> {
        guarded(SourceKind::Load, || {
            let l = System::load_average();
            Ok(LoadAverage {
                one: l.one,
                five: l.five,
                fifteen: l.fifteen,
            })
        })
    }

    pub fn uptime(&self) -> Reading<u64> {
        guarded(SourceKind::Uptime, || Ok(System::uptime()))
    }

    pub fn temperatures(&mut self) -> Reading<Vec<Temperature>> {
        guarded(SourceKind::Temperatures, || {
            self.components.refresh(false);
            Ok(self
                .components
                .list()
                .iter()
                .filter_map(|c| {
                    c.temperature().map(|t| Temperature {
                        label: c.label().to_string(),
                        celsius: t,
                    })
                })
                .filter(|t| t.celsius.is_finite())
                .collect())
        })
    }
}

impl Default for SysHandles {
    fn default() -> Self {
        Self::new()
    }
}
