//! Tick driver end to end with a scripted sampler.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use hostpulse_agent::driver::{Driver, DriverSettings, SharedHistory};
use hostpulse_agent::error::{DriverError, SourceKind, SourceUnavailable};
use hostpulse_agent::history::HistoryStore;
use hostpulse_agent::hub::{DeliveryPolicy, Hub, SessionOptions};
use hostpulse_agent::rates::CpuBreakdown;
use hostpulse_agent::sampler::{Sample, Sampler};
use hostpulse_agent::snapshot::MetricFilter;
use hostpulse_agent::types::{
    CpuFrequency, CpuTicks, DiskIoCounters, GaugeSample, HostInfo, LoadAverage, MemoryGauge, NetCounters,
    ProcessTable, RawCounterSample,
};
use tokio::sync::{watch, RwLock};

const BASE_TS: f64 = 1_700_000_000.0;

/// Steady host: 50% CPU, 1000 B/s received, 4096 B/s read.
fn steady(i: u64) -> Sample {
    let ts = BASE_TS + i as f64;
    Sample {
        counters: RawCounterSample {
            ts,
            cpu: Ok(vec![CpuTicks {
                user: 50 * i,
                idle: 50 * i,
                ..CpuTicks::default()
            }]),
            net: Ok(BTreeMap::from([(
                "eth0".to_string(),
                NetCounters {
                    rx_bytes: 1_000 * i,
                    tx_bytes: 0,
                },
            )])),
            disk_io: Ok(BTreeMap::from([(
                "sda".to_string(),
                DiskIoCounters {
                    read_bytes: 4_096 * i,
                    write_bytes: 0,
                },
            )])),
        },
        gauges: GaugeSample {
            memory: Ok(MemoryGauge {
                total: 1_000,
                used: 200 + i,
                swap_total: 0,
                swap_used: 0,
            }),
            disks: Ok(Vec::new()),
            processes: Ok(ProcessTable {
                count: 42,
                ..ProcessTable::default()
            }),
            load: Ok(LoadAverage {
                one: 0.5,
                five: 0.4,
                fifteen: 0.3,
            }),
            uptime_secs: Ok(3_600 + i),
            temperatures: Ok(Vec::new()),
            cpu_freq: CpuFrequency::from_cores(vec![2_400])
                .ok_or_else(|| SourceUnavailable::new(SourceKind::CpuFrequency, "no clock")),
            interfaces: Ok(Vec::new()),
            logs: Vec::new(),
        },
    }
}

struct Scripted {
    samples: VecDeque<Sample>,
}

impl Scripted {
    fn new(samples: impl IntoIterator<Item = Sample>) -> Self {
        Self {
            samples: samples.into_iter().collect(),
        }
    }
}

impl Sampler for Scripted {
    fn sample(&mut self) -> Sample {
        self.samples
            .pop_front()
            .unwrap_or_else(|| Sample::unavailable(BASE_TS + 1_000.0, "script exhausted"))
    }

    fn host_info(&self) -> HostInfo {
        HostInfo {
            hostname: "testhost".to_string(),
            cpu_count: 1,
            ..HostInfo::default()
        }
    }
}

/// Never finishes within a tick.
struct Slow;

impl Sampler for Slow {
    fn sample(&mut self) -> Sample {
        std::thread::sleep(Duration::from_millis(300));
        steady(0)
    }
}

fn settings(tick: Duration) -> DriverSettings {
    DriverSettings {
        tick,
        window: 5,
        grace: Duration::from_secs(30),
        cpu: CpuBreakdown::PerCore,
        include: MetricFilter::all(),
    }
}

fn driver<S: Sampler>(sampler: S, hub: &Hub) -> (Driver<S>, SharedHistory) {
    let history = Arc::new(RwLock::new(HistoryStore::new(20)));
    let d = Driver::new(sampler, settings(Duration::from_secs(1)), history.clone(), hub.clone());
    (d, history)
}

#[tokio::test]
async fn seq_increases_by_one_per_tick() {
    let hub = Hub::new();
    let (mut d, _) = driver(Scripted::new((0..6).map(steady)), &hub);
    let mut seqs = Vec::new();
    for _ in 0..6 {
        seqs.push(d.tick_once().await.unwrap().seq);
    }
    assert_eq!(seqs, vec![0, 1, 2, 3, 4, 5]);
    assert_eq!(hub.stats().published, 6);
    assert_eq!(d.host().hostname, "testhost");
}

#[tokio::test]
async fn coalescing_and_lossless_viewers_through_a_stall() {
    let hub = Hub::new();
    let (mut d, _) = driver(Scripted::new((0..10).map(steady)), &hub);
    let coalesce = hub.subscribe(SessionOptions::default());
    let lossless = hub.subscribe(SessionOptions {
        policy: DeliveryPolicy::Lossless { backlog: 3 },
        ..SessionOptions::default()
    });

    // both keep up for seq 0 and 1
    for expected in 0..2 {
        d.tick_once().await.unwrap();
        assert_eq!(coalesce.try_next().map(|x| x.seq()), Some(expected));
        assert_eq!(lossless.try_next().map(|x| x.seq()), Some(expected));
    }

    // both stall while seq 2..=6 are published
    for _ in 2..7 {
        d.tick_once().await.unwrap();
    }

    let c: Vec<u64> = std::iter::from_fn(|| coalesce.try_next()).map(|x| x.seq()).collect();
    assert_eq!(c, vec![6]);

    let l: Vec<_> = std::iter::from_fn(|| lossless.try_next()).collect();
    let seqs: Vec<(u64, u64)> = l.iter().map(|x| (x.seq(), x.dropped)).collect();
    assert_eq!(seqs, vec![(4, 2), (5, 0), (6, 0)]);
    let json = l[0].snapshot.render(&MetricFilter::all(), l[0].dropped).unwrap();
    assert!(json.contains("2 snapshots dropped"));

    // both catch up for the rest
    for expected in 7..10 {
        let published = d.tick_once().await.unwrap();
        assert_eq!(published.seq, expected);
        assert_eq!(coalesce.try_next().map(|x| x.seq()), Some(expected));
        assert_eq!(lossless.try_next().map(|x| x.seq()), Some(expected));
    }
}

#[tokio::test]
async fn snapshot_carries_rates_gauges_and_history() {
    let hub = Hub::new();
    let (mut d, history) = driver(Scripted::new((0..8).map(steady)), &hub);
    let first = d.tick_once().await.unwrap();
    assert!(first.warming_up);
    assert_eq!(first.rates["net.eth0.rx_bps"], 0.0);

    let mut last = first;
    for _ in 1..8 {
        last = d.tick_once().await.unwrap();
    }
    assert!(!last.warming_up);
    assert_eq!(last.rates["net.eth0.rx_bps"], 1_000.0);
    assert_eq!(last.rates["disk.sda.read_bps"], 4_096.0);
    assert!((last.rates["cpu.total"] - 50.0).abs() < 1e-9);
    assert_eq!(last.gauges.host.hostname, "testhost");
    assert_eq!(last.gauges.processes.as_ref().map(|p| p.count), Some(42));

    // window of 5 per metric, newest last
    let cpu = &last.history["cpu.total"];
    assert_eq!(cpu.len(), 5);
    assert_eq!(cpu.last().map(|p| p.ts), Some(BASE_TS + 7.0));
    assert!(last.history.contains_key("mem.used_pct"));
    assert!(last.history.contains_key("load.one"));
    assert!(!last.history.contains_key("swap.used_pct"));

    // full retention stays in the store
    assert_eq!(history.read().await.window("cpu.total", 100).len(), 8);
}

#[tokio::test]
async fn unavailable_sources_hold_previous_values() {
    let mut gap = steady(2);
    gap.counters.net = Err(SourceUnavailable::new(SourceKind::Network, "interface list failed"));
    gap.gauges.memory = Err(SourceUnavailable::new(SourceKind::Memory, "meminfo unreadable"));

    let hub = Hub::new();
    let (mut d, _) = driver(Scripted::new([steady(0), steady(1), gap, steady(3)]), &hub);
    d.tick_once().await.unwrap();
    let before = d.tick_once().await.unwrap();
    let during = d.tick_once().await.unwrap();

    assert_eq!(during.unavailable, vec![SourceKind::Network, SourceKind::Memory]);
    assert_eq!(during.rates["net.eth0.rx_bps"], before.rates["net.eth0.rx_bps"]);
    assert_eq!(during.rates["net.eth0.rx_bps"], 1_000.0);
    assert_eq!(during.gauges.memory, before.gauges.memory);
    assert!(during.gauges.memory.is_some());
    assert!(during
        .warnings
        .iter()
        .any(|w| w == "memory sampling unavailable: meminfo unreadable"));

    // back again: rate covers the two seconds since the last good reading
    let after = d.tick_once().await.unwrap();
    assert!(after.unavailable.is_empty());
    assert_eq!(after.rates["net.eth0.rx_bps"], 1_000.0);
    assert_eq!(after.gauges.memory.as_ref().map(|m| m.used), Some(203));
}

#[tokio::test]
async fn counter_reset_reports_a_warning_for_that_tick() {
    let mut reset = steady(2);
    reset.counters.net = Ok(BTreeMap::from([(
        "eth0".to_string(),
        NetCounters {
            rx_bytes: 10,
            tx_bytes: 0,
        },
    )]));
    let hub = Hub::new();
    let (mut d, _) = driver(Scripted::new([steady(0), steady(1), reset, steady(3)]), &hub);
    d.tick_once().await.unwrap();
    d.tick_once().await.unwrap();
    let s = d.tick_once().await.unwrap();
    assert_eq!(s.rates["net.eth0.rx_bps"], 0.0);
    assert!(s.warnings.iter().any(|w| w.contains("counter reset on net.eth0.rx_bps")));
    let next = d.tick_once().await.unwrap();
    assert!(next.warnings.is_empty());
}

#[tokio::test]
async fn sequence_exhaustion_is_fatal() {
    let hub = Hub::new();
    let (d, _) = driver(Scripted::new((0..3).map(steady)), &hub);
    let mut d = d.with_first_seq(u64::MAX - 1);
    assert_eq!(d.tick_once().await.unwrap().seq, u64::MAX - 1);
    assert_eq!(d.tick_once().await.unwrap().seq, u64::MAX);
    assert!(matches!(
        d.tick_once().await,
        Err(DriverError::SequenceExhausted { last: u64::MAX })
    ));
    assert_eq!(hub.stats().published, 2);
}

#[tokio::test]
async fn slow_sampling_marks_every_source_unavailable() {
    let hub = Hub::new();
    let history = Arc::new(RwLock::new(HistoryStore::new(20)));
    let mut d = Driver::new(Slow, settings(Duration::from_millis(50)), history, hub.clone());
    let s = d.tick_once().await.unwrap();
    assert_eq!(s.unavailable.len(), SourceKind::ALL.len());
    assert!(s.warnings.iter().any(|w| w.contains("sampling timed out")));
    assert!(s.rates.is_empty());
}

#[tokio::test]
async fn run_stops_on_shutdown() {
    let hub = Hub::new();
    let history = Arc::new(RwLock::new(HistoryStore::new(20)));
    let d = Driver::new(
        Scripted::new((0..1_000).map(steady)),
        settings(Duration::from_millis(10)),
        history,
        hub.clone(),
    );
    let (tx, rx) = watch::channel(false);
    let task = tokio::spawn(d.run(rx));

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while hub.stats().published < 3 {
        assert!(tokio::time::Instant::now() < deadline, "driver did not tick");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    tx.send(true).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("driver stops")
        .expect("task");
    assert!(result.is_ok());
}
