//! The tick loop: sample, rate, record history, assemble, publish.

use std::sync::{Arc, Mutex, TryLockError};
use std::time::Duration;

use tokio::sync::{watch, RwLock};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::error::DriverError;
use crate::history::HistoryStore;
use crate::hub::Hub;
use crate::rates::{CpuBreakdown, RateCalculator};
use crate::sampler::{Sample, Sampler, SourceHealth};
use crate::snapshot::{assemble, history_points, AssemblyInput, MetricFilter, Snapshot};
use crate::types::{unix_now, HostInfo, MetricPoint};

pub type SharedHistory = Arc<RwLock<HistoryStore>>;

#[derive(Debug, Clone)]
pub struct DriverSettings {
    pub tick: Duration,
    pub window: usize,
    pub grace: Duration,
    pub cpu: CpuBreakdown,
    pub include: MetricFilter,
}

impl From<&AgentConfig> for DriverSettings {
    fn from(cfg: &AgentConfig) -> Self {
        Self {
            tick: cfg.tick(),
            window: cfg.window,
            grace: cfg.grace(),
            cpu: cfg.cpu,
            include: cfg.include_filter(),
        }
    }
}

/// Single writer of history and of the hub's latest snapshot.
pub struct Driver<S: Sampler> {
    sampler: Arc<Mutex<S>>,
    settings: DriverSettings,
    rates: RateCalculator,
    health: SourceHealth,
    history: SharedHistory,
    hub: Hub,
    host: HostInfo,
    // None once u64::MAX has been published
    next_seq: Option<u64>,
    previous: Option<Arc<Snapshot>>,
}

impl<S: Sampler> Driver<S> {
    pub fn new(sampler: S, settings: DriverSettings, history: SharedHistory, hub: Hub) -> Self {
        let host = sampler.host_info();
        Self {
            sampler: Arc::new(Mutex::new(sampler)),
            rates: RateCalculator::new(settings.cpu),
            settings,
            health: SourceHealth::default(),
            history,
            hub,
            host,
            next_seq: Some(0),
            previous: None,
        }
    }

    /// Start numbering at `seq` instead of 0.
    pub fn with_first_seq(mut self, seq: u64) -> Self {
        self.next_seq = Some(seq);
        self
    }

    pub fn host(&self) -> &HostInfo {
        &self.host
    }

    /// Run one full tick and return the published snapshot.
    pub async fn tick_once(&mut self) -> Result<Arc<Snapshot>, DriverError> {
        let seq = self.next_seq.ok_or(DriverError::SequenceExhausted { last: u64::MAX })?;

        let sample = self.sample().await;
        self.health.record(&sample);
        let ts = sample.counters.ts;
        let rates = self.rates.observe(&sample.counters);

        let snapshot = {
            let mut history = self.history.write().await;
            for (metric, value) in history_points(&rates, &sample.gauges) {
                history.push(&metric, MetricPoint::new(ts, value));
            }
            let retired = history.retire_stale(ts, self.settings.grace.as_secs_f64());
            if !retired.is_empty() {
                info!(metrics = ?retired, "retired metrics with no recent samples");
            }
            assemble(AssemblyInput {
                seq,
                ts,
                rates: &rates,
                gauges: &sample.gauges,
                previous: self.previous.as_deref(),
                history: &history,
                host: &self.host,
                window: self.settings.window,
                include: &self.settings.include,
            })
        };

        let published = self.hub.publish(snapshot);
        self.previous = Some(Arc::clone(&published));
        self.next_seq = seq.checked_add(1);
        Ok(published)
    }

    /// Tick until `shutdown` flips to true. Returns early only on a fatal error.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), DriverError> {
        let mut ticker = interval(self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.settings.tick.as_millis() as u64, "sampling started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.tick_once().await {
                        Ok(s) => debug!(seq = s.seq, "tick"),
                        Err(e) => {
                            error!(error = %e, "stopping sampler");
                            return Err(e);
                        }
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("sampling stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    // OS reads may block; run them off the runtime and give up after one tick.
    // A read that is still running holds the sampler lock, so the next tick
    // reports everything unavailable rather than queueing behind it.
    async fn sample(&self) -> Sample {
        let sampler = Arc::clone(&self.sampler);
        let started = unix_now();
        let job = tokio::task::spawn_blocking(move || {
            let mut guard = match sampler.try_lock() {
                Ok(g) => g,
                Err(TryLockError::Poisoned(p)) => p.into_inner(),
                Err(TryLockError::WouldBlock) => return None,
            };
            Some(guard.sample())
        });
        match timeout(self.settings.tick, job).await {
            Ok(Ok(Some(sample))) => sample,
            Ok(Ok(None)) => {
                warn!("previous sampling still running; skipping reads this tick");
                Sample::unavailable(started, "previous sampling still running")
            }
            Ok(Err(e)) => {
                warn!(error = %e, "sampler task failed");
                Sample::unavailable(started, &format!("sampler task failed: {e}"))
            }
            Err(_) => {
                warn!(limit_ms = self.settings.tick.as_millis() as u64, "sampling timed out");
                Sample::unavailable(started, "sampling timed out")
            }
        }
    }
}
