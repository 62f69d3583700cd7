//! Fixed-capacity history per metric name.
//!
//! Each metric gets its own circular buffer sized once at creation; pushes
//! overwrite the oldest slot so nothing reallocates while the agent runs.

use std::collections::BTreeMap;

use tracing::debug;

use crate::types::MetricPoint;

/// Circular buffer holding the `cap` most recent values in push order.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<T>,
    cap: usize,
    // index of the oldest element once the buffer has wrapped
    head: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            slots: Vec::with_capacity(cap),
            cap,
            head: 0,
        }
    }

    pub fn push(&mut self, v: T) {
        if self.slots.len() < self.cap {
            self.slots.push(v);
        } else {
            self.slots[self.head] = v;
            self.head = (self.head + 1) % self.cap;
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        let (newer, older) = self.slots.split_at(self.head);
        older.iter().chain(newer.iter())
    }

    pub fn last(&self) -> Option<&T> {
        if self.slots.is_empty() {
            None
        } else if self.head == 0 {
            self.slots.last()
        } else {
            self.slots.get(self.head - 1)
        }
    }

    /// The most recent `n` values, oldest first.
    pub fn window(&self, n: usize) -> Vec<T> {
        let skip = self.slots.len().saturating_sub(n);
        self.iter().skip(skip).cloned().collect()
    }
}

#[derive(Debug, Clone)]
struct Series {
    points: RingBuffer<MetricPoint>,
    last_seen: f64,
}

/// All per-metric buffers, keyed by metric name.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    capacity: usize,
    series: BTreeMap<String, Series>,
}

impl HistoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            series: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a point, creating the metric's buffer on first sight.
    /// Timestamps must strictly increase per metric; anything at or before
    /// the newest stored point is rejected.
    pub fn push(&mut self, metric: &str, point: MetricPoint) -> bool {
        let cap = self.capacity;
        let series = self
            .series
            .entry(metric.to_string())
            .or_insert_with(|| Series {
                points: RingBuffer::new(cap),
                last_seen: point.ts,
            });
        if let Some(last) = series.points.last() {
            if point.ts <= last.ts {
                debug!(metric, ts = point.ts, newest = last.ts, "dropping out-of-order point");
                return false;
            }
        }
        series.points.push(point);
        series.last_seen = point.ts;
        true
    }

    pub fn window(&self, metric: &str, n: usize) -> Vec<MetricPoint> {
        self.series
            .get(metric)
            .map(|s| s.points.window(n))
            .unwrap_or_default()
    }

    pub fn contains(&self, metric: &str) -> bool {
        self.series.contains_key(metric)
    }

    pub fn metrics(&self) -> impl Iterator<Item = &str> {
        self.series.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    /// Drop metrics that have not been pushed to for more than `grace_secs`
    /// (unplugged disks, vanished interfaces). Returns the retired names.
    pub fn retire_stale(&mut self, now: f64, grace_secs: f64) -> Vec<String> {
        let stale: Vec<String> = self
            .series
            .iter()
            .filter(|(_, s)| now - s.last_seen > grace_secs)
            .map(|(name, _)| name.clone())
            .collect();
        for name in &stale {
            self.series.remove(name);
        }
        stale
    }
}
