//! Broadcast hub: one producer at tick rate, any number of independently
//! paced viewers.
//!
//! Every viewer owns a small mailbox. `publish` swaps the latest snapshot,
//! copies the subscriber list and drops the snapshot into each mailbox under
//! that mailbox's own short lock; it never waits on a viewer. How a full
//! mailbox behaves is the viewer's [`DeliveryPolicy`].

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::error::SessionEnd;
use crate::session::ViewerSession;
use crate::snapshot::{MetricFilter, Snapshot};

pub type SessionId = u64;

/// What a viewer's mailbox does when snapshots arrive faster than it drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryPolicy {
    /// Keep only the newest undelivered snapshot.
    #[default]
    Coalesce,
    /// Keep up to `backlog` snapshots, dropping (and counting) the oldest.
    Lossless { backlog: usize },
}

impl DeliveryPolicy {
    /// `coalesce` / `latest`, or `lossless` with the given backlog.
    pub fn parse(name: &str, backlog: usize) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "coalesce" | "coalescing" | "latest" => Some(DeliveryPolicy::Coalesce),
            "lossless" | "bounded" | "lossless-bounded" => Some(DeliveryPolicy::Lossless {
                backlog: backlog.max(1),
            }),
            _ => None,
        }
    }

    pub fn capacity(&self) -> usize {
        match self {
            DeliveryPolicy::Coalesce => 1,
            DeliveryPolicy::Lossless { backlog } => (*backlog).max(1),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    pub policy: DeliveryPolicy,
    pub filter: MetricFilter,
}

/// One snapshot handed to a viewer, with the number of snapshots its
/// mailbox had to discard since the previous delivery.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub snapshot: Arc<Snapshot>,
    pub dropped: u64,
}

impl Delivery {
    pub fn seq(&self) -> u64 {
        self.snapshot.seq
    }
}

pub(crate) enum Take {
    Ready(Delivery),
    Empty,
    Closed,
}

struct MailboxState {
    queue: VecDeque<Arc<Snapshot>>,
    dropped: u64,
    superseded: u64,
    last_offered: Option<u64>,
    last_delivered: Option<u64>,
    filter: MetricFilter,
    closed: bool,
}

pub(crate) struct Mailbox {
    policy: DeliveryPolicy,
    state: Mutex<MailboxState>,
    pub(crate) notify: Notify,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Mailbox {
    fn new(policy: DeliveryPolicy, filter: MetricFilter) -> Self {
        Self {
            policy,
            state: Mutex::new(MailboxState {
                queue: VecDeque::with_capacity(policy.capacity()),
                dropped: 0,
                superseded: 0,
                last_offered: None,
                last_delivered: None,
                filter,
                closed: false,
            }),
            notify: Notify::new(),
        }
    }

    /// Returns false when the mailbox was already closed.
    fn offer(&self, snapshot: &Arc<Snapshot>) -> bool {
        {
            let mut st = lock(&self.state);
            if st.closed {
                return false;
            }
            if st.last_offered.is_some_and(|last| snapshot.seq <= last) {
                return true;
            }
            st.last_offered = Some(snapshot.seq);
            match self.policy {
                DeliveryPolicy::Coalesce => {
                    if !st.queue.is_empty() {
                        st.superseded += st.queue.len() as u64;
                        st.queue.clear();
                    }
                }
                DeliveryPolicy::Lossless { backlog } => {
                    while st.queue.len() >= backlog.max(1) {
                        st.queue.pop_front();
                        st.dropped += 1;
                    }
                }
            }
            st.queue.push_back(Arc::clone(snapshot));
        }
        self.notify.notify_one();
        true
    }

    pub(crate) fn take(&self) -> Take {
        let mut st = lock(&self.state);
        if st.closed {
            return Take::Closed;
        }
        let Some(snapshot) = st.queue.pop_front() else {
            return Take::Empty;
        };
        debug_assert!(st.last_delivered.map_or(true, |last| snapshot.seq > last));
        st.last_delivered = Some(snapshot.seq);
        let dropped = std::mem::take(&mut st.dropped);
        Take::Ready(Delivery { snapshot, dropped })
    }

    /// Releases every buffered snapshot and wakes the consumer.
    fn close(&self) {
        {
            let mut st = lock(&self.state);
            st.closed = true;
            st.queue.clear();
        }
        self.notify.notify_one();
    }

    pub(crate) fn policy(&self) -> DeliveryPolicy {
        self.policy
    }

    pub(crate) fn is_closed(&self) -> bool {
        lock(&self.state).closed
    }

    pub(crate) fn last_delivered(&self) -> Option<u64> {
        lock(&self.state).last_delivered
    }

    pub(crate) fn backlog(&self) -> usize {
        lock(&self.state).queue.len()
    }

    pub(crate) fn superseded(&self) -> u64 {
        lock(&self.state).superseded
    }

    pub(crate) fn filter(&self) -> MetricFilter {
        lock(&self.state).filter.clone()
    }

    fn set_filter(&self, filter: MetricFilter) {
        lock(&self.state).filter = filter;
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct HubStats {
    pub subscribers: usize,
    pub published: u64,
    pub disconnects: u64,
    pub last_seq: Option<u64>,
}

struct HubInner {
    sessions: RwLock<HashMap<SessionId, Arc<Mailbox>>>,
    latest: RwLock<Option<Arc<Snapshot>>>,
    next_id: AtomicU64,
    published: AtomicU64,
    disconnects: AtomicU64,
}

/// Cheap to clone; all clones share the same subscribers.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

impl Default for Hub {
    fn default() -> Self {
        Self::new()
    }
}

impl Hub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                sessions: RwLock::new(HashMap::new()),
                latest: RwLock::new(None),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
                disconnects: AtomicU64::new(0),
            }),
        }
    }

    /// Hand a snapshot to every current subscriber. Never waits on viewers.
    pub fn publish(&self, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        *self
            .inner
            .latest
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&snapshot));
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        // iterate a copy so unsubscribes never contend with delivery
        let targets: Vec<Arc<Mailbox>> = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for mailbox in &targets {
            mailbox.offer(&snapshot);
        }
        debug!(seq = snapshot.seq, viewers = targets.len(), "published snapshot");
        snapshot
    }

    /// Register a viewer. It starts with the latest snapshot, if any.
    pub fn subscribe(&self, options: SessionOptions) -> ViewerSession {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new(options.policy, options.filter));
        self.inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::clone(&mailbox));
        // Prime only once registered: `publish` stores `latest` before it
        // copies the session list, so a concurrent publish is either seen
        // here or offered directly. Stale or repeated offers are ignored.
        if let Some(latest) = self.latest() {
            mailbox.offer(&latest);
        }
        info!(session = id, policy = ?options.policy, "viewer subscribed");
        ViewerSession::new(id, self.clone(), mailbox)
    }

    /// Remove a viewer and release its backlog. Safe to call at any time,
    /// including while a publish is in progress. Returns false if unknown.
    pub fn unsubscribe(&self, id: SessionId) -> bool {
        let removed = self
            .inner
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
        match removed {
            Some(mailbox) => {
                mailbox.close();
                true
            }
            None => false,
        }
    }

    /// Unsubscribe and report why. Only the first report for a session counts.
    pub fn end(&self, id: SessionId, reason: &SessionEnd) -> bool {
        if !self.unsubscribe(id) {
            return false;
        }
        self.inner.disconnects.fetch_add(1, Ordering::Relaxed);
        match reason {
            SessionEnd::DeadConsumer { .. } => {
                info!(session = id, reason = %reason, "dropping dead viewer")
            }
            _ => info!(session = id, reason = %reason, "viewer disconnected"),
        }
        true
    }

    /// Replace a viewer's metric filter; takes effect from the next delivery.
    pub fn set_filter(&self, id: SessionId, filter: MetricFilter) -> bool {
        let sessions = self
            .inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match sessions.get(&id) {
            Some(mailbox) => {
                mailbox.set_filter(filter);
                true
            }
            None => false,
        }
    }

    /// Pull API for request/response clients.
    pub fn latest(&self) -> Option<Arc<Snapshot>> {
        self.inner
            .latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_subscribed(&self, id: SessionId) -> bool {
        self.inner
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&id)
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            subscribers: self.subscriber_count(),
            published: self.inner.published.load(Ordering::Relaxed),
            disconnects: self.inner.disconnects.load(Ordering::Relaxed),
            last_seq: self.latest().map(|s| s.seq),
        }
    }
}
