//! Per-connection viewer state and the loop that feeds a transport.

use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

use crate::error::SessionEnd;
use crate::hub::{Delivery, DeliveryPolicy, Hub, Mailbox, SessionId, Take};
use crate::snapshot::MetricFilter;

/// One encoded snapshot ready for the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    /// Gzip-compressed JSON.
    Binary(Vec<u8>),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(s) => s.len(),
            Frame::Binary(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Outcome of one non-blocking send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    WouldBlock,
    Closed,
}

/// The web layer's per-connection send primitive.
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, frame: &Frame) -> SendStatus;
}

/// Transport backed by a bounded channel; a full channel reports `WouldBlock`.
pub struct ChannelTransport {
    tx: mpsc::Sender<Frame>,
}

impl ChannelTransport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&mut self, frame: &Frame) -> SendStatus {
        match self.tx.try_send(frame.clone()) {
            Ok(()) => SendStatus::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendStatus::WouldBlock,
            Err(mpsc::error::TrySendError::Closed(_)) => SendStatus::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PumpConfig {
    /// How long a single frame may stay unsent before the viewer is dead.
    pub dead_after: Duration,
    /// Pause between attempts while the transport reports `WouldBlock`.
    pub retry_backoff: Duration,
    /// Gzip frames whose JSON exceeds this many bytes.
    pub compress_over: Option<usize>,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            dead_after: Duration::from_secs(5),
            retry_backoff: Duration::from_millis(25),
            compress_over: None,
        }
    }
}

/// Text frame, or gzip when the payload is over the threshold and
/// compression actually helps.
pub fn encode_frame(json: String, compress_over: Option<usize>) -> Frame {
    match compress_over {
        Some(limit) if json.len() > limit => {
            let mut enc = GzEncoder::new(Vec::with_capacity(json.len() / 4), Compression::fast());
            if enc.write_all(json.as_bytes()).is_ok() {
                if let Ok(bytes) = enc.finish() {
                    if bytes.len() < json.len() {
                        return Frame::Binary(bytes);
                    }
                }
            }
            Frame::Text(json)
        }
        _ => Frame::Text(json),
    }
}

/// A subscription to the hub. Dropping it unsubscribes.
pub struct ViewerSession {
    id: SessionId,
    hub: Hub,
    mailbox: Arc<Mailbox>,
}

impl ViewerSession {
    pub(crate) fn new(id: SessionId, hub: Hub, mailbox: Arc<Mailbox>) -> Self {
        Self { id, hub, mailbox }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn policy(&self) -> DeliveryPolicy {
        self.mailbox.policy()
    }

    pub fn is_live(&self) -> bool {
        !self.mailbox.is_closed()
    }

    pub fn last_delivered(&self) -> Option<u64> {
        self.mailbox.last_delivered()
    }

    /// Snapshots waiting in the mailbox.
    pub fn backlog(&self) -> usize {
        self.mailbox.backlog()
    }

    /// Snapshots replaced before delivery under the coalescing policy.
    pub fn superseded(&self) -> u64 {
        self.mailbox.superseded()
    }

    pub fn filter(&self) -> MetricFilter {
        self.mailbox.filter()
    }

    pub fn set_filter(&self, filter: MetricFilter) {
        self.hub.set_filter(self.id, filter);
    }

    /// The next waiting delivery, without waiting.
    pub fn try_next(&self) -> Option<Delivery> {
        match self.mailbox.take() {
            Take::Ready(d) => Some(d),
            Take::Empty | Take::Closed => None,
        }
    }

    /// Wait for the next delivery; `None` once unsubscribed.
    pub async fn next(&mut self) -> Option<Delivery> {
        loop {
            match self.mailbox.take() {
                Take::Ready(d) => return Some(d),
                Take::Closed => return None,
                Take::Empty => {}
            }
            // a notify_one that raced ahead of us left a permit behind
            self.mailbox.notify.notified().await;
        }
    }

    /// Feed deliveries to `transport` until the viewer goes away, then
    /// unsubscribe and report why.
    pub async fn pump<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cfg: &PumpConfig,
    ) -> SessionEnd {
        let end = self.deliver_all(transport, cfg).await;
        self.hub.end(self.id, &end);
        end
    }

    async fn deliver_all<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        cfg: &PumpConfig,
    ) -> SessionEnd {
        while let Some(delivery) = self.next().await {
            let filter = self.filter();
            let json = match delivery.snapshot.render(&filter, delivery.dropped) {
                Ok(j) => j,
                Err(e) => {
                    warn!(session = self.id, seq = delivery.seq(), error = %e, "failed to encode snapshot");
                    continue;
                }
            };
            let frame = encode_frame(json, cfg.compress_over);
            if let Err(end) = send_with_deadline(transport, &frame, cfg).await {
                return end;
            }
            debug!(session = self.id, seq = delivery.seq(), bytes = frame.len(), "delivered");
        }
        SessionEnd::Unsubscribed
    }
}

async fn send_with_deadline<T: Transport + ?Sized>(
    transport: &mut T,
    frame: &Frame,
    cfg: &PumpConfig,
) -> Result<(), SessionEnd> {
    let started = Instant::now();
    loop {
        let remaining = cfg.dead_after.saturating_sub(started.elapsed());
        if remaining.is_zero() {
            return Err(SessionEnd::DeadConsumer {
                waited: started.elapsed(),
            });
        }
        match timeout(remaining, transport.send(frame)).await {
            Ok(SendStatus::Sent) => return Ok(()),
            Ok(SendStatus::Closed) => return Err(SessionEnd::ClientClosed),
            Ok(SendStatus::WouldBlock) => sleep(cfg.retry_backoff.min(remaining)).await,
            Err(_) => {
                return Err(SessionEnd::DeadConsumer {
                    waited: started.elapsed(),
                })
            }
        }
    }
}

impl Drop for ViewerSession {
    fn drop(&mut self) {
        self.hub.unsubscribe(self.id);
    }
}
