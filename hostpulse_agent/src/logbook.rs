//! Recent log lines, captured from `tracing` and shown on the dashboard.

use std::collections::VecDeque;
use std::fmt::{self, Write as _};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Local};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::types::{unix_now, LogLine};

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 100;

/// Bounded, shared ring of recent log lines. Cloning shares the same book.
#[derive(Clone)]
pub struct LogBook {
    inner: Arc<Mutex<VecDeque<LogLine>>>,
    cap: usize,
}

impl LogBook {
    pub fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Arc::new(Mutex::new(VecDeque::with_capacity(cap))),
            cap,
        }
    }

    // a panic while logging must not blank the dashboard
    fn book(&self) -> MutexGuard<'_, VecDeque<LogLine>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, line: LogLine) {
        let mut book = self.book();
        if book.len() == self.cap {
            book.pop_front();
        }
        book.push_back(line);
    }

    /// The most recent `n` lines, oldest first.
    pub fn recent(&self, n: usize) -> Vec<LogLine> {
        let book = self.book();
        let skip = book.len().saturating_sub(n);
        book.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.book().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// A `tracing` layer feeding this book with INFO and more severe events.
    pub fn layer(&self) -> LogBookLayer {
        LogBookLayer { book: self.clone() }
    }
}

impl Default for LogBook {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

pub struct LogBookLayer {
    book: LogBook,
}

impl<S: Subscriber> Layer<S> for LogBookLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let meta = event.metadata();
        if *meta.level() > Level::INFO {
            return;
        }
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let ts = unix_now();
        self.book.push(LogLine {
            ts,
            at: local_timestamp(ts),
            level: meta.level().as_str().to_ascii_lowercase(),
            target: meta.target().to_string(),
            message: visitor.finish(),
        });
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Local wall-clock time for a Unix timestamp, `YYYY-MM-DD HH:MM:SS`.
pub fn local_timestamp(ts: f64) -> String {
    DateTime::from_timestamp(ts.floor() as i64, 0)
        .map(|t| t.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(message: &str) -> LogLine {
        LogLine {
            ts: 0.0,
            at: String::new(),
            level: "info".to_string(),
            target: "test".to_string(),
            message: message.to_string(),
        }
    }

    #[test]
    fn poisoned_book_keeps_counting() {
        let book = LogBook::new(4);
        book.push(line("before"));
        let shared = Arc::clone(&book.inner);
        let _ = std::thread::spawn(move || {
            let _guard = shared.lock().unwrap();
            panic!("poison the book");
        })
        .join();
        assert!(book.inner.is_poisoned());

        assert_eq!(book.len(), 1);
        assert!(!book.is_empty());
        book.push(line("after"));
        assert_eq!(book.len(), 2);
        let messages: Vec<String> = book.recent(4).into_iter().map(|l| l.message).collect();
        assert_eq!(messages, vec!["before", "after"]);
    }
}
