//! Error taxonomy for the sampling pipeline and its configuration.
//!
//! Only [`DriverError`] and [`ConfigError`] are ever fatal. Everything else is
//! recovered where it happens and surfaces as a snapshot warning or a session
//! disconnect.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// One OS-backed input of a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Cpu,
    Network,
    DiskIo,
    Memory,
    Disks,
    Processes,
    Load,
    Uptime,
    Temperatures,
    #[serde(rename = "cpu_freq")]
    CpuFrequency,
    Interfaces,
}

impl SourceKind {
    pub const ALL: [SourceKind; 11] = [
        SourceKind::Cpu,
        SourceKind::Network,
        SourceKind::DiskIo,
        SourceKind::Memory,
        SourceKind::Disks,
        SourceKind::Processes,
        SourceKind::Load,
        SourceKind::Uptime,
        SourceKind::Temperatures,
        SourceKind::CpuFrequency,
        SourceKind::Interfaces,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Cpu => "cpu",
            SourceKind::Network => "network",
            SourceKind::DiskIo => "disk_io",
            SourceKind::Memory => "memory",
            SourceKind::Disks => "disks",
            SourceKind::Processes => "processes",
            SourceKind::Load => "load",
            SourceKind::Uptime => "uptime",
            SourceKind::Temperatures => "temperatures",
            SourceKind::CpuFrequency => "cpu_freq",
            SourceKind::Interfaces => "interfaces",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A specific OS counter could not be read this tick.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind} sampling unavailable: {reason}")]
pub struct SourceUnavailable {
    pub kind: SourceKind,
    pub reason: String,
}

impl SourceUnavailable {
    pub fn new(kind: SourceKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            reason: reason.into(),
        }
    }
}

/// Result of reading one source. `Err` means "hold the previous value".
pub type Reading<T> = Result<T, SourceUnavailable>;

/// A cumulative counter went backwards (reset or wrap).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("counter reset on {metric} ({previous} -> {current}), rate clamped to 0")]
pub struct CounterAnomaly {
    pub metric: String,
    pub previous: u64,
    pub current: u64,
}

/// Why a viewer session stopped receiving snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionEnd {
    #[error("session was unsubscribed")]
    Unsubscribed,
    #[error("client closed the connection")]
    ClientClosed,
    #[error("client stopped draining for {waited:?}")]
    DeadConsumer { waited: Duration },
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("snapshot sequence counter exhausted after {last}")]
    SequenceExhausted { last: u64 },
}

/// The command line could not be turned into settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ArgsError {
    /// `--help` was asked for; carries the usage text.
    #[error("{0}")]
    Help(String),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },
    #[error("invalid value {value:?} for {key}")]
    InvalidValue { key: String, value: String },
    #[error("{0}")]
    Invalid(String),
}
