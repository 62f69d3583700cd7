//! Agent configuration: defaults, then an optional JSON file, then
//! `HOSTPULSE_*` environment variables, then command-line flags.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ArgsError, ConfigError};
use crate::hub::DeliveryPolicy;
use crate::rates::CpuBreakdown;
use crate::snapshot::MetricFilter;

pub const ENV_PREFIX: &str = "HOSTPULSE_";
pub const ENV_CONFIG_FILE: &str = "HOSTPULSE_CONFIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyName {
    #[default]
    Coalesce,
    Lossless,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    /// Sampling interval in milliseconds.
    pub tick_ms: u64,
    /// Points kept per metric (C).
    pub retention: usize,
    /// Points per metric sent with each snapshot (K).
    pub window: usize,
    /// Per-viewer backlog for lossless delivery (B).
    pub backlog: usize,
    /// Delivery policy for viewers that do not ask for one.
    pub policy: PolicyName,
    pub cpu: CpuBreakdown,
    /// Metric patterns to keep; empty keeps everything.
    pub include: Vec<String>,
    /// Seconds a vanished metric keeps its history before it is retired.
    pub grace_secs: u64,
    pub dead_after_ms: u64,
    /// Processes listed per snapshot.
    pub top: usize,
    /// Log lines carried in each snapshot.
    pub log_lines: usize,
    pub log_capacity: usize,
    /// Gzip threshold in bytes for viewers that accept compressed frames.
    pub compress_over: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 3000,
            tick_ms: 1_000,
            retention: 300,
            window: 60,
            backlog: 8,
            policy: PolicyName::Coalesce,
            cpu: CpuBreakdown::PerCore,
            include: Vec::new(),
            grace_secs: 30,
            dead_after_ms: 5_000,
            top: 20,
            log_lines: 20,
            log_capacity: crate::logbook::DEFAULT_CAPACITY,
            compress_over: 16 * 1024,
        }
    }
}

pub const USAGE: &str = "Usage: hostpulse_agent [--config FILE|-c FILE] [--port PORT|-p PORT] [--bind ADDR] \
[--tick-ms MS|-t MS] [--retention N] [--window N] [--backlog N] [--policy coalesce|lossless] \
[--cpu average|per_core] [--include a,b] [--grace-secs N] [--dead-after-ms MS] [--top N] \
[--log-lines N] [--log-capacity N] [--compress-over BYTES]";

/// Every key `set` understands.
pub const KEYS: [&str; 15] = [
    "bind",
    "port",
    "tick_ms",
    "retention",
    "window",
    "backlog",
    "policy",
    "cpu",
    "include",
    "grace_secs",
    "dead_after_ms",
    "top",
    "log_lines",
    "log_capacity",
    "compress_over",
];

/// Flag names accepted on the command line, mapped to configuration keys.
fn flag_key(flag: &str) -> Option<&'static str> {
    Some(match flag {
        "--port" | "-p" => "port",
        "--bind" => "bind",
        "--tick-ms" | "-t" => "tick_ms",
        "--retention" => "retention",
        "--window" => "window",
        "--backlog" => "backlog",
        "--policy" => "policy",
        "--cpu" => "cpu",
        "--include" => "include",
        "--grace-secs" => "grace_secs",
        "--dead-after-ms" => "dead_after_ms",
        "--top" => "top",
        "--log-lines" => "log_lines",
        "--log-capacity" => "log_capacity",
        "--compress-over" => "compress_over",
        _ => return None,
    })
}

fn parse_num<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Parsed command line: the config file to start from plus `key = value`
/// overrides, in order.
#[derive(Debug, Default, PartialEq)]
pub struct ParsedArgs {
    pub config_file: Option<String>,
    pub overrides: Vec<(&'static str, String)>,
}

pub fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, ArgsError> {
    let mut it = args.into_iter();
    let _ = it.next(); // program name
    let mut parsed = ParsedArgs::default();
    while let Some(arg) = it.next() {
        if arg == "-h" || arg == "--help" {
            return Err(ArgsError::Help(USAGE.to_string()));
        }
        let (flag, inline) = match arg.split_once('=') {
            Some((f, v)) if f.starts_with("--") => (f.to_string(), Some(v.to_string())),
            _ => (arg.clone(), None),
        };
        if flag == "--config" || flag == "-c" {
            parsed.config_file = inline.or_else(|| it.next());
            if parsed.config_file.is_none() {
                return Err(ArgsError::Invalid(format!("{flag} needs a value\n{USAGE}")));
            }
            continue;
        }
        let Some(key) = flag_key(&flag) else {
            return Err(ArgsError::Invalid(format!("Unexpected argument {arg:?}\n{USAGE}")));
        };
        match inline.or_else(|| it.next()) {
            Some(v) => parsed.overrides.push((key, v)),
            None => return Err(ArgsError::Invalid(format!("{flag} needs a value\n{USAGE}"))),
        }
    }
    Ok(parsed)
}

impl AgentConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Set one key from its string form (environment and command line).
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        let invalid = || ConfigError::InvalidValue {
            key: key.to_string(),
            value: value.to_string(),
        };
        match key {
            "bind" => self.bind = parse_num(key, value)?,
            "port" => self.port = parse_num(key, value)?,
            "tick_ms" => self.tick_ms = parse_num(key, value)?,
            "retention" => self.retention = parse_num(key, value)?,
            "window" => self.window = parse_num(key, value)?,
            "backlog" => self.backlog = parse_num(key, value)?,
            "policy" => {
                self.policy = match DeliveryPolicy::parse(value, 1).ok_or_else(invalid)? {
                    DeliveryPolicy::Coalesce => PolicyName::Coalesce,
                    DeliveryPolicy::Lossless { .. } => PolicyName::Lossless,
                }
            }
            "cpu" => self.cpu = CpuBreakdown::parse(value).ok_or_else(invalid)?,
            "include" => {
                self.include = MetricFilter::parse(value).patterns().to_vec();
            }
            "grace_secs" => self.grace_secs = parse_num(key, value)?,
            "dead_after_ms" => self.dead_after_ms = parse_num(key, value)?,
            "top" => self.top = parse_num(key, value)?,
            "log_lines" => self.log_lines = parse_num(key, value)?,
            "log_capacity" => self.log_capacity = parse_num(key, value)?,
            "compress_over" => self.compress_over = parse_num(key, value)?,
            _ => return Err(ConfigError::Invalid(format!("unknown setting {key:?}"))),
        }
        Ok(())
    }

    /// Apply `HOSTPULSE_<KEY>` variables, e.g. `HOSTPULSE_TICK_MS=500`.
    /// Variables that name no setting are left alone.
    pub fn apply_env<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            if KEYS.contains(&key.as_str()) {
                self.set(&key, &value)?;
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::Invalid("tick_ms must be greater than 0".into()));
        }
        if self.retention == 0 {
            return Err(ConfigError::Invalid("retention must be greater than 0".into()));
        }
        if self.window == 0 || self.window > self.retention {
            return Err(ConfigError::Invalid(format!(
                "window ({}) must be between 1 and retention ({})",
                self.window, self.retention
            )));
        }
        if self.backlog == 0 {
            return Err(ConfigError::Invalid("backlog must be greater than 0".into()));
        }
        if self.dead_after_ms == 0 {
            return Err(ConfigError::Invalid("dead_after_ms must be greater than 0".into()));
        }
        Ok(())
    }

    /// Build the effective configuration from every layer.
    pub fn load<E>(args: ParsedArgs, env: E) -> Result<Self, ConfigError>
    where
        E: IntoIterator<Item = (String, String)>,
    {
        let env: Vec<(String, String)> = env.into_iter().collect();
        let file = args.config_file.clone().or_else(|| {
            env.iter()
                .find(|(k, _)| k == ENV_CONFIG_FILE)
                .map(|(_, v)| v.clone())
        });
        let mut cfg = match file {
            Some(path) => Self::from_file(Path::new(&path))?,
            None => Self::default(),
        };
        cfg.apply_env(env)?;
        for (key, value) in &args.overrides {
            cfg.set(key, value)?;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn dead_after(&self) -> Duration {
        Duration::from_millis(self.dead_after_ms)
    }

    pub fn grace(&self) -> Duration {
        Duration::from_secs(self.grace_secs)
    }

    pub fn default_policy(&self) -> DeliveryPolicy {
        match self.policy {
            PolicyName::Coalesce => DeliveryPolicy::Coalesce,
            PolicyName::Lossless => DeliveryPolicy::Lossless {
                backlog: self.backlog,
            },
        }
    }

    pub fn include_filter(&self) -> MetricFilter {
        MetricFilter::new(self.include.iter().cloned())
    }
}
