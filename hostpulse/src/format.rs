//! One terminal line per snapshot.

use chrono::{DateTime, Local};

use crate::types::Snapshot;

/// `1536` -> `1.5K`, base 1024.
pub fn human_bytes(v: f64) -> String {
    const UNITS: [&str; 5] = ["B", "K", "M", "G", "T"];
    let mut v = v.max(0.0);
    let mut unit = 0;
    while v >= 1024.0 && unit < UNITS.len() - 1 {
        v /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{v:.0}{}", UNITS[0])
    } else {
        format!("{v:.1}{}", UNITS[unit])
    }
}

pub fn local_time(ts: f64) -> String {
    let secs = ts.floor() as i64;
    let nanos = ((ts - ts.floor()) * 1e9) as u32;
    match DateTime::from_timestamp(secs, nanos) {
        Some(t) => t.with_timezone(&Local).format("%H:%M:%S").to_string(),
        None => "--:--:--".to_string(),
    }
}

fn pct(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{v:.1}%"))
}

fn rate(v: Option<f64>) -> String {
    v.map_or_else(|| "-".to_string(), |v| format!("{}/s", human_bytes(v)))
}

/// `seq time cpu mem rx tx [warnings]`
pub fn snapshot_line(s: &Snapshot) -> String {
    let mut line = format!(
        "#{:<6} {} cpu {:>6} mem {:>6} rx {:>9} tx {:>9}",
        s.seq,
        local_time(s.ts),
        pct(s.rate("cpu.total")),
        pct(s.mem_used_pct()),
        rate(s.rate("net.rx_bps")),
        rate(s.rate("net.tx_bps")),
    );
    if s.warming_up {
        line.push_str(" (warming up)");
    }
    if !s.warnings.is_empty() {
        line.push_str(" ! ");
        line.push_str(&s.warnings.join("; "));
    }
    line
}
