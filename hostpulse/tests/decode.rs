//! Frame decoding, URL building and line formatting.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;
use hostpulse::format::{human_bytes, snapshot_line};
use hostpulse::ws::{decode, stream_url, StreamOptions};
use tokio_tungstenite::tungstenite::Message;

const FRAME: &str = r#"{
  "seq": 12, "ts": 1760000000.25, "warming_up": false,
  "rates": {"cpu.total": 12.5, "net.rx_bps": 2048.0, "net.tx_bps": 100.0},
  "gauges": {"memory": {"total": 1000, "used": 250, "swap_total": 0, "swap_used": 0},
             "disks": null, "processes": null, "load": null, "uptime_secs": 5,
             "temperatures": null, "host": {"hostname": "box", "os": "Linux"}, "logs": []},
  "history": {"cpu.total": [{"ts": 1760000000.25, "value": 12.5}]},
  "warnings": ["2 snapshots dropped"],
  "unavailable": ["disk_io"]
}"#;

#[test]
fn text_frames_decode() {
    let s = decode(Message::Text(FRAME.to_string())).unwrap().unwrap();
    assert_eq!(s.seq, 12);
    assert_eq!(s.rate("cpu.total"), Some(12.5));
    assert_eq!(s.mem_used_pct(), Some(25.0));
    assert_eq!(s.history["cpu.total"].len(), 1);
    assert_eq!(s.unavailable, vec!["disk_io".to_string()]);
    assert_eq!(s.gauges.host.hostname, "box");
}

#[test]
fn gzip_frames_decode() {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(FRAME.as_bytes()).unwrap();
    let bytes = enc.finish().unwrap();
    let s = decode(Message::Binary(bytes)).unwrap().unwrap();
    assert_eq!(s.seq, 12);
}

#[test]
fn control_and_garbage_frames() {
    assert!(decode(Message::Ping(Vec::new())).is_none());
    assert!(decode(Message::Text("not json".into())).unwrap().is_err());
    assert!(decode(Message::Binary(vec![1, 2, 3])).unwrap().is_err());
}

#[test]
fn stream_url_carries_options() {
    let plain = stream_url("ws://127.0.0.1:3000/ws", &StreamOptions::default()).unwrap();
    assert_eq!(plain.as_str(), "ws://127.0.0.1:3000/ws");

    let opts = StreamOptions {
        policy: Some("lossless".into()),
        backlog: Some(3),
        metrics: Some("cpu,net".into()),
        gzip: true,
    };
    let url = stream_url("ws://127.0.0.1:3000/ws", &opts).unwrap();
    assert_eq!(
        url.query(),
        Some("policy=lossless&backlog=3&metrics=cpu%2Cnet&compress=gzip")
    );
    assert!(stream_url("http://127.0.0.1:3000/ws", &opts).is_err());
    assert!(stream_url("not a url", &opts).is_err());
}

#[test]
fn line_shows_rates_and_warnings() {
    let s = decode(Message::Text(FRAME.to_string())).unwrap().unwrap();
    let line = snapshot_line(&s);
    assert!(line.starts_with("#12"));
    assert!(line.contains("12.5%"));
    assert!(line.contains("25.0%"));
    assert!(line.contains("2.0K/s"));
    assert!(line.ends_with("! 2 snapshots dropped"));
}

#[test]
fn byte_units() {
    assert_eq!(human_bytes(512.0), "512B");
    assert_eq!(human_bytes(1536.0), "1.5K");
    assert_eq!(human_bytes(3.0 * 1024.0 * 1024.0), "3.0M");
    assert_eq!(human_bytes(-5.0), "0B");
}
