//! CLI behaviour of the agent binary.
use assert_cmd::prelude::*;
use std::process::Command;

#[test]
fn help_prints_usage_and_exits_cleanly() {
    let out = Command::cargo_bin("hostpulse_agent")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("run agent");
    assert!(out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Usage: hostpulse_agent"), "{stderr}");
    assert!(stderr.contains("--tick-ms"));
}

#[test]
fn unknown_flag_is_a_usage_error() {
    let out = Command::cargo_bin("hostpulse_agent")
        .expect("binary exists")
        .arg("--enableSSL")
        .output()
        .expect("run agent");
    assert_eq!(out.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Unexpected argument"), "{stderr}");
    assert!(stderr.contains("Usage: hostpulse_agent"));
}

#[test]
fn invalid_configuration_fails_fast() {
    let out = Command::cargo_bin("hostpulse_agent")
        .expect("binary exists")
        .args(["--window", "10", "--retention", "5", "-p", "0"])
        .output()
        .expect("run agent");
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("invalid configuration"), "{stderr}");
}

#[test]
fn port_flags_start_the_server() {
    // Ephemeral port so parallel runs never collide.
    let exe = env!("CARGO_BIN_EXE_hostpulse_agent");
    for flag in ["--port", "-p"] {
        let mut child = Command::new(exe)
            .args([flag, "0", "--tick-ms", "100"])
            .spawn()
            .expect("spawn agent");
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(child.try_wait().expect("poll agent").is_none(), "{flag} exited early");
        let _ = child.kill();
        let _ = child.wait();
    }
}
