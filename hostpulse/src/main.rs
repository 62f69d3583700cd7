//! Entry point for the hostpulse terminal client. Parses args and tails the
//! agent's snapshot stream, one line per snapshot.

use std::env;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

use anyhow::Result;
use hostpulse::cli::{parse_args, ParsedArgs};
use hostpulse::format::snapshot_line;
use hostpulse::ws::{connect, next_snapshot, stream_url};

const DEMO_PORT: u16 = 3231;

#[tokio::main]
async fn main() -> Result<()> {
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    // Kills the local agent when the client exits.
    let _demo = if parsed.demo {
        Some(spawn_demo_agent(DEMO_PORT)?)
    } else {
        None
    };
    let base = if parsed.demo {
        format!("ws://127.0.0.1:{DEMO_PORT}/ws")
    } else {
        parsed.url().to_string()
    };

    tokio::select! {
        res = tail(&base, &parsed) => res,
        _ = tokio::signal::ctrl_c() => Ok(()),
    }
}

async fn tail(base: &str, parsed: &ParsedArgs) -> Result<()> {
    let url = stream_url(base, &parsed.stream)?;
    let mut ws = connect(&url).await?;
    eprintln!("connected to {url}");

    let mut seen = 0u64;
    while let Some(next) = next_snapshot(&mut ws).await {
        match next {
            Ok(s) => println!("{}", snapshot_line(&s)),
            Err(e) => eprintln!("skipping frame: {e:#}"),
        }
        seen += 1;
        if parsed.count.is_some_and(|n| seen >= n) {
            let _ = ws.close(None).await;
            break;
        }
    }
    Ok(())
}

// --- Demo mode: run an agent next to this binary ---

struct DemoGuard(Child);

impl Drop for DemoGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn spawn_demo_agent(port: u16) -> Result<DemoGuard> {
    let child = Command::new(find_agent_executable())
        .arg("--port")
        .arg(port.to_string())
        .arg("--bind")
        .arg("127.0.0.1")
        .spawn()?;
    // Give the agent a brief moment to bind and take its first sample
    std::thread::sleep(Duration::from_millis(300));
    Ok(DemoGuard(child))
}

fn find_agent_executable() -> PathBuf {
    #[cfg(windows)]
    let name = "hostpulse_agent.exe";
    #[cfg(not(windows))]
    let name = "hostpulse_agent";
    if let Some(dir) = env::current_exe().ok().as_deref().and_then(|p| p.parent()) {
        let candidate = dir.join(name);
        if candidate.exists() {
            return candidate;
        }
    }
    // Fallback to relying on PATH
    PathBuf::from(name)
}
