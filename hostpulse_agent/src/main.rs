//! hostpulse agent: sampling loop plus websocket/JSON server.

use std::future::IntoFuture;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use hostpulse_agent::api::router;
use hostpulse_agent::config::{parse_args, AgentConfig};
use hostpulse_agent::driver::{Driver, DriverSettings};
use hostpulse_agent::error::{ArgsError, DriverError};
use hostpulse_agent::logbook::LogBook;
use hostpulse_agent::sampler::HostSampler;
use hostpulse_agent::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    let args = match parse_args(std::env::args()) {
        Ok(a) => a,
        Err(ArgsError::Help(usage)) => {
            eprintln!("{usage}");
            return Ok(());
        }
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(2);
        }
    };
    let config = AgentConfig::load(args, std::env::vars()).context("invalid configuration")?;

    let logbook = LogBook::new(config.log_capacity);
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer())
        .with(logbook.layer())
        .init();

    let addr = config.addr();
    let sampler = HostSampler::new(logbook.clone(), config.log_lines, config.top);
    let state = AppState::new(config, logbook);
    let driver = Driver::new(
        sampler,
        DriverSettings::from(state.config.as_ref()),
        state.history.clone(),
        state.hub.clone(),
    );
    info!(host = %driver.host().hostname, os = %driver.host().os, "host detected");

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut sampling = tokio::spawn(driver.run(stop_rx));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, "hostpulse agent listening");

    let server = axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
            let _ = stop_tx.send(true);
        })
        .into_future();

    tokio::select! {
        served = server => {
            served.context("server failed")?;
            sampler_exit(sampling.await)
        }
        // the sampler only returns early on a fatal error
        finished = &mut sampling => sampler_exit(finished),
    }
}

fn sampler_exit(
    joined: Result<Result<(), DriverError>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            error!(error = %e, "sampler stopped with an error");
            Err(e.into())
        }
        Err(e) => Err(anyhow::anyhow!("sampler task failed: {e}")),
    }
}
