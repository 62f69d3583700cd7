//! WebSocket upgrade and per-connection handler. Each connection is one
//! viewer session pumping snapshots out while a reader task handles filter
//! changes and close frames.

use async_trait::async_trait;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::stream::{SplitSink, StreamExt};
use futures_util::SinkExt;
use serde::Deserialize;
use tracing::debug;

use crate::config::AgentConfig;
use crate::error::SessionEnd;
use crate::hub::{DeliveryPolicy, SessionOptions};
use crate::session::{Frame, PumpConfig, SendStatus, Transport};
use crate::snapshot::MetricFilter;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub policy: Option<String>,
    pub backlog: Option<usize>,
    pub metrics: Option<String>,
    pub compress: Option<String>,
}

/// Client text message replacing the session filter; `null` clears it.
#[derive(Debug, Deserialize)]
struct FilterUpdate {
    metrics: Option<Vec<String>>,
}

pub fn session_options(params: &WsParams, cfg: &AgentConfig) -> Result<SessionOptions, String> {
    let backlog = params.backlog.unwrap_or(cfg.backlog);
    if backlog == 0 {
        return Err("backlog must be greater than 0".to_string());
    }
    let policy = match params.policy.as_deref() {
        None => match cfg.default_policy() {
            DeliveryPolicy::Lossless { .. } => DeliveryPolicy::Lossless { backlog },
            p => p,
        },
        Some(name) => DeliveryPolicy::parse(name, backlog)
            .ok_or_else(|| format!("unknown delivery policy {name:?}"))?,
    };
    let filter = match params.metrics.as_deref() {
        Some(csv) => MetricFilter::parse(csv),
        None => MetricFilter::all(),
    };
    Ok(SessionOptions { policy, filter })
}

pub fn pump_config(params: &WsParams, cfg: &AgentConfig) -> PumpConfig {
    let gzip = params
        .compress
        .as_deref()
        .is_some_and(|c| c.eq_ignore_ascii_case("gzip"));
    PumpConfig {
        dead_after: cfg.dead_after(),
        compress_over: gzip.then_some(cfg.compress_over),
        ..PumpConfig::default()
    }
}

/// Parse a filter update sent by the client.
pub fn parse_filter_update(text: &str) -> Result<MetricFilter, serde_json::Error> {
    let update: FilterUpdate = serde_json::from_str(text)?;
    Ok(match update.metrics {
        Some(list) => MetricFilter::new(list),
        None => MetricFilter::all(),
    })
}

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
) -> Response {
    let options = match session_options(&params, &state.config) {
        Ok(o) => o,
        Err(msg) => return (StatusCode::BAD_REQUEST, msg).into_response(),
    };
    let pump_cfg = pump_config(&params, &state.config);
    ws.on_upgrade(move |socket| handle_socket(socket, state, options, pump_cfg))
}

struct WsTransport {
    sink: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl Transport for WsTransport {
    // The sink applies TCP backpressure by staying pending; the session's
    // deadline turns a stall into a dead consumer.
    async fn send(&mut self, frame: &Frame) -> SendStatus {
        let msg = match frame {
            Frame::Text(s) => Message::Text(s.clone()),
            Frame::Binary(b) => Message::Binary(b.clone()),
        };
        match self.sink.send(msg).await {
            Ok(()) => SendStatus::Sent,
            Err(_) => SendStatus::Closed,
        }
    }
}

async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    options: SessionOptions,
    pump_cfg: PumpConfig,
) {
    let (sink, mut stream) = socket.split();
    let mut session = state.hub.subscribe(options);
    let id = session.id();

    let hub = state.hub.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = stream.next().await {
            match msg {
                Message::Text(text) => match parse_filter_update(&text) {
                    Ok(filter) => {
                        debug!(session = id, patterns = ?filter.patterns(), "filter updated");
                        hub.set_filter(id, filter);
                    }
                    Err(e) => debug!(session = id, error = %e, "ignoring client message"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        hub.end(id, &SessionEnd::ClientClosed);
    });

    let mut transport = WsTransport { sink };
    let end = session.pump(&mut transport, &pump_cfg).await;
    debug!(session = id, reason = %end, "pump finished");
    reader.abort();
    let _ = transport.sink.close().await;
}
