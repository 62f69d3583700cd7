//! WebSocket client for an agent's snapshot stream.

use std::io::Read;

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

use crate::types::Snapshot;

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// How this viewer wants to be fed; `None` leaves the agent's default.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamOptions {
    pub policy: Option<String>,
    pub backlog: Option<usize>,
    pub metrics: Option<String>,
    pub gzip: bool,
}

/// The agent URL with stream options as query parameters.
pub fn stream_url(base: &str, opts: &StreamOptions) -> Result<Url> {
    let mut url = Url::parse(base).with_context(|| format!("invalid agent URL {base:?}"))?;
    match url.scheme() {
        "ws" | "wss" => {}
        other => anyhow::bail!("unsupported scheme {other:?}, expected ws:// or wss://"),
    }
    {
        let mut q = url.query_pairs_mut();
        if let Some(p) = &opts.policy {
            q.append_pair("policy", p);
        }
        if let Some(b) = opts.backlog {
            q.append_pair("backlog", &b.to_string());
        }
        if let Some(m) = &opts.metrics {
            q.append_pair("metrics", m);
        }
        if opts.gzip {
            q.append_pair("compress", "gzip");
        }
    }
    if url.query() == Some("") {
        url.set_query(None);
    }
    Ok(url)
}

pub async fn connect(url: &Url) -> Result<WsStream> {
    let (ws, _) = connect_async(url.as_str())
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    Ok(ws)
}

/// Decode one frame. Control frames yield `None`.
pub fn decode(msg: Message) -> Option<Result<Snapshot>> {
    match msg {
        Message::Text(json) => Some(serde_json::from_str(&json).context("bad snapshot JSON")),
        Message::Binary(bytes) => {
            let mut json = String::new();
            if let Err(e) = GzDecoder::new(bytes.as_slice()).read_to_string(&mut json) {
                return Some(Err(anyhow::Error::new(e).context("bad gzip frame")));
            }
            Some(serde_json::from_str(&json).context("bad snapshot JSON"))
        }
        _ => None,
    }
}

/// Wait for the next snapshot; `None` once the agent closes the stream.
pub async fn next_snapshot(ws: &mut WsStream) -> Option<Result<Snapshot>> {
    while let Some(msg) = ws.next().await {
        match msg {
            Ok(Message::Close(_)) => return None,
            Ok(m) => {
                if let Some(decoded) = decode(m) {
                    return Some(decoded);
                }
            }
            Err(e) => return Some(Err(e.into())),
        }
    }
    None
}

/// Replace the session's metric filter; `None` clears it.
pub async fn set_filter(ws: &mut WsStream, metrics: Option<&[String]>) -> Result<()> {
    let body = serde_json::json!({ "metrics": metrics });
    ws.send(Message::Text(body.to_string())).await?;
    Ok(())
}
