//! HTTP routes: the websocket stream plus JSON pull endpoints.

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::hub::HubStats;
use crate::state::AppState;
use crate::types::{LogLine, MetricPoint, ProcessInfo, ProcessRanking};
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/snapshot", get(snapshot))
        .route("/api/history", get(history))
        .route("/api/top_processes/:category", get(top_processes))
        .route("/api/log", get(log))
        .route("/api/status", get(status))
        .with_state(state)
}

async fn snapshot(State(state): State<AppState>) -> Response {
    let Some(latest) = state.hub.latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no snapshot yet").into_response();
    };
    match serde_json::to_string(latest.as_ref()) {
        Ok(body) => ([(header::CONTENT_TYPE, "application/json")], body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub metric: String,
    pub n: Option<usize>,
}

#[derive(Debug, Serialize)]
struct HistoryBody {
    metric: String,
    points: Vec<MetricPoint>,
}

async fn history(State(state): State<AppState>, Query(q): Query<HistoryQuery>) -> Response {
    let history = state.history.read().await;
    if !history.contains(&q.metric) {
        return (StatusCode::NOT_FOUND, format!("unknown metric {:?}", q.metric)).into_response();
    }
    let n = q.n.unwrap_or(history.capacity());
    let points = history.window(&q.metric, n);
    Json(HistoryBody {
        metric: q.metric,
        points,
    })
    .into_response()
}

#[derive(Debug, Serialize)]
struct TopProcessesBody<'a> {
    category: &'a str,
    count: usize,
    processes: &'a [ProcessInfo],
}

/// `cpu` or `memory` ranking from the latest snapshot.
async fn top_processes(State(state): State<AppState>, Path(category): Path<String>) -> Response {
    let Some(ranking) = ProcessRanking::parse(&category) else {
        return (StatusCode::NOT_FOUND, format!("unknown category {category:?}")).into_response();
    };
    let Some(latest) = state.hub.latest() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "no snapshot yet").into_response();
    };
    let Some(table) = latest.gauges.processes.as_ref() else {
        return (StatusCode::SERVICE_UNAVAILABLE, "process list not read yet").into_response();
    };
    Json(TopProcessesBody {
        category: &category,
        count: table.count,
        processes: table.ranked(ranking),
    })
    .into_response()
}

async fn log(State(state): State<AppState>) -> Json<Vec<LogLine>> {
    Json(state.logbook.recent(state.config.log_capacity))
}

#[derive(Debug, Serialize)]
struct StatusBody {
    #[serde(flatten)]
    hub: HubStats,
    uptime_secs: u64,
    tick_ms: u64,
    metrics: usize,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let metrics = state.history.read().await.len();
    Json(StatusBody {
        hub: state.hub.stats(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        tick_ms: state.config.tick_ms,
        metrics,
    })
}
