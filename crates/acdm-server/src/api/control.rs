//! Controller context, control commands and diagnostics.

use std::collections::BTreeMap;
use std::sync::Arc;

use acdm_core::models::EcfmpFlowMeasure;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::{api_error, ApiError};
use crate::commands::{self, CommandReply};
use crate::master::SessionInfo;
use crate::persistence::{log_messages, LogRecord};
use crate::state::{ApiStatus, AppState, AuthStatus};

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct AirportsRequest {
    pub airports: Vec<String>,
}

pub async fn get_airports(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "airports": state.active_airports() }))
}

pub async fn put_airports(
    State(state): State<Arc<AppState>>,
    Json(request): Json<AirportsRequest>,
) -> Json<Value> {
    let airports = state.set_active_airports(request.airports);
    Json(json!({ "airports": airports }))
}

pub async fn put_session(
    State(state): State<Arc<AppState>>,
    Json(session): Json<SessionInfo>,
) -> Json<Value> {
    state.set_session(session);
    Json(json!({
        "session": state.session(),
        "master": state.is_master(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CommandRequest {
    pub command: String,
}

pub async fn post_command(
    State(state): State<Arc<AppState>>,
    Json(request): Json<CommandRequest>,
) -> (StatusCode, Json<CommandReply>) {
    let reply = commands::execute_line(&state, &request.command);
    let status = if reply.success {
        StatusCode::OK
    } else {
        StatusCode::BAD_REQUEST
    };
    (status, Json(reply))
}

#[derive(Debug, Serialize)]
pub struct StatusView {
    pub version: &'static str,
    pub master: bool,
    pub paused: bool,
    pub can_write: bool,
    pub server_url: String,
    pub update_cycle_seconds: u64,
    pub position_tolerance_m: f64,
    pub active_airports: Vec<String>,
    pub session: SessionInfo,
    pub api: ApiStatus,
    pub auth: AuthStatus,
    pub pilots: usize,
    pub log_levels: BTreeMap<&'static str, &'static str>,
    pub log_sink_enabled: bool,
    pub loops: BTreeMap<String, DateTime<Utc>>,
}

pub async fn get_status(State(state): State<Arc<AppState>>) -> Json<StatusView> {
    Json(StatusView {
        version: env!("CARGO_PKG_VERSION"),
        master: state.is_master(),
        paused: state.is_paused(),
        can_write: state.can_write(),
        server_url: state.backend().base_url(),
        update_cycle_seconds: state.update_cycle_seconds(),
        position_tolerance_m: state.position_tolerance_m(),
        active_airports: state.active_airports(),
        session: state.session(),
        api: state.api_status(),
        auth: state.auth_status(),
        pilots: state.snapshot_pilots().len(),
        log_levels: state.log_control().levels(),
        log_sink_enabled: state.log_control().sink_enabled(),
        loops: state.loop_heartbeats(),
    })
}

#[derive(Debug, Deserialize)]
pub struct FlowMeasureQuery {
    /// Only measures active right now
    #[serde(default)]
    pub active: bool,
}

pub async fn list_flow_measures(
    State(state): State<Arc<AppState>>,
    Query(query): Query<FlowMeasureQuery>,
) -> Json<Vec<EcfmpFlowMeasure>> {
    let active_at = query.active.then(Utc::now);
    Json(state.flow_measures(active_at))
}

#[derive(Debug, Deserialize)]
pub struct LogQuery {
    pub limit: Option<i64>,
}

pub async fn list_logs(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<LogRecord>>, ApiError> {
    let Some(db) = state.database() else {
        return Err(api_error(
            StatusCode::SERVICE_UNAVAILABLE,
            "log storage is not configured",
        ));
    };
    let limit = query
        .limit
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(1, MAX_LOG_LIMIT);

    log_messages::recent_messages(db.pool(), limit)
        .await
        .map(Json)
        .map_err(|err| {
            tracing::warn!("Failed to read log messages: {}", err);
            api_error(StatusCode::INTERNAL_SERVER_ERROR, "failed to read log messages")
        })
}
