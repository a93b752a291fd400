//! Pilot records, flight-plan input and controller actions.

use std::sync::Arc;

use acdm_core::models::{FlightplanInput, Pilot, PilotRecord};
use acdm_core::{evaluate, stage, ActionError, ClearanceAction, DepartureStage, TimingSummary};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::{api_error, ApiError};
use crate::state::AppState;

/// A pilot record as shown to the operator.
#[derive(Debug, Serialize)]
pub struct PilotView {
    pub callsign: String,
    pub stage: DepartureStage,
    pub timing: TimingSummary,
    pub consolidated: Pilot,
    pub local: Pilot,
    pub server: Option<Pilot>,
}

impl PilotView {
    fn new(record: PilotRecord, now: DateTime<Utc>) -> Self {
        Self {
            callsign: record.callsign().to_string(),
            stage: stage(&record.consolidated),
            timing: evaluate(&record.consolidated, now),
            consolidated: record.consolidated,
            local: record.local,
            server: record.server,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PilotQuery {
    pub airport: Option<String>,
}

pub async fn list_pilots(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PilotQuery>,
) -> Json<Vec<PilotView>> {
    let now = Utc::now();
    let airport = query
        .airport
        .map(|airport| airport.trim().to_string())
        .filter(|airport| !airport.is_empty());

    let pilots = state
        .snapshot_pilots()
        .into_values()
        .filter(|record| {
            airport
                .as_deref()
                .map_or(true, |airport| record.local.origin.eq_ignore_ascii_case(airport))
        })
        .map(|record| PilotView::new(record, now))
        .collect();
    Json(pilots)
}

pub async fn get_pilot(
    State(state): State<Arc<AppState>>,
    Path(callsign): Path<String>,
) -> Result<Json<PilotView>, ApiError> {
    state
        .pilot(&callsign)
        .map(|record| Json(PilotView::new(record, Utc::now())))
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("unknown pilot {}", callsign)))
}

pub async fn submit_flightplan(
    State(state): State<Arc<AppState>>,
    Json(input): Json<FlightplanInput>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    if input.callsign.trim().is_empty() || input.origin.trim().is_empty() {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "callsign and origin are required",
        ));
    }

    let movement = state.submit_flightplan(&input, Utc::now());
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "callsign": input.callsign.trim().to_ascii_uppercase(),
            "queued": true,
            "movement": movement,
        })),
    ))
}

pub async fn perform_action(
    State(state): State<Arc<AppState>>,
    Path(callsign): Path<String>,
    Json(action): Json<ClearanceAction>,
) -> Result<Json<Value>, ApiError> {
    let outcome = state
        .perform_action(&callsign, &action, Utc::now())
        .map_err(|err| {
            let status = match err {
                ActionError::NotMaster => StatusCode::CONFLICT,
                ActionError::UnknownPilot(_) => StatusCode::NOT_FOUND,
                ActionError::NegativeExot(_) | ActionError::InvalidClock(_) => {
                    StatusCode::BAD_REQUEST
                }
            };
            api_error(status, err.to_string())
        })?;

    Ok(Json(json!({
        "callsign": callsign.trim().to_ascii_uppercase(),
        "updates": outcome.plan.updates,
        "ground_state": outcome.plan.ground_state,
        "pilot": outcome.pilot,
    })))
}
