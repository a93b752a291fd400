//! REST API routes.

use std::sync::Arc;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::api::{control, pilots};
use crate::state::AppState;

/// Create the API router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        // pilot records and controller input
        .route("/v1/pilots", get(pilots::list_pilots))
        .route("/v1/pilots/:callsign", get(pilots::get_pilot))
        .route("/v1/pilots/:callsign/actions", post(pilots::perform_action))
        .route("/v1/flightplans", post(pilots::submit_flightplan))
        // controller context
        .route(
            "/v1/airports",
            get(control::get_airports).put(control::put_airports),
        )
        .route("/v1/session", put(control::put_session))
        .route("/v1/commands", post(control::post_command))
        // diagnostics
        .route("/v1/status", get(control::get_status))
        .route("/v1/flow-measures", get(control::list_flow_measures))
        .route("/v1/logs", get(control::list_logs))
}
