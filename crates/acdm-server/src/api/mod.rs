//! Local HTTP API of the tracker.

pub mod control;
pub mod pilots;
pub mod request_id;
mod routes;

use std::sync::Arc;

use axum::{http::StatusCode, middleware, routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

/// Error response of every handler.
pub type ApiError = (StatusCode, Json<Value>);

pub(crate) fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

pub fn routes() -> Router<Arc<AppState>> {
    routes::create_router()
}

/// Full application: routes, health check and middleware.
pub fn app(state: Arc<AppState>) -> Router {
    routes()
        .route("/health", get(|| async { "OK" }))
        .with_state(state)
        .layer(middleware::from_fn(request_id::ensure_request_id))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[cfg(test)]
mod tests;
