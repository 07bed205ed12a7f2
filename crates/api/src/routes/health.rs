use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde_json::{json, Value};
use tracing::warn;

use crate::AppState;

pub fn health_router() -> Router<AppState> {
    Router::new().route("/healthz", get(healthz))
}

/// Health check endpoint, no auth required.
async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let sinks = state.engine.dispatcher().sink_names().await;
    match state.engine.alarms().await {
        Ok(set) => (
            StatusCode::OK,
            Json(json!({
                "status": "ok",
                "active": set.active.len(),
                "history": set.history.len(),
                "sinks": sinks,
            })),
        ),
        Err(e) => {
            warn!(error = %e, "Health check could not read alarms");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "degraded", "error": e.to_string(), "sinks": sinks })),
            )
        }
    }
}
