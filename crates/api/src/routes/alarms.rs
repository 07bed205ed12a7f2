use axum::{
    extract::{Path, State},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use common::{Alarm, AlarmKind, AlarmSet};
use engine::CycleReport;

use crate::{ApiError, AppState};

pub fn alarms_router() -> Router<AppState> {
    Router::new()
        .route("/api/alarms", get(get_alarms).post(add_alarm))
        .route("/api/alarms/:id", delete(dismiss_alarm))
        .route("/api/history", delete(clear_history))
        .route("/api/check", post(check_now))
}

async fn get_alarms(State(state): State<AppState>) -> Result<Json<AlarmSet>, ApiError> {
    Ok(Json(state.engine.alarms().await?))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewAlarm {
    coin_id: String,
    coin_name: String,
    #[serde(rename = "type")]
    kind: AlarmKind,
    target_price: f64,
    /// Defaults to the configured base currency.
    #[serde(default)]
    currency: Option<String>,
}

async fn add_alarm(
    State(state): State<AppState>,
    Json(body): Json<NewAlarm>,
) -> Result<Json<AlarmSet>, ApiError> {
    if body.coin_id.trim().is_empty() {
        return Err(ApiError::BadRequest("coinId must not be empty".into()));
    }
    if !body.target_price.is_finite() || body.target_price <= 0.0 {
        return Err(ApiError::BadRequest("targetPrice must be a positive number".into()));
    }

    let currency = match body.currency.filter(|c| !c.trim().is_empty()) {
        Some(currency) => currency,
        None => state.base_currency().await,
    };
    let alarm = Alarm::new(
        body.coin_id.trim(),
        body.coin_name,
        body.kind,
        body.target_price,
        currency,
    );
    Ok(Json(state.engine.add_alarm(alarm).await?))
}

async fn dismiss_alarm(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<AlarmSet>, ApiError> {
    Ok(Json(state.engine.dismiss_alarm(&id).await?))
}

async fn clear_history(State(state): State<AppState>) -> Result<Json<AlarmSet>, ApiError> {
    Ok(Json(state.engine.clear_history().await?))
}

async fn check_now(State(state): State<AppState>) -> Result<Json<CycleReport>, ApiError> {
    Ok(Json(state.engine.run_cycle().await?))
}
