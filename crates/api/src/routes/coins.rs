use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::Deserialize;

use engine::CoinMarket;

use crate::{ApiError, AppState};

pub fn coins_router() -> Router<AppState> {
    Router::new()
        .route("/api/coins/top", get(top_coins))
        .route("/api/coins/search", get(search_coins))
}

#[derive(Deserialize)]
struct TopQuery {
    count: Option<u32>,
    currency: Option<String>,
}

async fn top_coins(
    State(state): State<AppState>,
    Query(q): Query<TopQuery>,
) -> Result<Json<Vec<CoinMarket>>, ApiError> {
    let currency = currency_or_default(&state, q.currency).await;
    let count = q.count.unwrap_or(10);
    Ok(Json(state.coins.top_coins(&currency, count).await?))
}

#[derive(Deserialize)]
struct SearchQuery {
    q: Option<String>,
    currency: Option<String>,
}

async fn search_coins(
    State(state): State<AppState>,
    Query(q): Query<SearchQuery>,
) -> Result<Json<Vec<CoinMarket>>, ApiError> {
    let Some(text) = q.q.filter(|t| !t.trim().is_empty()) else {
        return Ok(Json(Vec::new()));
    };
    let currency = currency_or_default(&state, q.currency).await;
    Ok(Json(state.coins.search_coins(&text, &currency).await?))
}

async fn currency_or_default(state: &AppState, currency: Option<String>) -> String {
    match currency.filter(|c| !c.trim().is_empty()) {
        Some(currency) => currency,
        None => state.base_currency().await,
    }
}
