mod auth;
mod error;
pub mod routes;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{middleware, Router};
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use common::store::{get_json, BASE_CURRENCY_KEY, COINGECKO_API_KEY_KEY};
use common::{KeyValueStore, Result};
use engine::{AlarmEngine, CoinGeckoClient};

pub use error::ApiError;

/// Shared application state injected into every route handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<AlarmEngine>,
    /// Where mail settings are persisted.
    pub settings: Arc<dyn KeyValueStore>,
    pub coins: Arc<CoinGeckoClient>,
    /// Quote currency for coin lookups and alarms created without one.
    pub currency: Arc<RwLock<String>>,
    /// When set, `/api/*` and `/ws/*` require this bearer token.
    pub api_token: Option<String>,
}

impl AppState {
    pub async fn base_currency(&self) -> String {
        self.currency.read().await.clone()
    }

    /// Apply the currency and API key saved through the settings routes.
    /// Anything not saved keeps its environment value.
    pub async fn restore_settings(&self) -> Result<()> {
        let store = self.settings.as_ref();
        if let Some(currency) = get_json::<String, _>(store, BASE_CURRENCY_KEY).await? {
            info!(%currency, "Using saved base currency");
            *self.currency.write().await = currency;
        }
        if let Some(key) = get_json::<String, _>(store, COINGECKO_API_KEY_KEY).await? {
            self.coins.set_api_key(Some(key)).await;
        }
        Ok(())
    }
}

/// Assemble every route with auth applied to the protected ones.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_headers(Any)
        .allow_methods(Any);

    let protected = routes::api_router().route_layer(middleware::from_fn_with_state(
        state.clone(),
        auth::require_auth,
    ));

    Router::new()
        .merge(protected)
        .merge(routes::ws_router())
        .merge(routes::health_router())
        .with_state(state)
        .layer(cors)
}

/// Build and run the local API server. Binds to loopback only.
pub async fn serve(state: AppState, port: u16) -> Result<()> {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let app = router(state);

    info!(%addr, "Local API listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
