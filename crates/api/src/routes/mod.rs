mod alarms;
mod coins;
mod health;
mod settings;
mod ws;

use axum::Router;

use crate::AppState;

pub use health::health_router;
pub use ws::ws_router;

/// Every route under `/api`. Auth is layered on by the caller.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .merge(alarms::alarms_router())
        .merge(coins::coins_router())
        .merge(settings::settings_router())
}
