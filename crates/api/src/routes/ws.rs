use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use serde::Deserialize;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{debug, warn};

use common::AlarmSet;
use engine::AlarmEngine;

use crate::{auth::query_token_ok, AppState};

pub fn ws_router() -> Router<AppState> {
    Router::new().route("/ws/alarms", get(ws_alarms_handler))
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// Streams the full `AlarmSet` as JSON: once on connect, then after every
/// committed change. Auth via `?token=` when an API token is configured.
async fn ws_alarms_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(q): Query<WsQuery>,
) -> Response {
    if !query_token_ok(&state, q.token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, "unauthorized").into_response();
    }

    // Subscribe before reading the snapshot so no change slips between them.
    let rx = state.engine.subscribe();
    let engine = state.engine.clone();
    ws.on_upgrade(move |socket| async move {
        let snapshot = match engine.alarms().await {
            Ok(set) => set,
            Err(e) => {
                warn!(error = %e, "Could not read alarms for WebSocket client");
                return;
            }
        };
        handle_ws(socket, snapshot, rx, engine).await
    })
}

async fn handle_ws(
    mut socket: WebSocket,
    snapshot: AlarmSet,
    mut rx: broadcast::Receiver<AlarmSet>,
    engine: std::sync::Arc<AlarmEngine>,
) {
    if send_set(&mut socket, &snapshot).await.is_err() {
        return;
    }

    loop {
        match rx.recv().await {
            Ok(set) => {
                if send_set(&mut socket, &set).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Lagged(n)) => {
                // Missed updates are superseded by the current state.
                warn!(dropped = n, "WebSocket alarm client lagged");
                let Ok(set) = engine.alarms().await else { break };
                if send_set(&mut socket, &set).await.is_err() {
                    break;
                }
            }
            Err(RecvError::Closed) => break,
        }
    }
    debug!("WebSocket alarm client disconnected");
}

async fn send_set(socket: &mut WebSocket, set: &AlarmSet) -> Result<(), ()> {
    let text = serde_json::to_string(set).map_err(|_| ())?;
    socket.send(Message::Text(text)).await.map_err(|_| ())
}
