use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::info;

use common::store::{
    get_json, set_json, BASE_CURRENCY_KEY, COINGECKO_API_KEY_KEY, MAIL_SETTINGS_KEY,
};
use common::{MailSettings, REDACTED_PASSWORD};
use engine::ApiKeySource;
use notify::EmailNotifier;

use crate::{ApiError, AppState};

const EMAIL_SINK: &str = "email";

pub fn settings_router() -> Router<AppState> {
    Router::new()
        .route(
            "/api/settings/mail",
            get(get_mail).put(put_mail).delete(delete_mail),
        )
        .route("/api/settings/currency", get(get_currency).put(put_currency))
        .route(
            "/api/settings/api-key",
            get(get_api_key).put(put_api_key).delete(delete_api_key),
        )
        .route("/api/notify/test", post(test_notifications))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MailResponse {
    settings: Option<MailSettings>,
    email_enabled: bool,
}

async fn get_mail(State(state): State<AppState>) -> Result<Json<MailResponse>, ApiError> {
    let stored: Option<MailSettings> = get_json(state.settings.as_ref(), MAIL_SETTINGS_KEY).await?;
    let email_enabled = has_sink(&state, EMAIL_SINK).await;
    Ok(Json(MailResponse {
        settings: stored.map(|s| s.redacted()),
        email_enabled,
    }))
}

/// Replace the mail settings. A masked password keeps the stored one.
async fn put_mail(
    State(state): State<AppState>,
    Json(mut incoming): Json<MailSettings>,
) -> Result<Json<MailResponse>, ApiError> {
    if incoming.pass == REDACTED_PASSWORD {
        let stored: Option<MailSettings> =
            get_json(state.settings.as_ref(), MAIL_SETTINGS_KEY).await?;
        incoming.pass = stored.map(|s| s.pass).unwrap_or_default();
    }

    // Validate before persisting so a bad address never reaches the store.
    let notifier = EmailNotifier::from_settings(&incoming)?;
    set_json(state.settings.as_ref(), MAIL_SETTINGS_KEY, &incoming).await?;

    let dispatcher = state.engine.dispatcher();
    let email_enabled = match notifier {
        Some(email) => {
            dispatcher.replace_sink(Arc::new(email)).await;
            true
        }
        None => {
            dispatcher.remove_sink(EMAIL_SINK).await;
            false
        }
    };
    info!(email_enabled, "Mail settings updated");

    Ok(Json(MailResponse {
        settings: Some(incoming.redacted()),
        email_enabled,
    }))
}

async fn delete_mail(State(state): State<AppState>) -> Result<Json<MailResponse>, ApiError> {
    state.settings.delete(MAIL_SETTINGS_KEY).await?;
    state.engine.dispatcher().remove_sink(EMAIL_SINK).await;
    info!("Mail settings cleared");
    Ok(Json(MailResponse { settings: None, email_enabled: false }))
}

#[derive(Serialize, Deserialize)]
struct CurrencyBody {
    currency: String,
}

async fn get_currency(State(state): State<AppState>) -> Json<CurrencyBody> {
    Json(CurrencyBody { currency: state.base_currency().await })
}

async fn put_currency(
    State(state): State<AppState>,
    Json(body): Json<CurrencyBody>,
) -> Result<Json<CurrencyBody>, ApiError> {
    let currency = normalize_currency(&body.currency).ok_or_else(|| {
        ApiError::BadRequest(format!("'{}' is not a currency code", body.currency.trim()))
    })?;

    set_json(state.settings.as_ref(), BASE_CURRENCY_KEY, &currency).await?;
    *state.currency.write().await = currency.clone();
    info!(%currency, "Base currency updated");
    Ok(Json(CurrencyBody { currency }))
}

/// Lowercase code such as `usd`, `eur` or `btc`.
fn normalize_currency(raw: &str) -> Option<String> {
    let code = raw.trim().to_lowercase();
    let valid = (2..=10).contains(&code.len()) && code.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then_some(code)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyResponse {
    /// Masked; the key itself is never handed back.
    api_key: String,
    source: ApiKeySource,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiKeyBody {
    api_key: String,
}

async fn get_api_key(State(state): State<AppState>) -> Json<ApiKeyResponse> {
    Json(api_key_response(&state).await)
}

async fn put_api_key(
    State(state): State<AppState>,
    Json(body): Json<ApiKeyBody>,
) -> Result<Json<ApiKeyResponse>, ApiError> {
    let key = body.api_key.trim();
    if key.is_empty() {
        return Err(ApiError::BadRequest("apiKey must not be empty".into()));
    }

    set_json(state.settings.as_ref(), COINGECKO_API_KEY_KEY, key).await?;
    state.coins.set_api_key(Some(key.to_string())).await;
    Ok(Json(api_key_response(&state).await))
}

/// Forget the saved key; requests fall back to `COINGECKO_API_KEY`, if any.
async fn delete_api_key(State(state): State<AppState>) -> Result<Json<ApiKeyResponse>, ApiError> {
    state.settings.delete(COINGECKO_API_KEY_KEY).await?;
    state.coins.set_api_key(None).await;
    Ok(Json(api_key_response(&state).await))
}

async fn api_key_response(state: &AppState) -> ApiKeyResponse {
    let source = state.coins.api_key_source().await;
    let api_key = match source {
        ApiKeySource::None => String::new(),
        _ => REDACTED_PASSWORD.to_string(),
    };
    ApiKeyResponse { api_key, source }
}

async fn test_notifications(State(state): State<AppState>) -> Json<Vec<Value>> {
    let results = state.engine.dispatcher().send_test_all().await;
    Json(
        results
            .into_iter()
            .map(|(sink, result)| match result {
                Ok(()) => json!({ "sink": sink, "ok": true }),
                Err(e) => json!({ "sink": sink, "ok": false, "error": e.to_string() }),
            })
            .collect(),
    )
}

async fn has_sink(state: &AppState, name: &str) -> bool {
    state
        .engine
        .dispatcher()
        .sink_names()
        .await
        .iter()
        .any(|n| n == name)
}
