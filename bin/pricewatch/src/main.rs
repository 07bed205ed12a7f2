use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common::store::{get_json, MAIL_SETTINGS_KEY};
use common::{AlarmStore, Config, KeyValueStore, MailSettings, PriceSource, Result};
use engine::{AlarmEngine, CoinGeckoClient, Dispatcher, Scheduler};
use store::{MemoryStore, SqliteStore};
use telegram_ctrl::{start_bot, BotDeps, TelegramNotifier};

#[tokio::main]
async fn main() {
    // ── Logging ──────────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run().await {
        error!(error = %e, "PriceWatch stopped");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // ── Config ────────────────────────────────────────────────────────────────
    let cfg = Config::from_env()?;
    info!(
        currency = %cfg.base_currency,
        interval_secs = cfg.check_interval.as_secs(),
        "PriceWatch starting"
    );

    // ── Storage ───────────────────────────────────────────────────────────────
    let (kv, alarms): (Arc<dyn KeyValueStore>, Arc<dyn AlarmStore>) = match &cfg.database_url {
        Some(url) => {
            let db = Arc::new(SqliteStore::connect(url).await?);
            (db.clone() as Arc<dyn KeyValueStore>, db as Arc<dyn AlarmStore>)
        }
        None => {
            warn!("DATABASE_URL not set; alarms are kept in memory only");
            let mem = Arc::new(MemoryStore::new());
            (mem.clone() as Arc<dyn KeyValueStore>, mem as Arc<dyn AlarmStore>)
        }
    };

    // ── Price API ─────────────────────────────────────────────────────────────
    let coins = Arc::new(CoinGeckoClient::new(cfg.coingecko_api_key.clone())?);
    let prices: Arc<dyn PriceSource> = coins.clone();

    // ── Notification sinks ────────────────────────────────────────────────────
    let mail = load_mail_settings(kv.as_ref(), cfg.mail_config_path.as_deref()).await;
    let mut sinks = notify::build_sinks(cfg.desktop_notifications, mail.as_ref());
    if let Some(token) = &cfg.telegram_token {
        if cfg.telegram_chat_ids.is_empty() {
            warn!("TELEGRAM_TOKEN set without TELEGRAM_CHAT_IDS; Telegram alerts disabled");
        } else {
            sinks.push(Arc::new(TelegramNotifier::new(token.clone(), &cfg.telegram_chat_ids)));
        }
    }
    if sinks.is_empty() {
        warn!("No notification sinks configured; fired alarms will only be logged");
    }

    // ── Engine ────────────────────────────────────────────────────────────────
    let dispatcher = Dispatcher::new(sinks, cfg.notify_stagger);
    info!(sinks = ?dispatcher.sink_names().await, "Notification dispatcher ready");
    let engine = Arc::new(AlarmEngine::new(alarms, prices, dispatcher));
    let scheduler = Scheduler::new(engine.clone(), cfg.check_interval).spawn();

    // ── Telegram C2 ───────────────────────────────────────────────────────────
    if let Some(token) = cfg.telegram_token.clone() {
        let deps = BotDeps {
            engine: engine.clone(),
            allowed_user_ids: Arc::new(cfg.telegram_chat_ids.clone()),
        };
        tokio::spawn(start_bot(token, deps));
    }

    // ── Local API ─────────────────────────────────────────────────────────────
    let api_state = api::AppState {
        engine: engine.clone(),
        settings: kv,
        coins,
        currency: Arc::new(RwLock::new(cfg.base_currency.clone())),
        api_token: cfg.api_token.clone(),
    };
    if let Err(e) = api_state.restore_settings().await {
        warn!(error = %e, "Saved price settings unreadable; using environment values");
    }
    let port = cfg.api_port;
    tokio::spawn(async move {
        if let Err(e) = api::serve(api_state, port).await {
            error!(error = %e, "Local API stopped");
        }
    });

    // Keep main alive
    info!("All subsystems started. Waiting for shutdown signal.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping.");

    scheduler.shutdown().await;
    engine.shutdown();
    Ok(())
}

/// Stored settings win; the TOML file only seeds a fresh install.
async fn load_mail_settings(kv: &dyn KeyValueStore, path: Option<&str>) -> Option<MailSettings> {
    match get_json::<MailSettings, _>(kv, MAIL_SETTINGS_KEY).await {
        Ok(Some(settings)) => return Some(settings),
        Ok(None) => {}
        Err(e) => warn!(error = %e, "Stored mail settings unreadable"),
    }

    let path = path?;
    match MailSettings::load(path) {
        Ok(settings) => {
            info!(path, "Mail settings loaded from file");
            Some(settings)
        }
        Err(e) => {
            warn!(path, error = %e, "Could not load mail settings file");
            None
        }
    }
}
