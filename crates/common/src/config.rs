use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Period between alarm cycles when `CHECK_INTERVAL_SECS` is unset.
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(60);
/// Delay between successive fired-alarm notifications.
pub const DEFAULT_NOTIFY_STAGGER: Duration = Duration::from_millis(500);
/// Upper bound for `NOTIFY_STAGGER_MS`.
pub const MAX_NOTIFY_STAGGER: Duration = Duration::from_secs(60);

/// All configuration loaded from environment variables at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // Storage
    /// `None` keeps alarms in memory for the lifetime of the process.
    pub database_url: Option<String>,

    // Price API
    pub coingecko_api_key: Option<String>,
    pub base_currency: String,

    // Engine
    pub check_interval: Duration,
    pub notify_stagger: Duration,

    // Notifications
    pub desktop_notifications: bool,
    pub mail_config_path: Option<String>,
    pub telegram_token: Option<String>,
    pub telegram_chat_ids: Vec<i64>,

    // Local API
    pub api_port: u16,
    pub api_token: Option<String>,
}

impl Config {
    /// Load configuration from the environment. Loads `.env` if present.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv(); // ignore error if .env not present

        let telegram_chat_ids = match optional_env("TELEGRAM_CHAT_IDS") {
            Some(raw) => raw
                .split(',')
                .filter(|s| !s.trim().is_empty())
                .map(|s| {
                    s.trim().parse::<i64>().map_err(|_| {
                        Error::Config(format!(
                            "TELEGRAM_CHAT_IDS contains non-numeric ID: '{}'",
                            s.trim()
                        ))
                    })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        Ok(Config {
            database_url: optional_env("DATABASE_URL"),
            coingecko_api_key: optional_env("COINGECKO_API_KEY"),
            base_currency: optional_env("BASE_CURRENCY")
                .map(|c| c.to_lowercase())
                .unwrap_or_else(|| "usd".to_string()),
            check_interval: check_interval(parsed_env(
                "CHECK_INTERVAL_SECS",
                DEFAULT_CHECK_INTERVAL.as_secs(),
            )?)?,
            notify_stagger: notify_stagger(parsed_env(
                "NOTIFY_STAGGER_MS",
                DEFAULT_NOTIFY_STAGGER.as_millis() as u64,
            )?)?,
            desktop_notifications: parsed_env("DESKTOP_NOTIFICATIONS", true)?,
            mail_config_path: optional_env("MAIL_CONFIG_PATH"),
            telegram_token: optional_env("TELEGRAM_TOKEN"),
            telegram_chat_ids,
            api_port: parsed_env("API_PORT", 8080)?,
            api_token: optional_env("API_TOKEN"),
        })
    }
}

fn check_interval(secs: u64) -> Result<Duration> {
    if secs == 0 {
        return Err(Error::Config("CHECK_INTERVAL_SECS must be at least 1".into()));
    }
    Ok(Duration::from_secs(secs))
}

fn notify_stagger(millis: u64) -> Result<Duration> {
    let stagger = Duration::from_millis(millis);
    if stagger > MAX_NOTIFY_STAGGER {
        return Err(Error::Config(format!(
            "NOTIFY_STAGGER_MS must not exceed {}",
            MAX_NOTIFY_STAGGER.as_millis()
        )));
    }
    Ok(stagger)
}

/// Blank values count as unset.
fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match optional_env(key) {
        Some(raw) => raw
            .parse()
            .map_err(|_| Error::Config(format!("{key} has an invalid value: '{raw}'"))),
        None => Ok(default),
    }
}

/// SMTP settings for the optional email sink.
///
/// Example `config/mail.toml`:
/// ```toml
/// service = "gmail"
/// user = "me@gmail.com"
/// pass = "app-password"
/// recipient = "me@example.com"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MailSettings {
    /// Well-known provider: "gmail", "yahoo", "outlook" or "icloud".
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Only consulted for ports other than 465, 587 and 25.
    #[serde(default)]
    pub secure: Option<bool>,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub pass: String,
    #[serde(default)]
    pub recipient: Option<String>,
}

/// Placeholder handed out instead of the stored SMTP password.
pub const REDACTED_PASSWORD: &str = "********";

impl MailSettings {
    /// Load from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse mail settings at '{path}': {e}")))
    }

    /// Copy safe to hand back to a UI.
    pub fn redacted(&self) -> Self {
        Self {
            pass: if self.pass.is_empty() { String::new() } else { REDACTED_PASSWORD.to_string() },
            ..self.clone()
        }
    }
}
