use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::{AlarmSet, Result};

/// Key under which the alarm aggregate is persisted.
pub const ALARMS_KEY: &str = "alarms";
/// Key under which SMTP settings are persisted.
pub const MAIL_SETTINGS_KEY: &str = "mailSettings";
/// Quote currency chosen at runtime; overrides `BASE_CURRENCY`.
pub const BASE_CURRENCY_KEY: &str = "baseCurrency";
/// CoinGecko key chosen at runtime; overrides `COINGECKO_API_KEY`.
pub const COINGECKO_API_KEY_KEY: &str = "coingeckoApiKey";

/// Durable string-keyed storage. A `set_raw` is atomic: readers see either
/// the previous value or the new one, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>>;
    async fn set_raw(&self, key: &str, value: String) -> Result<()>;
    /// Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

pub async fn get_json<T, S>(store: &S, key: &str) -> Result<Option<T>>
where
    T: DeserializeOwned,
    S: KeyValueStore + ?Sized,
{
    match store.get_raw(key).await? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub async fn set_json<T, S>(store: &S, key: &str, value: &T) -> Result<()>
where
    T: Serialize + ?Sized,
    S: KeyValueStore + ?Sized,
{
    let raw = serde_json::to_string(value)?;
    store.set_raw(key, raw).await
}

/// Read/write access to the persisted `AlarmSet`.
#[async_trait]
pub trait AlarmStore: Send + Sync {
    /// Returns an empty set if nothing has been written yet.
    async fn read(&self) -> Result<AlarmSet>;
    /// Durable on return. On `Err` the previous set is still the persisted one.
    async fn write(&self, set: &AlarmSet) -> Result<()>;
}

#[async_trait]
impl<S> AlarmStore for S
where
    S: KeyValueStore + ?Sized,
{
    async fn read(&self) -> Result<AlarmSet> {
        Ok(get_json(self, ALARMS_KEY).await?.unwrap_or_default())
    }

    async fn write(&self, set: &AlarmSet) -> Result<()> {
        set_json(self, ALARMS_KEY, set).await
    }
}
