use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::info;

use common::{KeyValueStore, Result};

/// Volatile key-value store. Used when no database is configured and in tests.
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        info!("MemoryStore initialized; alarms will not survive a restart");
        Self::default()
    }

    /// Number of keys currently held.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_raw(&self, key: &str, value: String) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::store::{get_json, set_json, MAIL_SETTINGS_KEY};
    use common::{AlarmStore, MailSettings};

    #[tokio::test]
    async fn unset_store_reads_empty_alarm_set() {
        let store = MemoryStore::new();
        let set = store.read().await.unwrap();
        assert!(set.active.is_empty() && set.history.is_empty());
        assert!(store.is_empty().await, "read must not initialize the key");
    }

    #[tokio::test]
    async fn json_helpers_store_typed_values() {
        let store = MemoryStore::new();
        let settings = MailSettings {
            service: Some("gmail".into()),
            user: "me@gmail.com".into(),
            pass: "pw".into(),
            ..MailSettings::default()
        };
        set_json(&store, MAIL_SETTINGS_KEY, &settings).await.unwrap();

        let loaded: Option<MailSettings> = get_json(&store, MAIL_SETTINGS_KEY).await.unwrap();
        assert_eq!(loaded, Some(settings));
        assert_eq!(store.len().await, 1);
    }
}
