// src/storage/mod.rs - Persistence collaborators for records and chat settings

use anyhow::Result;
use async_trait::async_trait;
use chrono::Duration;
use log::{debug, info};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::cache::{entity_key, EphemeralCache};
use crate::types::{ChatSettings, ModerationRecord, RecordKey};

const CHAT_NAMESPACE: &str = "chat";

/// Storage of per (user, chat) moderation records.
///
/// Implementations own retries; the engine treats every call as one opaque
/// awaited operation.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn load(&self, user_id: i64, chat_id: i64) -> Result<Option<ModerationRecord>>;

    async fn save(&self, record: &ModerationRecord) -> Result<()>;

    /// Returns true if a record was removed
    async fn delete(&self, user_id: i64, chat_id: i64) -> Result<bool>;
}

/// Storage of per-chat settings
#[async_trait]
pub trait ChatSettingsStore: Send + Sync {
    async fn load_settings(&self, chat_id: i64) -> Result<Option<ChatSettings>>;

    async fn save_settings(&self, chat_id: i64, settings: &ChatSettings) -> Result<()>;
}

/// Process-local store backing the binary and the tests
#[derive(Clone, Default)]
pub struct InMemoryStore {
    records: Arc<RwLock<HashMap<RecordKey, ModerationRecord>>>,
    settings: Arc<RwLock<HashMap<i64, ChatSettings>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ModerationStore for InMemoryStore {
    async fn load(&self, user_id: i64, chat_id: i64) -> Result<Option<ModerationRecord>> {
        let key = RecordKey { user_id, chat_id };
        Ok(self.records.read().await.get(&key).cloned())
    }

    async fn save(&self, record: &ModerationRecord) -> Result<()> {
        self.records.write().await.insert(record.key(), record.clone());
        Ok(())
    }

    async fn delete(&self, user_id: i64, chat_id: i64) -> Result<bool> {
        let key = RecordKey { user_id, chat_id };
        Ok(self.records.write().await.remove(&key).is_some())
    }
}

#[async_trait]
impl ChatSettingsStore for InMemoryStore {
    async fn load_settings(&self, chat_id: i64) -> Result<Option<ChatSettings>> {
        Ok(self.settings.read().await.get(&chat_id).cloned())
    }

    async fn save_settings(&self, chat_id: i64, settings: &ChatSettings) -> Result<()> {
        self.settings.write().await.insert(chat_id, settings.clone());
        Ok(())
    }
}

/// Read-through cache in front of a [`ChatSettingsStore`].
///
/// Writes go to the store first and invalidate the cached copy second. Cache
/// misses load under the same lock as writes, so a reader never caches or
/// persists a value older than a concurrent edit.
#[derive(Clone)]
pub struct ChatSettingsService {
    store: Arc<dyn ChatSettingsStore>,
    cache: EphemeralCache<String, ChatSettings>,
    ttl: Duration,
    defaults: ChatSettings,
    write_lock: Arc<Mutex<()>>,
}

impl ChatSettingsService {
    pub fn new(store: Arc<dyn ChatSettingsStore>, ttl: Duration, defaults: ChatSettings) -> Self {
        Self {
            store,
            cache: EphemeralCache::new(),
            ttl,
            defaults,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Settings of `chat_id`. Chats seen for the first time get the defaults, which are persisted.
    pub async fn get(&self, chat_id: i64) -> crate::error::Result<ChatSettings> {
        let key = entity_key(CHAT_NAMESPACE, chat_id);
        if let Some(settings) = self.cache.get(&key).await {
            return Ok(settings);
        }

        let _guard = self.write_lock.lock().await;
        // another reader may have filled the cache while this one waited
        if let Some(settings) = self.cache.get(&key).await {
            return Ok(settings);
        }

        let settings = match self.store.load_settings(chat_id).await? {
            Some(settings) => settings,
            None => {
                info!("No settings stored for chat {}, applying defaults", chat_id);
                self.store.save_settings(chat_id, &self.defaults).await?;
                self.defaults.clone()
            }
        };

        self.cache.set(key, settings.clone(), Some(self.ttl)).await;
        Ok(settings)
    }

    /// Persist `settings` for `chat_id` and drop the cached copy.
    pub async fn save(&self, chat_id: i64, settings: &ChatSettings) -> crate::error::Result<()> {
        let _guard = self.write_lock.lock().await;
        self.persist(chat_id, settings).await
    }

    /// Apply an edit to the stored settings of `chat_id` and persist the result.
    ///
    /// Edits are serialized, so two concurrent toggles never overwrite each other.
    pub async fn update<F>(&self, chat_id: i64, edit: F) -> crate::error::Result<ChatSettings>
    where
        F: FnOnce(&ChatSettings) -> crate::error::Result<ChatSettings> + Send,
    {
        let _guard = self.write_lock.lock().await;

        let current = match self.store.load_settings(chat_id).await? {
            Some(settings) => settings,
            None => self.defaults.clone(),
        };
        let next = edit(&current)?;

        self.persist(chat_id, &next).await?;
        Ok(next)
    }

    pub fn defaults(&self) -> &ChatSettings {
        &self.defaults
    }

    async fn persist(&self, chat_id: i64, settings: &ChatSettings) -> crate::error::Result<()> {
        self.store.save_settings(chat_id, settings).await?;
        self.cache.delete(&entity_key(CHAT_NAMESPACE, chat_id)).await;
        debug!("Settings of chat {} saved, cache invalidated", chat_id);
        Ok(())
    }
}
