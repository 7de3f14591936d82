// src/cache/mod.rs - Short-lived keyed state with lazy expiry

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod sessions;
pub mod spam;

pub use sessions::{EditSession, EditState, SessionStore};
pub use spam::{SpamCounter, SpamWindow};

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Option<DateTime<Utc>>,
}

impl<V> CacheEntry<V> {
    fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map_or(true, |expires| now <= expires)
    }
}

/// Async key/value store with optional per-entry expiry.
///
/// Nothing is swept in the background: an expired entry reads as absent and
/// is dropped the next time its key is read or written, or by [`purge_expired`].
///
/// [`purge_expired`]: EphemeralCache::purge_expired
pub struct EphemeralCache<K, V> {
    entries: Arc<RwLock<HashMap<K, CacheEntry<V>>>>,
}

impl<K, V> Clone for EphemeralCache<K, V> {
    fn clone(&self) -> Self {
        Self { entries: Arc::clone(&self.entries) }
    }
}

impl<K, V> Default for EphemeralCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> EphemeralCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn set(&self, key: K, value: V, ttl: Option<Duration>) {
        self.set_at(key, value, ttl, Utc::now()).await
    }

    pub async fn set_at(&self, key: K, value: V, ttl: Option<Duration>, now: DateTime<Utc>) {
        let expires_at = ttl.map(|ttl| now + ttl);
        self.entries.write().await.insert(key, CacheEntry { value, expires_at });
    }

    pub async fn get(&self, key: &K) -> Option<V> {
        self.get_at(key, Utc::now()).await
    }

    pub async fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<V> {
        {
            let entries = self.entries.read().await;
            match entries.get(key) {
                None => return None,
                Some(entry) if entry.is_live_at(now) => return Some(entry.value.clone()),
                Some(_) => {}
            }
        }

        // Expired: evict under the write lock unless it was refreshed meanwhile
        let mut entries = self.entries.write().await;
        match entries.get(key) {
            Some(entry) if entry.is_live_at(now) => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Remove an entry. Returns true if a live entry was removed.
    pub async fn delete(&self, key: &K) -> bool {
        let now = Utc::now();
        self.entries
            .write()
            .await
            .remove(key)
            .map_or(false, |entry| entry.is_live_at(now))
    }

    /// Read-modify-write of one key under the write lock.
    ///
    /// `f` receives the live value (if any) and returns the new value plus its TTL.
    /// Concurrent updates of the same key are serialized, so no update is lost.
    pub async fn update_at<F>(&self, key: K, now: DateTime<Utc>, f: F) -> V
    where
        F: FnOnce(Option<&V>) -> (V, Option<Duration>),
    {
        let mut entries = self.entries.write().await;
        let current = entries.get(&key).filter(|entry| entry.is_live_at(now)).map(|entry| &entry.value);
        let (value, ttl) = f(current);

        let expires_at = ttl.map(|ttl| now + ttl);
        entries.insert(key, CacheEntry { value: value.clone(), expires_at });
        value
    }

    /// Drop every entry that expired before `now`. Returns how many were dropped.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        let purged = before - entries.len();
        if purged > 0 {
            debug!("Purged {} expired cache entries", purged);
        }
        purged
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

/// Key for state scoped to one user in one chat: `{namespace}_{chat_id}_{user_id}`
pub fn scoped_key(namespace: &str, chat_id: i64, user_id: i64) -> String {
    format!("{}_{}_{}", namespace, chat_id, user_id)
}

/// Key for state of a single entity: `{namespace}_{id}`
pub fn entity_key(namespace: &str, id: i64) -> String {
    format!("{}_{}", namespace, id)
}
