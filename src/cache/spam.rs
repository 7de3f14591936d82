// src/cache/spam.rs - Spam-window counters for debouncing punishment notices

use chrono::{DateTime, Duration, Utc};
use log::debug;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::{scoped_key, EphemeralCache};

pub const DEFAULT_SPAM_THRESHOLD: u32 = 2;
pub const DEFAULT_SPAM_WINDOW_SECONDS: i64 = 120;

const SPAM_NAMESPACE: &str = "spam";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpamCounter {
    pub count: u32,
    pub last_seen: DateTime<Utc>,
}

/// Counts notices sent to one user in one chat within a sliding window.
#[derive(Clone)]
pub struct SpamWindow {
    counters: EphemeralCache<String, SpamCounter>,
    window: Duration,
    threshold: u32,
    last_sweep: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl Default for SpamWindow {
    fn default() -> Self {
        Self::new(Duration::seconds(DEFAULT_SPAM_WINDOW_SECONDS), DEFAULT_SPAM_THRESHOLD)
    }
}

impl SpamWindow {
    pub fn new(window: Duration, threshold: u32) -> Self {
        Self {
            counters: EphemeralCache::new(),
            window,
            threshold,
            last_sweep: Arc::new(Mutex::new(None)),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub async fn increment(&self, chat_id: i64, user_id: i64) -> u32 {
        self.increment_at(chat_id, user_id, Utc::now()).await
    }

    /// Bump the counter, restarting it when the previous hit is older than the window.
    pub async fn increment_at(&self, chat_id: i64, user_id: i64, now: DateTime<Utc>) -> u32 {
        let window = self.window;
        let counter = self
            .counters
            .update_at(scoped_key(SPAM_NAMESPACE, chat_id, user_id), now, |current| {
                let mut count = current.map_or(0, |c| c.count);
                let last_seen = current.map_or(now, |c| c.last_seen);

                if now - last_seen > window {
                    count = 0;
                }

                (SpamCounter { count: count + 1, last_seen: now }, Some(window))
            })
            .await;

        debug!("Spam counter for user {} in chat {} is now {}", user_id, chat_id, counter.count);
        counter.count
    }

    pub async fn is_spamming(&self, chat_id: i64, user_id: i64) -> bool {
        self.is_spamming_at(chat_id, user_id, Utc::now()).await
    }

    pub async fn is_spamming_at(&self, chat_id: i64, user_id: i64, now: DateTime<Utc>) -> bool {
        self.counters
            .get_at(&scoped_key(SPAM_NAMESPACE, chat_id, user_id), now)
            .await
            .map_or(false, |counter| counter.count >= self.threshold)
    }

    /// Forget the counter so the next notice is not suppressed.
    pub async fn clear(&self, chat_id: i64, user_id: i64) {
        self.counters.delete(&scoped_key(SPAM_NAMESPACE, chat_id, user_id)).await;
    }

    /// Drop counters whose window ran out. Runs at most once per window; returns how many were dropped.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> usize {
        {
            let mut last_sweep = self.last_sweep.lock().await;
            if last_sweep.map_or(false, |at| now - at < self.window) {
                return 0;
            }
            *last_sweep = Some(now);
        }
        self.counters.purge_expired(now).await
    }

    /// Number of stored counters, live or not yet swept
    pub async fn len(&self) -> usize {
        self.counters.len().await
    }

    pub async fn is_empty(&self) -> bool {
        self.counters.is_empty().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_increments_within_window() {
        let spam = SpamWindow::new(Duration::seconds(120), 2);
        let now = Utc::now();

        assert_eq!(spam.increment_at(1, 2, now).await, 1);
        assert!(!spam.is_spamming_at(1, 2, now).await);

        assert_eq!(spam.increment_at(1, 2, now + Duration::seconds(30)).await, 2);
        assert!(spam.is_spamming_at(1, 2, now + Duration::seconds(30)).await);
    }

    #[tokio::test]
    async fn test_gap_longer_than_window_resets() {
        let spam = SpamWindow::new(Duration::seconds(120), 2);
        let now = Utc::now();

        spam.increment_at(1, 2, now).await;
        let later = now + Duration::seconds(121);
        assert_eq!(spam.increment_at(1, 2, later).await, 1);
        assert!(!spam.is_spamming_at(1, 2, later).await);
    }

    #[tokio::test]
    async fn test_keys_are_independent_and_clearable() {
        let spam = SpamWindow::default();
        let now = Utc::now();

        spam.increment_at(1, 2, now).await;
        spam.increment_at(1, 2, now).await;
        spam.increment_at(1, 3, now).await;

        assert!(spam.is_spamming_at(1, 2, now).await);
        assert!(!spam.is_spamming_at(1, 3, now).await);
        assert!(!spam.is_spamming_at(9, 2, now).await);

        spam.clear(1, 2).await;
        assert!(!spam.is_spamming(1, 2).await);
    }

    #[tokio::test]
    async fn test_sweep_drops_stale_counters_once_per_window() {
        let spam = SpamWindow::new(Duration::seconds(120), 2);
        let now = Utc::now();
        for user in 0..1000 {
            spam.increment_at(1, user, now).await;
        }
        assert_eq!(spam.len().await, 1000);

        // nothing has expired yet, and a second sweep within the window is skipped
        assert_eq!(spam.sweep_at(now).await, 0);
        assert_eq!(spam.sweep_at(now + Duration::seconds(60)).await, 0);

        spam.increment_at(1, 5000, now + Duration::seconds(100)).await;
        assert_eq!(spam.sweep_at(now + Duration::days(1)).await, 1001);
        assert!(spam.is_empty().await);
    }

    #[tokio::test]
    async fn test_concurrent_increments_are_serialized() {
        let spam = SpamWindow::default();
        let mut handles = Vec::new();
        for _ in 0..20 {
            let spam = spam.clone();
            handles.push(tokio::spawn(async move { spam.increment(5, 6).await }));
        }

        let mut counts = Vec::new();
        for handle in handles {
            counts.push(handle.await.unwrap());
        }
        counts.sort_unstable();
        assert_eq!(counts, (1..=20).collect::<Vec<u32>>());
    }
}
