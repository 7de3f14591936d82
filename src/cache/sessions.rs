// src/cache/sessions.rs - Per-user settings editing sessions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{entity_key, EphemeralCache};

const SESSION_NAMESPACE: &str = "user_state";

/// Free-text input the bot is waiting for in a private chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditState {
    RestrictedWordDuration,
    LinkFilterAdd,
    LinkFilterDelete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EditSession {
    pub user_id: i64,
    /// Chat whose settings the user is editing
    pub selected_chat_id: Option<i64>,
    pub state: Option<EditState>,
    /// Chat whose rules the user was asked to accept
    pub rules_chat_id: Option<i64>,
    pub read_rules_start: Option<DateTime<Utc>>,
}

impl EditSession {
    pub fn new(user_id: i64) -> Self {
        Self { user_id, ..Default::default() }
    }
}

/// Editing sessions live until cleared by their owner; they have no TTL.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: EphemeralCache<String, EditSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The stored session, or a fresh one for users without state.
    pub async fn get(&self, user_id: i64) -> EditSession {
        self.sessions
            .get(&entity_key(SESSION_NAMESPACE, user_id))
            .await
            .unwrap_or_else(|| EditSession::new(user_id))
    }

    pub async fn set(&self, session: EditSession) {
        self.sessions.set(entity_key(SESSION_NAMESPACE, session.user_id), session, None).await
    }

    pub async fn clear(&self, user_id: i64) {
        self.sessions.delete(&entity_key(SESSION_NAMESPACE, user_id)).await;
    }

    /// Select a chat and wait for the given input.
    pub async fn begin_edit(&self, user_id: i64, chat_id: i64, state: EditState) {
        let mut session = self.get(user_id).await;
        session.selected_chat_id = Some(chat_id);
        session.state = Some(state);
        self.set(session).await
    }

    /// Remember that the user was shown the rules of `chat_id` at `now`.
    pub async fn start_reading_rules(&self, user_id: i64, chat_id: i64, now: DateTime<Utc>) {
        let mut session = self.get(user_id).await;
        session.rules_chat_id = Some(chat_id);
        session.read_rules_start = Some(now);
        self.set(session).await
    }

    /// When the user started reading the rules of `chat_id`, if they still have to accept them.
    pub async fn rules_started(&self, user_id: i64, chat_id: i64) -> Option<DateTime<Utc>> {
        let session = self.get(user_id).await;
        session.read_rules_start.filter(|_| session.rules_chat_id == Some(chat_id))
    }

    /// Drop the pending rules of `chat_id`, keeping any settings edit in progress.
    pub async fn finish_reading_rules(&self, user_id: i64, chat_id: i64) {
        let mut session = self.get(user_id).await;
        if session.rules_chat_id != Some(chat_id) {
            return;
        }
        session.rules_chat_id = None;
        session.read_rules_start = None;
        if session == EditSession::new(user_id) {
            self.clear(user_id).await
        } else {
            self.set(session).await
        }
    }
}
