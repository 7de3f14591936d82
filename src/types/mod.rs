// src/types/mod.rs - Core data model shared by the moderation systems

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod duration;
pub mod settings;

pub use duration::DurationSpec;
pub use settings::{
    ChatSafetyConfig, ChatSettings, LinkFilteringSettings, ModerationSettings, NotificationSettings,
    PunishmentPolicy, PunishmentType, ReadRulesSettings, RestrictedWordsSettings,
};

/// Role of a user inside one chat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    #[default]
    Member,
    Admin,
    Owner,
    Banned,
}

impl UserRole {
    pub fn is_staff(&self) -> bool {
        matches!(self, UserRole::Admin | UserRole::Owner)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Member => "member",
            UserRole::Admin => "admin",
            UserRole::Owner => "owner",
            UserRole::Banned => "banned",
        }
    }
}

impl fmt::Display for UserRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rights that can be required from the actor of a privileged action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ViewChannel,
    CreateMessage,
    DeleteMessage,
    KickMember,
    BanMember,
    ManageChannel,
}

/// Membership status as reported by the messaging platform.
///
/// Platforms describe members with different payload shapes; they are
/// folded into this enum once at the boundary and never inspected again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Kicked,
    Left,
}

/// Who performed a punishment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    System,
    User(i64),
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Actor::System => f.write_str("system"),
            Actor::User(id) => write!(f, "{}", id),
        }
    }
}

/// Audit data attached to an active mute or ban
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentMetadata {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
    /// Extra context, e.g. the verdict that triggered an automatic punishment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Per (user, chat) moderation state.
///
/// Expiries are checked lazily: a mute whose `mute_expires` lies in the
/// past is treated as absent and cleared the next time the record is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationRecord {
    pub user_id: i64,
    pub chat_id: i64,
    pub role: UserRole,
    pub warn_count: u32,
    pub mute_expires: Option<DateTime<Utc>>,
    pub ban_expires: Option<DateTime<Utc>>,
    pub mute_metadata: Option<PunishmentMetadata>,
    pub ban_metadata: Option<PunishmentMetadata>,
}

impl ModerationRecord {
    pub fn new(user_id: i64, chat_id: i64) -> Self {
        Self {
            user_id,
            chat_id,
            role: UserRole::Member,
            warn_count: 0,
            mute_expires: None,
            ban_expires: None,
            mute_metadata: None,
            ban_metadata: None,
        }
    }

    pub fn key(&self) -> RecordKey {
        RecordKey { user_id: self.user_id, chat_id: self.chat_id }
    }

    pub fn is_muted_at(&self, now: DateTime<Utc>) -> bool {
        self.mute_expires.map_or(false, |expires| expires > now)
    }

    pub fn is_banned_at(&self, now: DateTime<Utc>) -> bool {
        self.ban_expires.map_or(false, |expires| expires > now)
    }

    /// Drop mutes and bans that ran out before `now`. Returns true if anything changed.
    pub fn clear_expired(&mut self, now: DateTime<Utc>) -> bool {
        let mut changed = false;

        if self.mute_expires.is_some() && !self.is_muted_at(now) {
            self.mute_expires = None;
            self.mute_metadata = None;
            changed = true;
        }

        if self.ban_expires.is_some() && !self.is_banned_at(now) {
            self.ban_expires = None;
            self.ban_metadata = None;
            changed = true;
        }

        changed
    }
}

/// Identity of a moderation record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub user_id: i64,
    pub chat_id: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_new_record_is_clean() {
        let record = ModerationRecord::new(1, -100);
        assert_eq!(record.role, UserRole::Member);
        assert_eq!(record.warn_count, 0);
        assert!(!record.is_muted_at(Utc::now()));
        assert!(!record.is_banned_at(Utc::now()));
    }

    #[test]
    fn test_clear_expired() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        record.mute_expires = Some(now - Duration::seconds(1));
        record.mute_metadata = Some(PunishmentMetadata {
            reason: "spam".to_string(),
            actor: Actor::System,
            at: now - Duration::hours(1),
            detail: None,
        });
        record.ban_expires = Some(now + Duration::hours(1));

        assert!(!record.is_muted_at(now));
        assert!(record.is_banned_at(now));
        assert!(record.clear_expired(now));
        assert!(record.mute_expires.is_none());
        assert!(record.mute_metadata.is_none());
        assert!(record.ban_expires.is_some());
        assert!(!record.clear_expired(now));
    }

    #[test]
    fn test_role_serde() {
        assert_eq!(serde_json::to_string(&UserRole::Owner).unwrap(), "\"owner\"");
        let role: UserRole = serde_json::from_str("\"banned\"").unwrap();
        assert_eq!(role, UserRole::Banned);
        assert!(UserRole::Admin.is_staff());
        assert!(!UserRole::Banned.is_staff());
    }
}
