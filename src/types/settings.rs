// src/types/settings.rs - Per-chat moderation settings

use serde::{Deserialize, Serialize};

use crate::bot::safety::{is_link, normalize_link, whitelist_contains};
use crate::error::{ModerationError, Result};
use crate::types::DurationSpec;

/// Punishment applied once a user runs out of warnings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentType {
    Mute,
    Ban,
}

impl PunishmentType {
    pub fn toggled(&self) -> Self {
        match self {
            PunishmentType::Mute => PunishmentType::Ban,
            PunishmentType::Ban => PunishmentType::Mute,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PunishmentType::Mute => "mute",
            PunishmentType::Ban => "ban",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentPolicy {
    #[serde(rename = "type")]
    pub punishment_type: PunishmentType,
    #[serde(default)]
    pub duration: DurationSpec,
    /// Warnings before the punishment kicks in. Zero never escalates.
    #[serde(default = "default_warning_threshold")]
    pub warning_threshold: u32,
}

fn default_warning_threshold() -> u32 {
    3
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadRulesSettings {
    pub enabled: bool,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationSettings {
    pub enabled: bool,
    pub read_rules: ReadRulesSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSettings {
    pub new_user_notifications: bool,
    pub left_user_notifications: bool,
    #[serde(default)]
    pub system_thread_id: Option<i64>,
    #[serde(default)]
    pub new_user_thread_id: Option<i64>,
}

impl NotificationSettings {
    /// Thread for join and leave notices, falling back to the system thread
    pub fn new_user_thread(&self) -> Option<i64> {
        self.new_user_thread_id.or(self.system_thread_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RestrictedWordsSettings {
    pub enabled: bool,
    /// Literal substrings that are never allowed
    #[serde(default)]
    pub words: Vec<String>,
    pub punishment: PunishmentPolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkFilteringSettings {
    pub enabled: bool,
    pub block_all: bool,
    #[serde(default)]
    pub whitelist: Vec<String>,
}

/// Complete settings of one chat.
///
/// Values are immutable: every `with_*` edit returns a new value which the
/// caller persists as a whole.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatSettings {
    pub moderation: ModerationSettings,
    pub notifications: NotificationSettings,
    pub restricted_words: RestrictedWordsSettings,
    pub link_filtering: LinkFilteringSettings,
}

/// The part of [`ChatSettings`] the content safety evaluator reads.
pub type ChatSafetyConfig = ChatSettings;

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            moderation: ModerationSettings {
                enabled: false,
                read_rules: ReadRulesSettings {
                    enabled: false,
                    url: "example-rule.com".to_string(),
                },
            },
            notifications: NotificationSettings {
                new_user_notifications: true,
                left_user_notifications: true,
                system_thread_id: None,
                new_user_thread_id: None,
            },
            restricted_words: RestrictedWordsSettings {
                enabled: false,
                words: vec!["badword1".to_string(), "badword2".to_string()],
                punishment: PunishmentPolicy {
                    punishment_type: PunishmentType::Ban,
                    duration: DurationSpec::default(),
                    warning_threshold: 3,
                },
            },
            link_filtering: LinkFilteringSettings {
                enabled: false,
                block_all: false,
                whitelist: vec!["example.com".to_string(), "trustedsite.org".to_string()],
            },
        }
    }
}

impl ChatSettings {
    pub fn with_moderation_enabled(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.moderation.enabled = enabled;
        next
    }

    pub fn with_read_rules_enabled(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.moderation.read_rules.enabled = enabled;
        next
    }

    pub fn with_restricted_words_enabled(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.restricted_words.enabled = enabled;
        next
    }

    pub fn with_punishment_type_toggled(&self) -> Self {
        let mut next = self.clone();
        next.restricted_words.punishment.punishment_type =
            self.restricted_words.punishment.punishment_type.toggled();
        next
    }

    pub fn with_punishment_duration(&self, duration: DurationSpec) -> Self {
        let mut next = self.clone();
        next.restricted_words.punishment.duration = duration;
        next
    }

    pub fn with_warning_threshold(&self, threshold: u32) -> Self {
        let mut next = self.clone();
        next.restricted_words.punishment.warning_threshold = threshold;
        next
    }

    pub fn with_link_filter_enabled(&self, enabled: bool) -> Self {
        let mut next = self.clone();
        next.link_filtering.enabled = enabled;
        next
    }

    pub fn with_block_all(&self, block_all: bool) -> Self {
        let mut next = self.clone();
        next.link_filtering.block_all = block_all;
        next
    }

    pub fn with_word_added(&self, word: &str) -> Result<Self> {
        let word = word.trim();
        if word.is_empty() {
            return Err(ModerationError::InvalidFormat("Restricted word cannot be empty".to_string()));
        }
        if self.restricted_words.words.iter().any(|w| w == word) {
            return Err(ModerationError::NotInTargetState(format!("'{}' is already restricted", word)));
        }

        let mut next = self.clone();
        next.restricted_words.words.push(word.to_string());
        Ok(next)
    }

    pub fn with_word_removed(&self, word: &str) -> Result<Self> {
        let word = word.trim();
        if !self.restricted_words.words.iter().any(|w| w == word) {
            return Err(ModerationError::NotInTargetState(format!("'{}' is not restricted", word)));
        }

        let mut next = self.clone();
        next.restricted_words.words.retain(|w| w != word);
        Ok(next)
    }

    pub fn with_whitelist_added(&self, link: &str) -> Result<Self> {
        let link = link.trim();
        if !is_link(link) {
            return Err(ModerationError::InvalidFormat(format!("'{}' is not a valid link", link)));
        }
        if whitelist_contains(link, &self.link_filtering.whitelist) {
            return Err(ModerationError::NotInTargetState(format!("'{}' is already whitelisted", link)));
        }

        let mut next = self.clone();
        next.link_filtering.whitelist.push(link.to_string());
        Ok(next)
    }

    pub fn with_whitelist_removed(&self, link: &str) -> Result<Self> {
        let link = link.trim();
        if !is_link(link) {
            return Err(ModerationError::InvalidFormat(format!("'{}' is not a valid link", link)));
        }
        if !whitelist_contains(link, &self.link_filtering.whitelist) {
            return Err(ModerationError::NotInTargetState(format!("'{}' is not whitelisted", link)));
        }

        let normalized = normalize_link(link);
        let mut next = self.clone();
        next.link_filtering.whitelist.retain(|entry| normalize_link(entry) != normalized);
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_roundtrip_through_yaml() {
        let settings = ChatSettings::default();
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(yaml.contains("type: ban"));
        assert!(yaml.contains("duration: 30m"));
        let parsed: ChatSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, settings);
    }

    #[test]
    fn test_punishment_defaults_when_omitted() {
        let policy: PunishmentPolicy = serde_json::from_str(r#"{"type": "mute"}"#).unwrap();
        assert_eq!(policy.punishment_type, PunishmentType::Mute);
        assert_eq!(policy.duration.to_string(), "30m");
        assert_eq!(policy.warning_threshold, 3);

        let bad = serde_json::from_str::<PunishmentPolicy>(r#"{"type": "mute", "duration": "forever"}"#);
        assert!(bad.is_err());
    }

    #[test]
    fn test_toggles_leave_original_untouched() {
        let original = ChatSettings::default();
        let enabled = original.with_moderation_enabled(true).with_restricted_words_enabled(true);

        assert!(!original.moderation.enabled);
        assert!(enabled.moderation.enabled);
        assert!(enabled.restricted_words.enabled);

        let toggled = original.with_punishment_type_toggled();
        assert_eq!(toggled.restricted_words.punishment.punishment_type, PunishmentType::Mute);
        assert_eq!(original.restricted_words.punishment.punishment_type, PunishmentType::Ban);
    }

    #[test]
    fn test_whitelist_edits() {
        let settings = ChatSettings::default();

        let added = settings.with_whitelist_added("https://rust-lang.org/").unwrap();
        assert_eq!(added.link_filtering.whitelist.len(), 3);

        let dup = added.with_whitelist_added("rust-lang.org");
        assert!(matches!(dup, Err(ModerationError::NotInTargetState(_))));

        let invalid = settings.with_whitelist_added("not a link");
        assert!(matches!(invalid, Err(ModerationError::InvalidFormat(_))));

        let removed = added.with_whitelist_removed("http://rust-lang.org").unwrap();
        assert_eq!(removed.link_filtering.whitelist, settings.link_filtering.whitelist);

        let missing = settings.with_whitelist_removed("unknown.net");
        assert!(matches!(missing, Err(ModerationError::NotInTargetState(_))));
    }

    #[test]
    fn test_word_edits() {
        let settings = ChatSettings::default();
        let added = settings.with_word_added("  spoiler ").unwrap();
        assert!(added.restricted_words.words.contains(&"spoiler".to_string()));
        assert!(added.with_word_added("spoiler").is_err());
        assert!(settings.with_word_added("   ").is_err());

        let removed = added.with_word_removed("badword1").unwrap();
        assert_eq!(removed.restricted_words.words, vec!["badword2".to_string(), "spoiler".to_string()]);
        assert!(removed.with_word_removed("badword1").is_err());
    }
}
