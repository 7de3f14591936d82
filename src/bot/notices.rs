// src/bot/notices.rs - Chat messages announcing punishments

use chrono::Duration;
use std::fmt;

use crate::types::duration::humanize_span;
use crate::types::PunishmentType;

/// Text the bot posts in the chat after acting on a message
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The author got a warning and is `count` of `threshold` towards `punishment`
    Warned { count: u32, threshold: u32, punishment: PunishmentType },
    Muted { time_left: Duration },
    Banned { time_left: Duration },
    /// The author wrote while an earlier mute is still running
    AlreadyMuted { time_left: Duration },
    AlreadyBanned { time_left: Duration },
    /// A newcomer may only write after reading and accepting the rules at `url`
    ReadRules { url: String },
    RulesAccepted,
    Welcome,
    Farewell,
}

/// A notice addressed to a chat, optionally inside a forum thread
#[derive(Debug, Clone, PartialEq)]
pub struct ChatNotice {
    pub notice: Notice,
    pub thread_id: Option<i64>,
}

impl ChatNotice {
    pub fn new(notice: Notice, thread_id: Option<i64>) -> Self {
        Self { notice, thread_id }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Warned { count, threshold, punishment } => write!(
                f,
                "Your message broke the chat rules. Warning {}/{}, after that: {}.",
                count,
                threshold,
                punishment.as_str()
            ),
            Notice::Muted { time_left } => {
                write!(f, "You have been muted for {}.", humanize_span(*time_left))
            }
            Notice::Banned { time_left } => {
                write!(f, "You have been banned for {}.", humanize_span(*time_left))
            }
            Notice::AlreadyMuted { time_left } => {
                write!(f, "You are muted. Time left: {}.", humanize_span(*time_left))
            }
            Notice::AlreadyBanned { time_left } => {
                write!(f, "You are banned. Time left: {}.", humanize_span(*time_left))
            }
            Notice::ReadRules { url } => write!(
                f,
                "Welcome! Please read the chat rules at {} and accept them to start writing.",
                url
            ),
            Notice::RulesAccepted => f.write_str("Thanks for accepting the rules, you can write now."),
            Notice::Welcome => f.write_str("Welcome to the chat!"),
            Notice::Farewell => f.write_str("A member has left the chat."),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notice_text() {
        let warned = Notice::Warned { count: 1, threshold: 3, punishment: PunishmentType::Ban };
        assert_eq!(warned.to_string(), "Your message broke the chat rules. Warning 1/3, after that: ban.");

        let muted = Notice::Muted { time_left: Duration::minutes(30) };
        assert_eq!(muted.to_string(), "You have been muted for 30 minutes.");

        let banned = Notice::AlreadyBanned { time_left: Duration::hours(26) };
        assert_eq!(banned.to_string(), "You are banned. Time left: 1 day 2 hours.");

        let rules = Notice::ReadRules { url: "example-rule.com".to_string() };
        assert!(rules.to_string().contains("example-rule.com"));
    }
}
