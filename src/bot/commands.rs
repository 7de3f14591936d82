// src/bot/commands.rs - Staff command parsing

use log::debug;
use std::fmt;

use crate::error::{ModerationError, Result};
use crate::types::{DurationSpec, Permission, UserRole};

const STAFF_ROLES: &[UserRole] = &[UserRole::Admin, UserRole::Owner];

/// Reason stored for a warning given without one
pub const DEFAULT_WARN_REASON: &str = "No reason given";

/// A moderation command typed by chat staff in reply to the target's message
#[derive(Debug, Clone, PartialEq)]
pub enum StaffCommand {
    Mute { duration: DurationSpec, reason: String },
    Unmute,
    Ban { duration: DurationSpec, reason: String },
    Unban,
    Warn { reason: String },
    Unwarn,
}

impl StaffCommand {
    /// Parse a command message.
    ///
    /// Returns `Ok(None)` for text that is not a staff command at all, and
    /// `InvalidFormat` for a staff command with bad arguments.
    pub fn parse(text: &str) -> Result<Option<Self>> {
        let text = text.trim();
        let Some(body) = text.strip_prefix('/') else {
            return Ok(None);
        };

        let mut parts = body.split_whitespace();
        let Some(word) = parts.next() else {
            return Ok(None);
        };
        // "/mute@chatwarden_bot" addresses the same command
        let name = word.split('@').next().unwrap_or(word).to_lowercase();

        let command = match name.as_str() {
            "mute" | "ban" => {
                let duration = parse_duration_arg(parts.next(), &name)?;
                let reason = rest_of_line(body, 2)
                    .ok_or_else(|| ModerationError::InvalidFormat(usage(&name).to_string()))?;

                if name == "mute" {
                    StaffCommand::Mute { duration, reason }
                } else {
                    StaffCommand::Ban { duration, reason }
                }
            }
            "warn" => StaffCommand::Warn {
                reason: rest_of_line(body, 1).unwrap_or_else(|| DEFAULT_WARN_REASON.to_string()),
            },
            "unmute" => StaffCommand::Unmute,
            "unban" => StaffCommand::Unban,
            "unwarn" => StaffCommand::Unwarn,
            _ => {
                debug!("Ignoring non-staff command /{}", name);
                return Ok(None);
            }
        };

        Ok(Some(command))
    }

    pub fn name(&self) -> &'static str {
        match self {
            StaffCommand::Mute { .. } => "mute",
            StaffCommand::Unmute => "unmute",
            StaffCommand::Ban { .. } => "ban",
            StaffCommand::Unban => "unban",
            StaffCommand::Warn { .. } => "warn",
            StaffCommand::Unwarn => "unwarn",
        }
    }

    pub fn required_roles(&self) -> &'static [UserRole] {
        STAFF_ROLES
    }

    pub fn required_permissions(&self) -> &'static [Permission] {
        match self {
            StaffCommand::Mute { .. }
            | StaffCommand::Unmute
            | StaffCommand::Ban { .. }
            | StaffCommand::Unban => &[Permission::BanMember],
            StaffCommand::Warn { .. } | StaffCommand::Unwarn => &[Permission::KickMember],
        }
    }

    /// Duration given on the command line, if the command takes one
    pub fn duration(&self) -> Option<&DurationSpec> {
        match self {
            StaffCommand::Mute { duration, .. } | StaffCommand::Ban { duration, .. } => Some(duration),
            _ => None,
        }
    }

    /// Whether the role exemption rule guards this command
    pub fn is_punishment(&self) -> bool {
        matches!(
            self,
            StaffCommand::Mute { .. } | StaffCommand::Ban { .. } | StaffCommand::Warn { .. }
        )
    }
}

impl fmt::Display for StaffCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StaffCommand::Mute { duration, reason } | StaffCommand::Ban { duration, reason } => {
                write!(f, "/{} {} {}", self.name(), duration, reason)
            }
            StaffCommand::Warn { reason } => write!(f, "/warn {}", reason),
            _ => write!(f, "/{}", self.name()),
        }
    }
}

fn usage(name: &str) -> &'static str {
    match name {
        "ban" => "Usage: /ban <duration> <reason>, e.g. /ban 1d spam",
        _ => "Usage: /mute <duration> <reason>, e.g. /mute 1h flood",
    }
}

fn parse_duration_arg(arg: Option<&str>, name: &str) -> Result<DurationSpec> {
    let arg = arg.ok_or_else(|| ModerationError::InvalidFormat(usage(name).to_string()))?;
    let duration = DurationSpec::parse(arg)?;
    if duration.is_zero() {
        return Err(ModerationError::InvalidFormat(format!(
            "Duration '{}' must be longer than zero",
            arg
        )));
    }
    Ok(duration)
}

/// Everything after the first `skip` whitespace-separated words, trimmed.
fn rest_of_line(body: &str, skip: usize) -> Option<String> {
    let mut rest = body.trim_start();
    for _ in 0..skip {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        rest = rest[end..].trim_start();
    }

    let rest = rest.trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
