// src/bot/escalation.rs - Warn → mute → ban transitions on a moderation record
//
// Every transition is a pure function of the record, its inputs and the
// instant carried in the metadata. Loading, locking and saving the record is
// the caller's job.

use chrono::{DateTime, Utc};
use log::info;

use crate::error::{ModerationError, Result};
use crate::types::{Actor, DurationSpec, ModerationRecord, PunishmentMetadata, PunishmentPolicy};

/// Reason recorded when a warning limit triggers an automatic mute
pub const AUTOMATIC_MUTE_REASON: &str = "Use of restricted words";

impl PunishmentMetadata {
    pub fn new(reason: impl Into<String>, actor: Actor, at: DateTime<Utc>) -> Self {
        Self { reason: reason.into(), actor, at, detail: None }
    }

    pub fn system(at: DateTime<Utc>) -> Self {
        Self::new(AUTOMATIC_MUTE_REASON, Actor::System, at)
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WarnOutcome {
    /// The warning was recorded; `warn_count` is the new count
    Warned { warn_count: u32 },
    /// The warning reached the threshold and was converted into a mute
    AutoMuted { expires: DateTime<Utc>, duration: DurationSpec },
}

impl WarnOutcome {
    pub fn warned(&self) -> bool {
        matches!(self, WarnOutcome::Warned { .. })
    }

    pub fn auto_muted(&self) -> bool {
        matches!(self, WarnOutcome::AutoMuted { .. })
    }
}

/// Add a warning, or mute for `policy.duration` when this warning reaches the threshold.
pub fn warn(record: &mut ModerationRecord, policy: &PunishmentPolicy, metadata: PunishmentMetadata) -> WarnOutcome {
    let threshold = policy.warning_threshold;

    if threshold > 0 && record.warn_count + 1 >= threshold {
        let expires = mute(record, &policy.duration, metadata);
        info!(
            "User {} reached {} warnings in chat {}, muted until {}",
            record.user_id, threshold, record.chat_id, expires
        );
        return WarnOutcome::AutoMuted { expires, duration: policy.duration.clone() };
    }

    record.warn_count += 1;
    WarnOutcome::Warned { warn_count: record.warn_count }
}

/// Remove one warning. Returns the remaining count.
pub fn unwarn(record: &mut ModerationRecord) -> Result<u32> {
    if record.warn_count == 0 {
        return Err(ModerationError::NotInTargetState("User has no warnings".to_string()));
    }
    record.warn_count -= 1;
    Ok(record.warn_count)
}

/// Mute from `metadata.at` for `duration`. Clears pending warnings. Returns the expiry.
pub fn mute(record: &mut ModerationRecord, duration: &DurationSpec, metadata: PunishmentMetadata) -> DateTime<Utc> {
    let expires = duration.to_instant(metadata.at);
    record.mute_expires = Some(expires);
    record.mute_metadata = Some(metadata);
    record.warn_count = 0;
    expires
}

pub fn unmute(record: &mut ModerationRecord, now: DateTime<Utc>) -> Result<()> {
    let was_muted = record.is_muted_at(now);
    record.mute_expires = None;
    record.mute_metadata = None;

    if !was_muted {
        return Err(ModerationError::NotInTargetState("User is not muted".to_string()));
    }
    Ok(())
}

/// Ban from `metadata.at` for `duration`. Returns the expiry.
pub fn ban(record: &mut ModerationRecord, duration: &DurationSpec, metadata: PunishmentMetadata) -> DateTime<Utc> {
    let expires = duration.to_instant(metadata.at);
    record.ban_expires = Some(expires);
    record.ban_metadata = Some(metadata);
    expires
}

pub fn unban(record: &mut ModerationRecord, now: DateTime<Utc>) -> Result<()> {
    let was_banned = record.is_banned_at(now);
    record.ban_expires = None;
    record.ban_metadata = None;

    if !was_banned {
        return Err(ModerationError::NotInTargetState("User is not banned".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PunishmentType;
    use chrono::Duration;

    fn policy(threshold: u32) -> PunishmentPolicy {
        PunishmentPolicy {
            punishment_type: PunishmentType::Mute,
            duration: DurationSpec::parse("1h").unwrap(),
            warning_threshold: threshold,
        }
    }

    #[test]
    fn test_three_warnings_escalate_to_mute() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        let policy = policy(3);

        assert_eq!(warn(&mut record, &policy, PunishmentMetadata::system(now)), WarnOutcome::Warned { warn_count: 1 });
        assert_eq!(warn(&mut record, &policy, PunishmentMetadata::system(now)), WarnOutcome::Warned { warn_count: 2 });

        let third = warn(&mut record, &policy, PunishmentMetadata::system(now));
        assert!(third.auto_muted());
        assert_eq!(record.warn_count, 0);
        assert!(record.is_muted_at(now));
        assert_eq!(record.mute_expires, Some(now + Duration::hours(1)));
        assert_eq!(record.mute_metadata.as_ref().unwrap().reason, AUTOMATIC_MUTE_REASON);
        assert_eq!(record.mute_metadata.as_ref().unwrap().actor, Actor::System);
    }

    #[test]
    fn test_zero_threshold_never_escalates() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        for expected in 1..=10 {
            let outcome = warn(&mut record, &policy(0), PunishmentMetadata::system(now));
            assert_eq!(outcome, WarnOutcome::Warned { warn_count: expected });
        }
        assert!(!record.is_muted_at(now));
    }

    #[test]
    fn test_threshold_of_one_mutes_immediately() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        assert!(warn(&mut record, &policy(1), PunishmentMetadata::system(now)).auto_muted());
    }

    #[test]
    fn test_unwarn_floors_at_zero() {
        let mut record = ModerationRecord::new(1, -100);
        record.warn_count = 1;
        assert_eq!(unwarn(&mut record).unwrap(), 0);
        assert!(matches!(unwarn(&mut record), Err(ModerationError::NotInTargetState(_))));
        assert_eq!(record.warn_count, 0);
    }

    #[test]
    fn test_mute_and_unmute() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        record.warn_count = 2;

        let metadata = PunishmentMetadata::new("flood", Actor::User(99), now);
        let expires = mute(&mut record, &DurationSpec::parse("10m").unwrap(), metadata);
        assert_eq!(expires, now + Duration::minutes(10));
        assert_eq!(record.warn_count, 0);
        assert_eq!(record.mute_metadata.as_ref().unwrap().actor, Actor::User(99));

        assert!(unmute(&mut record, now).is_ok());
        assert!(record.mute_expires.is_none());
        assert!(matches!(unmute(&mut record, now), Err(ModerationError::NotInTargetState(_))));
    }

    #[test]
    fn test_unmute_of_expired_mute_reports_not_muted() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        mute(&mut record, &DurationSpec::parse("1m").unwrap(), PunishmentMetadata::system(now));

        let later = now + Duration::minutes(2);
        assert!(unmute(&mut record, later).is_err());
        assert!(record.mute_expires.is_none());
    }

    #[test]
    fn test_ban_is_independent_of_mute() {
        let now = Utc::now();
        let mut record = ModerationRecord::new(1, -100);
        record.warn_count = 1;
        mute(&mut record, &DurationSpec::parse("1h").unwrap(), PunishmentMetadata::system(now));
        ban(
            &mut record,
            &DurationSpec::parse("1d").unwrap(),
            PunishmentMetadata::new("offtopic", Actor::User(5), now).with_detail("manual"),
        );

        assert!(record.is_muted_at(now));
        assert!(record.is_banned_at(now));
        assert_eq!(record.ban_metadata.as_ref().unwrap().detail.as_deref(), Some("manual"));

        unban(&mut record, now).unwrap();
        assert!(record.is_muted_at(now));
        assert!(!record.is_banned_at(now));
        assert!(matches!(unban(&mut record, now), Err(ModerationError::NotInTargetState(_))));
    }
}
