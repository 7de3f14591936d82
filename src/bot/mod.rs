// src/bot/mod.rs - Moderation engine: message pipeline, staff commands and membership events

use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::cache::{EditState, SessionStore, SpamWindow};
use crate::config::BotConfiguration;
use crate::error::{ModerationError, Result};
use crate::storage::{ChatSettingsService, ChatSettingsStore, ModerationStore};
use crate::types::duration::humanize_span;
use crate::types::{
    Actor, ChatSettings, DurationSpec, ModerationRecord, PunishmentMetadata, RecordKey, UserRole,
};

pub mod commands;
pub mod escalation;
pub mod notices;
pub mod permissions;
pub mod safety;
pub mod toxicity;

use commands::StaffCommand;
use escalation::WarnOutcome;
use notices::{ChatNotice, Notice};
use permissions::{authorize, check_exemption, normalize_member_status, DEFAULT_OWNER_MAX_PUNISHMENT_MINUTES};
use safety::{ContentSafetyEvaluator, SafetyVerdict};
use toxicity::ToxicityDetector;

/// How long a newcomer has to wait before the rules can be accepted
pub const RULES_READ_TIME_SECONDS: i64 = 20;

/// Restriction the transport layer must apply on the messaging platform
#[derive(Debug, Clone, PartialEq)]
pub enum Enforcement {
    /// Take away the right to send messages until `until`
    Restrict { until: DateTime<Utc> },
    /// Take away the right to send messages until the user accepts the chat rules
    RestrictUntilRulesAccepted,
    Ban { until: DateTime<Utc> },
    LiftRestriction,
    LiftBan,
}

/// What the transport layer should do with an inbound group message
#[derive(Debug, Clone, PartialEq)]
pub struct MessageOutcome {
    /// Safety verdict, or `None` when the author was already muted or banned
    pub verdict: Option<SafetyVerdict>,
    pub delete_message: bool,
    pub enforcement: Option<Enforcement>,
    pub notice: Option<Notice>,
}

impl MessageOutcome {
    fn allowed() -> Self {
        Self {
            verdict: Some(SafetyVerdict::Safe),
            delete_message: false,
            enforcement: None,
            notice: None,
        }
    }
}

/// Result of a staff command, to be replied to the actor
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub reply: String,
    pub enforcement: Option<Enforcement>,
}

/// What the transport layer should do after a member joined, left or accepted the rules
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MembershipOutcome {
    pub enforcement: Option<Enforcement>,
    pub notice: Option<ChatNotice>,
    /// The user's record was deleted
    pub record_removed: bool,
}

type LockMap = Arc<StdMutex<HashMap<RecordKey, Arc<Mutex<()>>>>>;

/// Exclusive access to one record. The lock entry is dropped with the last holder.
struct RecordGuard {
    key: RecordKey,
    locks: LockMap,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for RecordGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // waiters hold their own clone of the lock
        if locks.get(&self.key).map_or(false, |lock| Arc::strong_count(lock) == 1) {
            locks.remove(&self.key);
        }
    }
}

/// Per-chat moderation engine.
///
/// Invoked once per inbound event. Mutations of one (user, chat) record are
/// serialized through a per-key lock; different keys proceed independently.
#[derive(Clone)]
pub struct ModerationEngine {
    records: Arc<dyn ModerationStore>,
    settings: ChatSettingsService,
    evaluator: ContentSafetyEvaluator,
    spam: SpamWindow,
    sessions: SessionStore,
    record_locks: LockMap,
    owner_max: Duration,
}

impl ModerationEngine {
    pub fn new(
        records: Arc<dyn ModerationStore>,
        settings: ChatSettingsService,
        evaluator: ContentSafetyEvaluator,
    ) -> Self {
        Self {
            records,
            settings,
            evaluator,
            spam: SpamWindow::default(),
            sessions: SessionStore::new(),
            record_locks: Arc::new(StdMutex::new(HashMap::new())),
            owner_max: Duration::minutes(DEFAULT_OWNER_MAX_PUNISHMENT_MINUTES),
        }
    }

    /// Build an engine from the loaded bot configuration over one store.
    pub fn from_config<S>(config: &BotConfiguration, store: Arc<S>, detector: Arc<ToxicityDetector>) -> Self
    where
        S: ModerationStore + ChatSettingsStore + 'static,
    {
        let moderation = &config.moderation;
        let settings = ChatSettingsService::new(
            store.clone(),
            Duration::seconds(moderation.chat_cache_ttl_seconds),
            config.default_chat_settings.clone(),
        );
        let evaluator =
            ContentSafetyEvaluator::new(detector).with_threshold_adjust(moderation.toxicity_threshold_adjust);

        Self::new(store, settings, evaluator)
            .with_spam_window(SpamWindow::new(
                Duration::seconds(moderation.spam_window_seconds),
                moderation.spam_threshold,
            ))
            .with_owner_max(moderation.owner_max_punishment.to_span())
    }

    /// Engine for a changed configuration that keeps this one's editing sessions and record locks.
    pub fn reconfigured<S>(&self, config: &BotConfiguration, store: Arc<S>, detector: Arc<ToxicityDetector>) -> Self
    where
        S: ModerationStore + ChatSettingsStore + 'static,
    {
        let mut next = Self::from_config(config, store, detector);
        next.sessions = self.sessions.clone();
        next.record_locks = Arc::clone(&self.record_locks);
        next
    }

    pub fn with_spam_window(mut self, spam: SpamWindow) -> Self {
        self.spam = spam;
        self
    }

    pub fn with_owner_max(mut self, owner_max: Duration) -> Self {
        self.owner_max = owner_max;
        self
    }

    pub fn settings(&self) -> &ChatSettingsService {
        &self.settings
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn handle_message(&self, chat_id: i64, user_id: i64, text: &str) -> Result<MessageOutcome> {
        self.handle_message_at(chat_id, user_id, text, Utc::now()).await
    }

    /// Run one group message through the moderation pipeline.
    pub async fn handle_message_at(
        &self,
        chat_id: i64,
        user_id: i64,
        text: &str,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome> {
        let key = RecordKey { user_id, chat_id };
        let _guard = self.lock_record(key).await;
        let mut record = self.load_record(key, now).await?;

        if let Some(notice) = active_punishment_notice(&record, now) {
            debug!("User {} wrote in chat {} while punished", user_id, chat_id);
            return Ok(MessageOutcome {
                verdict: None,
                delete_message: true,
                enforcement: None,
                notice: self.throttle_notice(chat_id, user_id, notice, now).await,
            });
        }

        let settings = self.settings.get(chat_id).await?;
        let verdict = self.evaluator.evaluate(&settings, text);
        let reason = match &verdict {
            SafetyVerdict::Safe => return Ok(MessageOutcome::allowed()),
            SafetyVerdict::Unsafe(reason) => reason.clone(),
        };
        info!("Message of user {} in chat {} rejected: {}", user_id, chat_id, reason);

        let policy = &settings.restricted_words.punishment;
        let metadata = PunishmentMetadata::system(now).with_detail(reason.to_string());
        let outcome = escalation::warn(&mut record, policy, metadata);
        self.records.save(&record).await?;

        let (notice, enforcement) = match outcome {
            WarnOutcome::Warned { warn_count } => (
                Notice::Warned {
                    count: warn_count,
                    threshold: policy.warning_threshold,
                    punishment: policy.punishment_type,
                },
                None,
            ),
            WarnOutcome::AutoMuted { expires, .. } => {
                self.spam.clear(chat_id, user_id).await;
                (
                    Notice::Muted { time_left: expires - now },
                    member_enforcement(&record, Enforcement::Restrict { until: expires }),
                )
            }
        };

        Ok(MessageOutcome {
            verdict: Some(verdict),
            delete_message: true,
            enforcement,
            notice: self.throttle_notice(chat_id, user_id, notice, now).await,
        })
    }

    pub async fn execute_staff_command(
        &self,
        chat_id: i64,
        actor_id: i64,
        target_id: i64,
        command: &StaffCommand,
    ) -> Result<CommandOutcome> {
        self.execute_staff_command_at(chat_id, actor_id, target_id, command, Utc::now()).await
    }

    /// Apply a staff command to the author of the replied-to message.
    pub async fn execute_staff_command_at(
        &self,
        chat_id: i64,
        actor_id: i64,
        target_id: i64,
        command: &StaffCommand,
        now: DateTime<Utc>,
    ) -> Result<CommandOutcome> {
        let actor_role = self.role_of(chat_id, actor_id).await?;
        if !authorize(actor_role, Some(command.required_roles()), Some(command.required_permissions())) {
            warn!("User {} ({}) is not allowed to use /{} in chat {}", actor_id, actor_role, command.name(), chat_id);
            return Err(ModerationError::PermissionDenied(format!(
                "Only chat administrators can use /{}",
                command.name()
            )));
        }

        let key = RecordKey { user_id: target_id, chat_id };
        let _guard = self.lock_record(key).await;
        let mut record = self.load_record(key, now).await?;
        let actor = Actor::User(actor_id);

        // Only punishing commands are bounded by the target's role
        let duration = if command.is_punishment() {
            let requested = match command.duration() {
                Some(duration) => duration.clone(),
                None => self.settings.get(chat_id).await?.restricted_words.punishment.duration,
            };
            check_exemption(actor_role, record.role, &requested, self.owner_max)?
        } else {
            DurationSpec::zero()
        };

        let outcome = match command {
            StaffCommand::Mute { reason, .. } => {
                let expires = escalation::mute(&mut record, &duration, PunishmentMetadata::new(reason, actor, now));
                self.spam.clear(chat_id, target_id).await;
                CommandOutcome {
                    reply: format!("User {} muted for {}. Reason: {}", target_id, duration.humanize(), reason),
                    enforcement: member_enforcement(&record, Enforcement::Restrict { until: expires }),
                }
            }
            StaffCommand::Ban { reason, .. } => {
                let expires = escalation::ban(&mut record, &duration, PunishmentMetadata::new(reason, actor, now));
                CommandOutcome {
                    reply: format!("User {} banned for {}. Reason: {}", target_id, duration.humanize(), reason),
                    enforcement: member_enforcement(&record, Enforcement::Ban { until: expires }),
                }
            }
            StaffCommand::Warn { reason } => {
                let settings = self.settings.get(chat_id).await?;
                let mut policy = settings.restricted_words.punishment.clone();
                policy.duration = duration;

                match escalation::warn(&mut record, &policy, PunishmentMetadata::new(reason, actor, now)) {
                    WarnOutcome::Warned { warn_count } => CommandOutcome {
                        reply: format!(
                            "User {} warned ({}/{}). Reason: {}",
                            target_id, warn_count, policy.warning_threshold, reason
                        ),
                        enforcement: None,
                    },
                    WarnOutcome::AutoMuted { expires, duration } => {
                        self.spam.clear(chat_id, target_id).await;
                        CommandOutcome {
                            reply: format!(
                                "User {} muted for {}. Reason: {}",
                                target_id,
                                duration.humanize(),
                                reason
                            ),
                            enforcement: member_enforcement(&record, Enforcement::Restrict { until: expires }),
                        }
                    }
                }
            }
            StaffCommand::Unwarn => {
                let remaining = escalation::unwarn(&mut record)?;
                CommandOutcome {
                    reply: format!("Removed a warning from user {}, {} left", target_id, remaining),
                    enforcement: None,
                }
            }
            StaffCommand::Unmute => {
                escalation::unmute(&mut record, now)?;
                CommandOutcome {
                    reply: format!("User {} unmuted", target_id),
                    enforcement: member_enforcement(&record, Enforcement::LiftRestriction),
                }
            }
            StaffCommand::Unban => {
                escalation::unban(&mut record, now)?;
                CommandOutcome {
                    reply: format!("User {} unbanned", target_id),
                    enforcement: member_enforcement(&record, Enforcement::LiftBan),
                }
            }
        };

        self.records.save(&record).await?;
        info!("User {} applied {} to user {} in chat {}", actor_id, command, target_id, chat_id);
        Ok(outcome)
    }

    pub async fn on_member_joined(&self, chat_id: i64, user_id: i64) -> Result<MembershipOutcome> {
        self.on_member_joined_at(chat_id, user_id, Utc::now()).await
    }

    /// Register a joining user.
    ///
    /// A ban that is still running is re-applied. Otherwise a member of a chat
    /// with rules stays restricted until [`accept_rules`](Self::accept_rules).
    pub async fn on_member_joined_at(
        &self,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<MembershipOutcome> {
        let key = RecordKey { user_id, chat_id };
        let _guard = self.lock_record(key).await;
        let mut record = self.load_record(key, now).await?;

        if record.role == UserRole::Banned {
            record.role = UserRole::Member;
        }
        self.records.save(&record).await?;

        let settings = self.settings.get(chat_id).await?;
        let notifications = &settings.notifications;

        if let Some(until) = record.ban_expires.filter(|_| record.is_banned_at(now)) {
            info!("Banned user {} rejoined chat {}, ban runs until {}", user_id, chat_id, until);
            return Ok(MembershipOutcome {
                enforcement: Some(Enforcement::Ban { until }),
                notice: Some(ChatNotice::new(
                    Notice::Banned { time_left: until - now },
                    notifications.system_thread_id,
                )),
                record_removed: false,
            });
        }

        let rules = &settings.moderation.read_rules;
        if rules.enabled && record.role == UserRole::Member {
            debug!("User {} joined chat {}, waiting for them to accept the rules", user_id, chat_id);
            self.sessions.start_reading_rules(user_id, chat_id, now).await;
            return Ok(MembershipOutcome {
                enforcement: Some(Enforcement::RestrictUntilRulesAccepted),
                notice: Some(ChatNotice::new(
                    Notice::ReadRules { url: rules.url.clone() },
                    notifications.new_user_thread(),
                )),
                record_removed: false,
            });
        }

        Ok(MembershipOutcome {
            notice: notifications
                .new_user_notifications
                .then(|| ChatNotice::new(Notice::Welcome, notifications.new_user_thread())),
            ..Default::default()
        })
    }

    pub async fn accept_rules(&self, chat_id: i64, user_id: i64) -> Result<MembershipOutcome> {
        self.accept_rules_at(chat_id, user_id, Utc::now()).await
    }

    /// Lift the newcomer restriction once the user had time to read the rules.
    pub async fn accept_rules_at(
        &self,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<MembershipOutcome> {
        let Some(started) = self.sessions.rules_started(user_id, chat_id).await else {
            return Err(ModerationError::NotInTargetState(
                "There are no rules waiting for your acceptance".to_string(),
            ));
        };

        let ready_at = started + Duration::seconds(RULES_READ_TIME_SECONDS);
        if now < ready_at {
            return Err(ModerationError::NotInTargetState(format!(
                "Please read the rules first. You can accept them in {}",
                humanize_span(ready_at - now)
            )));
        }

        let key = RecordKey { user_id, chat_id };
        let _guard = self.lock_record(key).await;
        let record = self.load_record(key, now).await?;
        self.sessions.finish_reading_rules(user_id, chat_id).await;
        info!("User {} accepted the rules of chat {}", user_id, chat_id);

        // a mute given in the meantime keeps the user silent
        let enforcement = if record.is_muted_at(now) || record.is_banned_at(now) {
            None
        } else {
            member_enforcement(&record, Enforcement::LiftRestriction)
        };
        let settings = self.settings.get(chat_id).await?;

        Ok(MembershipOutcome {
            enforcement,
            notice: Some(ChatNotice::new(Notice::RulesAccepted, settings.notifications.new_user_thread())),
            record_removed: false,
        })
    }

    pub async fn on_member_left(&self, chat_id: i64, user_id: i64) -> Result<MembershipOutcome> {
        self.on_member_left_at(chat_id, user_id, Utc::now()).await
    }

    /// Forget a user who left. Records with a running ban are kept and get no farewell.
    pub async fn on_member_left_at(
        &self,
        chat_id: i64,
        user_id: i64,
        now: DateTime<Utc>,
    ) -> Result<MembershipOutcome> {
        let key = RecordKey { user_id, chat_id };
        let _guard = self.lock_record(key).await;
        self.spam.clear(chat_id, user_id).await;
        self.sessions.finish_reading_rules(user_id, chat_id).await;

        if self.is_banned(key, now).await? {
            debug!("Keeping record of banned user {} in chat {}", user_id, chat_id);
            return Ok(MembershipOutcome::default());
        }
        let record_removed = self.records.delete(user_id, chat_id).await?;

        let settings = self.settings.get(chat_id).await?;
        let notifications = &settings.notifications;
        Ok(MembershipOutcome {
            enforcement: None,
            notice: notifications
                .left_user_notifications
                .then(|| ChatNotice::new(Notice::Farewell, notifications.new_user_thread())),
            record_removed,
        })
    }

    /// Apply a membership status change reported by the platform.
    ///
    /// Returns the new role, or `None` when the status means the user left.
    pub async fn on_role_changed(&self, chat_id: i64, user_id: i64, status: &str) -> Result<Option<UserRole>> {
        let status = normalize_member_status(status)
            .ok_or_else(|| ModerationError::InvalidFormat(format!("Unknown member status '{}'", status)))?;

        let now = Utc::now();
        let key = RecordKey { user_id, chat_id };
        let _guard = self.lock_record(key).await;

        let Some(role) = status.role() else {
            self.spam.clear(chat_id, user_id).await;
            self.forget_unless_banned(key, now).await?;
            return Ok(None);
        };

        let mut record = self.load_record(key, now).await?;
        if record.role != role {
            info!("User {} in chat {} is now {}", user_id, chat_id, role);
            record.role = role;
        }
        self.records.save(&record).await?;
        Ok(Some(role))
    }

    /// Start editing the settings of `chat_id` in a private conversation.
    pub async fn begin_settings_edit(&self, user_id: i64, chat_id: i64, state: EditState) -> Result<()> {
        self.require_staff(chat_id, user_id).await?;
        self.sessions.begin_edit(user_id, chat_id, state).await;
        Ok(())
    }

    /// Apply an edit to a chat's settings on behalf of one of its staff members.
    pub async fn update_chat_settings<F>(&self, user_id: i64, chat_id: i64, edit: F) -> Result<ChatSettings>
    where
        F: FnOnce(&ChatSettings) -> Result<ChatSettings> + Send,
    {
        self.require_staff(chat_id, user_id).await?;
        self.settings.update(chat_id, edit).await
    }

    /// Handle free text sent to the bot in private.
    ///
    /// Returns the reply when the text completed a pending settings edit,
    /// `None` when the user has nothing pending. Invalid input keeps the
    /// edit pending so the user can try again.
    pub async fn handle_private_input(&self, user_id: i64, text: &str) -> Result<Option<String>> {
        let mut session = self.sessions.get(user_id).await;
        let (Some(state), Some(chat_id)) = (session.state, session.selected_chat_id) else {
            return Ok(None);
        };
        let text = text.trim();

        let reply = match state {
            EditState::RestrictedWordDuration => {
                let duration = DurationSpec::parse(text)?;
                if duration.is_zero() {
                    return Err(ModerationError::InvalidFormat(
                        "Punishment duration must be longer than zero".to_string(),
                    ));
                }
                let reply = format!("Punishment duration set to {}", duration.humanize());
                self.update_chat_settings(user_id, chat_id, move |s| Ok(s.with_punishment_duration(duration)))
                    .await?;
                reply
            }
            EditState::LinkFilterAdd => {
                self.update_chat_settings(user_id, chat_id, |s| s.with_whitelist_added(text)).await?;
                format!("{} added to the whitelist", text)
            }
            EditState::LinkFilterDelete => {
                self.update_chat_settings(user_id, chat_id, |s| s.with_whitelist_removed(text)).await?;
                format!("{} removed from the whitelist", text)
            }
        };

        session.state = None;
        self.sessions.set(session).await;
        Ok(Some(reply))
    }

    async fn require_staff(&self, chat_id: i64, user_id: i64) -> Result<()> {
        let role = self.role_of(chat_id, user_id).await?;
        if !role.is_staff() {
            return Err(ModerationError::PermissionDenied(
                "Only chat administrators can change its settings".to_string(),
            ));
        }
        Ok(())
    }

    /// Role of a user without creating a record for them.
    async fn role_of(&self, chat_id: i64, user_id: i64) -> Result<UserRole> {
        let record = self.records.load(user_id, chat_id).await?;
        Ok(record.map(|r| r.role).unwrap_or_default())
    }

    /// Load or create a record, dropping punishments that ran out.
    async fn load_record(&self, key: RecordKey, now: DateTime<Utc>) -> Result<ModerationRecord> {
        match self.records.load(key.user_id, key.chat_id).await? {
            Some(mut record) => {
                if record.clear_expired(now) {
                    debug!("Cleared expired punishments of user {} in chat {}", key.user_id, key.chat_id);
                    self.records.save(&record).await?;
                }
                Ok(record)
            }
            None => {
                let record = ModerationRecord::new(key.user_id, key.chat_id);
                self.records.save(&record).await?;
                Ok(record)
            }
        }
    }

    async fn is_banned(&self, key: RecordKey, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .records
            .load(key.user_id, key.chat_id)
            .await?
            .map_or(false, |record| record.is_banned_at(now)))
    }

    async fn forget_unless_banned(&self, key: RecordKey, now: DateTime<Utc>) -> Result<bool> {
        if self.is_banned(key, now).await? {
            debug!("Keeping record of banned user {} in chat {}", key.user_id, key.chat_id);
            return Ok(false);
        }
        Ok(self.records.delete(key.user_id, key.chat_id).await?)
    }

    async fn lock_record(&self, key: RecordKey) -> RecordGuard {
        let lock = {
            let mut locks = self.record_locks.lock().unwrap_or_else(PoisonError::into_inner);
            locks.entry(key).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
        };
        RecordGuard {
            key,
            locks: Arc::clone(&self.record_locks),
            guard: Some(lock.lock_owned().await),
        }
    }

    /// Emit `notice` unless the user already got enough of them within the spam window.
    async fn throttle_notice(&self, chat_id: i64, user_id: i64, notice: Notice, now: DateTime<Utc>) -> Option<Notice> {
        self.spam.sweep_at(now).await;
        if self.spam.is_spamming_at(chat_id, user_id, now).await {
            debug!("Suppressing notice for user {} in chat {}", user_id, chat_id);
            return None;
        }
        self.spam.increment_at(chat_id, user_id, now).await;
        Some(notice)
    }
}

fn active_punishment_notice(record: &ModerationRecord, now: DateTime<Utc>) -> Option<Notice> {
    if let Some(until) = record.ban_expires.filter(|_| record.is_banned_at(now)) {
        return Some(Notice::AlreadyBanned { time_left: until - now });
    }
    record
        .mute_expires
        .filter(|_| record.is_muted_at(now))
        .map(|until| Notice::AlreadyMuted { time_left: until - now })
}

/// The platform cannot restrict administrators or owners. Kicked users can still be banned.
fn member_enforcement(record: &ModerationRecord, enforcement: Enforcement) -> Option<Enforcement> {
    matches!(record.role, UserRole::Member | UserRole::Banned).then_some(enforcement)
}
