//! # chatwarden
//!
//! Moderation engine for group chats: restricted words, an embedding based
//! toxicity detector, link filtering, warn → mute escalation and role-aware
//! staff commands.
//!
//! ## Features
//!
//! - **Content safety**: restricted substrings, toxicity scoring and link whitelists per chat
//! - **Escalation**: warnings turn into timed mutes once a chat's threshold is reached
//! - **Newcomer rules**: joining members stay silent until they accept the chat rules
//! - **Staff commands**: `/mute`, `/ban`, `/warn` and their inverses with role exemptions
//! - **Notice throttling**: a spam window keeps the bot from answering every message of a flooder
//! - **Hot-reloaded configuration**: YAML, TOML or JSON `bot` file watched for changes
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use chatwarden::prelude::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ConfigurationManager::from_env();
//!     config.initialize().await?;
//!     let bot_config = config.get_bot_config().await;
//!
//!     let detector = Arc::new(ToxicityDetector::load(&bot_config.moderation.model_path)?);
//!     let engine = ModerationEngine::from_config(&bot_config, Arc::new(InMemoryStore::new()), detector);
//!
//!     let outcome = engine.handle_message(-100123, 42, "hello everyone").await?;
//!     assert!(!outcome.delete_message);
//!     Ok(())
//! }
//! ```

pub mod bot;
pub mod cache;
pub mod config;
pub mod error;
pub mod storage;
pub mod types;

// Re-export commonly used items
pub mod prelude {
    pub use crate::bot::commands::StaffCommand;
    pub use crate::bot::notices::{ChatNotice, Notice};
    pub use crate::bot::safety::{ContentSafetyEvaluator, SafetyVerdict, ViolationReason};
    pub use crate::bot::toxicity::{ToxicityDetector, ToxicityModel};
    pub use crate::bot::{CommandOutcome, Enforcement, MembershipOutcome, MessageOutcome, ModerationEngine};
    pub use crate::cache::{EditState, EphemeralCache, SessionStore, SpamWindow};
    pub use crate::config::{BotConfiguration, ConfigChangeEvent, ConfigurationManager};
    pub use crate::error::{ModerationError, Result};
    pub use crate::storage::{ChatSettingsService, ChatSettingsStore, InMemoryStore, ModerationStore};
    pub use crate::types::{
        Actor, ChatSettings, DurationSpec, MemberStatus, ModerationRecord, Permission, UserRole,
    };
}

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
