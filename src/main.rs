// src/main.rs - chatwarden binary: loads configuration and the toxicity model, then
// moderates events read line by line from stdin

use anyhow::Result;
use log::{debug, error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::RwLock;

use chatwarden::prelude::*;

const RUST_LOG_ENV: &str = "RUST_LOG";

const USAGE: &str = "\
Events, one per line:
  msg <chat_id> <user_id> <text>
  cmd <chat_id> <actor_id> <target_id> </command args>
  join <chat_id> <user_id>
  left <chat_id> <user_id>
  rules <chat_id> <user_id>
  status <chat_id> <user_id> <member status>
  edit <user_id> <chat_id> <duration|whitelist-add|whitelist-delete>
  dm <user_id> <text>";

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let rust_log = std::env::var(RUST_LOG_ENV).ok();
    logger_builder(rust_log.as_deref()).init();
    if rust_log.is_none() {
        log::set_max_level(LevelFilter::Info);
    }

    info!("Starting chatwarden v{}", chatwarden::VERSION);

    let config_manager = Arc::new(ConfigurationManager::from_env());
    if let Err(e) = config_manager.initialize().await {
        error!("Failed to initialize configuration system: {}", e);
        return Err(e);
    }
    let bot_config = config_manager.get_bot_config().await;
    apply_log_level(&bot_config.core.log_level);

    // Without a model there is no moderation worth running
    let model_path = bot_config.moderation.model_path.clone();
    let detector = match ToxicityDetector::load(&model_path) {
        Ok(detector) => Arc::new(detector),
        Err(e) => {
            error!("Cannot start without the toxicity model at {}: {}", model_path.display(), e);
            return Err(e.into());
        }
    };
    info!(
        "Toxicity model loaded from {} (threshold {:.2})",
        model_path.display(),
        detector.base_threshold()
    );

    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(RwLock::new(ModerationEngine::from_config(
        &bot_config,
        store.clone(),
        detector.clone(),
    )));

    spawn_config_listener(config_manager.clone(), engine.clone(), store, detector, model_path);

    info!("{} is ready", bot_config.core.bot_name);
    println!("{}", USAGE);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let current = engine.read().await.clone();
                match handle_line(&current, line.trim()).await {
                    Ok(output) => println!("{}", output),
                    Err(e) if e.is_user_facing() => println!("{}", e),
                    Err(e) => error!("Failed to handle event '{}': {}", line, e),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    info!("chatwarden stopped");
    Ok(())
}

/// Rebuild the engine whenever the configuration file changes
fn spawn_config_listener(
    config_manager: Arc<ConfigurationManager>,
    engine: Arc<RwLock<ModerationEngine>>,
    store: Arc<InMemoryStore>,
    detector: Arc<ToxicityDetector>,
    model_path: PathBuf,
) {
    let mut changes = config_manager.subscribe_to_changes();
    tokio::spawn(async move {
        while let Ok(event) = changes.recv().await {
            match event {
                ConfigChangeEvent::BotConfigUpdated { file } => {
                    let bot_config = config_manager.get_bot_config().await;
                    if bot_config.moderation.model_path != model_path {
                        warn!("Model path changes take effect after a restart");
                    }
                    apply_log_level(&bot_config.core.log_level);
                    let mut current = engine.write().await;
                    *current = current.reconfigured(&bot_config, store.clone(), detector.clone());
                    info!("Applied configuration from {}", file);
                }
                ConfigChangeEvent::ValidationError { file, error } => {
                    warn!("Keeping previous configuration, {} is invalid: {}", file, error);
                }
                ConfigChangeEvent::ReloadComplete { files_updated } => {
                    debug!("Configuration reloaded: {:?}", files_updated);
                }
            }
        }
    });
}

/// Logger honouring `RUST_LOG` when set.
///
/// Without it the logger itself lets everything through and the level is
/// governed by `log::set_max_level`, so `core.log_level` can change it at runtime.
fn logger_builder(rust_log: Option<&str>) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    match rust_log {
        Some(filters) => builder.parse_filters(filters),
        None => builder.filter_level(LevelFilter::Trace),
    };
    builder
}

fn apply_log_level(level: &str) {
    // RUST_LOG wins over the configuration file
    if std::env::var(RUST_LOG_ENV).is_ok() {
        return;
    }
    match configured_level(level) {
        Some(filter) => log::set_max_level(filter),
        None => warn!("Unknown log level '{}', keeping the current one", level),
    }
}

fn configured_level(level: &str) -> Option<LevelFilter> {
    LevelFilter::from_str(level.trim()).ok()
}

async fn handle_line(engine: &ModerationEngine, line: &str) -> chatwarden::error::Result<String> {
    let mut words = line.splitn(2, ' ');
    let kind = words.next().unwrap_or_default();
    let rest = words.next().unwrap_or_default();

    match kind {
        "" => Ok(String::new()),
        "msg" => {
            let (ids, text) = split_ids::<2>(rest)?;
            let outcome = engine.handle_message(ids[0], ids[1], text).await?;
            Ok(describe_message(&outcome))
        }
        "cmd" => {
            let (ids, text) = split_ids::<3>(rest)?;
            let command = StaffCommand::parse(text)?
                .ok_or_else(|| ModerationError::InvalidFormat(format!("'{}' is not a staff command", text)))?;
            let outcome = engine.execute_staff_command(ids[0], ids[1], ids[2], &command).await?;
            Ok(match outcome.enforcement {
                Some(enforcement) => format!("{} [{:?}]", outcome.reply, enforcement),
                None => outcome.reply,
            })
        }
        "join" => {
            let (ids, _) = split_ids::<2>(rest)?;
            let outcome = engine.on_member_joined(ids[0], ids[1]).await?;
            Ok(format!("joined, {}", describe_membership(&outcome)))
        }
        "left" => {
            let (ids, _) = split_ids::<2>(rest)?;
            let outcome = engine.on_member_left(ids[0], ids[1]).await?;
            Ok(format!("left, {}", describe_membership(&outcome)))
        }
        "rules" => {
            let (ids, _) = split_ids::<2>(rest)?;
            let outcome = engine.accept_rules(ids[0], ids[1]).await?;
            Ok(format!("rules accepted, {}", describe_membership(&outcome)))
        }
        "status" => {
            let (ids, status) = split_ids::<2>(rest)?;
            let role = engine.on_role_changed(ids[0], ids[1], status).await?;
            Ok(format!("role: {:?}", role))
        }
        "edit" => {
            let (ids, what) = split_ids::<2>(rest)?;
            let state = match what {
                "duration" => EditState::RestrictedWordDuration,
                "whitelist-add" => EditState::LinkFilterAdd,
                "whitelist-delete" => EditState::LinkFilterDelete,
                other => {
                    return Err(ModerationError::InvalidFormat(format!("Unknown setting '{}'", other)));
                }
            };
            engine.begin_settings_edit(ids[0], ids[1], state).await?;
            Ok("Send the new value in a private message (dm <user_id> <value>)".to_string())
        }
        "dm" => {
            let (ids, text) = split_ids::<1>(rest)?;
            let reply = engine.handle_private_input(ids[0], text).await?;
            Ok(reply.unwrap_or_else(|| "Nothing to edit".to_string()))
        }
        other => Err(ModerationError::InvalidFormat(format!("Unknown event '{}'\n{}", other, USAGE))),
    }
}

/// Parse `N` leading integer ids and return them with the remaining text.
fn split_ids<const N: usize>(text: &str) -> chatwarden::error::Result<([i64; N], &str)> {
    let mut ids = [0i64; N];
    let mut rest = text.trim_start();

    for id in ids.iter_mut() {
        let end = rest.find(' ').unwrap_or(rest.len());
        *id = rest[..end]
            .parse()
            .map_err(|_| ModerationError::InvalidFormat(format!("Expected a numeric id, got '{}'", &rest[..end])))?;
        rest = rest[end..].trim_start();
    }

    Ok((ids, rest))
}

fn describe_message(outcome: &MessageOutcome) -> String {
    let verdict = match &outcome.verdict {
        Some(SafetyVerdict::Safe) => "safe".to_string(),
        Some(SafetyVerdict::Unsafe(reason)) => format!("unsafe ({})", reason),
        None => "author is punished".to_string(),
    };

    let mut parts = vec![verdict];
    if outcome.delete_message {
        parts.push("delete".to_string());
    }
    if let Some(enforcement) = &outcome.enforcement {
        parts.push(format!("{:?}", enforcement));
    }
    if let Some(notice) = &outcome.notice {
        parts.push(format!("notice: {}", notice));
    }
    parts.join(", ")
}

fn describe_membership(outcome: &MembershipOutcome) -> String {
    let mut parts = vec![format!("record removed: {}", outcome.record_removed)];
    if let Some(enforcement) = &outcome.enforcement {
        parts.push(format!("{:?}", enforcement));
    }
    if let Some(ChatNotice { notice, thread_id }) = &outcome.notice {
        match thread_id {
            Some(thread_id) => parts.push(format!("notice in thread {}: {}", thread_id, notice)),
            None => parts.push(format!("notice: {}", notice)),
        }
    }
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_ids() {
        let (ids, text) = split_ids::<2>("-100 42 hello there").unwrap();
        assert_eq!(ids, [-100, 42]);
        assert_eq!(text, "hello there");

        let (ids, text) = split_ids::<1>("7").unwrap();
        assert_eq!(ids, [7]);
        assert_eq!(text, "");

        assert!(split_ids::<2>("-100 abc").is_err());
    }

    #[test]
    fn test_logger_filters() {
        assert_eq!(logger_builder(None).build().filter(), LevelFilter::Trace);
        assert_eq!(logger_builder(Some("debug")).build().filter(), LevelFilter::Debug);
        assert_eq!(logger_builder(Some("warn,chatwarden=trace")).build().filter(), LevelFilter::Trace);
    }

    #[test]
    fn test_configured_level() {
        assert_eq!(configured_level("debug"), Some(LevelFilter::Debug));
        assert_eq!(configured_level("WARN"), Some(LevelFilter::Warn));
        assert_eq!(configured_level("loud"), None);
    }

    #[test]
    fn test_describe_message() {
        let outcome = MessageOutcome {
            verdict: Some(SafetyVerdict::Unsafe(ViolationReason::BadLink)),
            delete_message: true,
            enforcement: None,
            notice: None,
        };
        assert_eq!(describe_message(&outcome), "unsafe (bad-link), delete");
    }

    #[test]
    fn test_describe_membership() {
        let outcome = MembershipOutcome {
            enforcement: Some(Enforcement::RestrictUntilRulesAccepted),
            notice: Some(ChatNotice::new(Notice::Welcome, Some(4))),
            record_removed: false,
        };
        assert_eq!(
            describe_membership(&outcome),
            "record removed: false, RestrictUntilRulesAccepted, notice in thread 4: Welcome to the chat!"
        );
    }
}
