// src/config/mod.rs - Bot configuration loading, validation and hot reload

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::sync::{broadcast, RwLock};
use tokio::time::Duration;

use crate::bot::safety::is_link;
use crate::types::{ChatSettings, DurationSpec};

/// Directory holding `bot.yaml`
pub const CONFIG_DIR_ENV: &str = "CHATWARDEN_CONFIG_DIR";
/// Overrides `moderation.model_path`
pub const MODEL_PATH_ENV: &str = "CHATWARDEN_MODEL_PATH";

const DEFAULT_CONFIG_DIR: &str = "config";
const CONFIG_FILE_STEM: &str = "bot";
const LOG_LEVELS: &[&str] = &["error", "warn", "info", "debug", "trace", "off"];

/// Owns the bot configuration file and keeps the loaded copy current
#[derive(Clone)]
pub struct ConfigurationManager {
    config_dir: PathBuf,
    bot_config: Arc<RwLock<BotConfiguration>>,

    /// Kept alive for as long as the manager lives
    watchers: Arc<RwLock<Vec<RecommendedWatcher>>>,

    change_notifier: broadcast::Sender<ConfigChangeEvent>,
    validator: Arc<ConfigValidator>,
    last_reload: Arc<RwLock<std::time::Instant>>,
}

/// Events broadcasted when configuration changes
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChangeEvent {
    BotConfigUpdated { file: String },
    ValidationError { file: String, error: String },
    ReloadComplete { files_updated: Vec<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfiguration {
    pub version: String,
    pub description: String,
    pub last_updated: DateTime<Utc>,

    pub core: CoreBotSettings,

    #[serde(default)]
    pub moderation: ModerationConfig,

    /// Settings given to group chats the bot has not seen before
    #[serde(default)]
    pub default_chat_settings: ChatSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreBotSettings {
    pub bot_name: String,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModerationConfig {
    /// Toxicity model artifact (JSON, optionally gzip-compressed)
    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_spam_window_seconds")]
    pub spam_window_seconds: i64,

    /// Notices per window before further ones are suppressed
    #[serde(default = "default_spam_threshold")]
    pub spam_threshold: u32,

    /// Cap on punishments one owner gives another
    #[serde(default = "default_owner_max_punishment")]
    pub owner_max_punishment: DurationSpec,

    #[serde(default = "default_chat_cache_ttl_seconds")]
    pub chat_cache_ttl_seconds: i64,

    /// Added to the model's base threshold
    #[serde(default)]
    pub toxicity_threshold_adjust: f64,
}

fn default_model_path() -> PathBuf {
    PathBuf::from("models/toxicity.json.gz")
}

fn default_spam_window_seconds() -> i64 {
    crate::cache::spam::DEFAULT_SPAM_WINDOW_SECONDS
}

fn default_spam_threshold() -> u32 {
    crate::cache::spam::DEFAULT_SPAM_THRESHOLD
}

fn default_owner_max_punishment() -> DurationSpec {
    DurationSpec::from_span(chrono::Duration::minutes(
        crate::bot::permissions::DEFAULT_OWNER_MAX_PUNISHMENT_MINUTES,
    ))
}

fn default_chat_cache_ttl_seconds() -> i64 {
    120
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            model_path: default_model_path(),
            spam_window_seconds: default_spam_window_seconds(),
            spam_threshold: default_spam_threshold(),
            owner_max_punishment: default_owner_max_punishment(),
            chat_cache_ttl_seconds: default_chat_cache_ttl_seconds(),
            toxicity_threshold_adjust: 0.0,
        }
    }
}

impl Default for BotConfiguration {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "chatwarden group moderation".to_string(),
            last_updated: Utc::now(),
            core: CoreBotSettings {
                bot_name: "chatwarden".to_string(),
                log_level: "info".to_string(),
            },
            moderation: ModerationConfig::default(),
            default_chat_settings: ChatSettings::default(),
        }
    }
}

/// On-disk encodings, picked by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Toml,
    Json,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|ext| ext.to_str())? {
            "yaml" | "yml" => Some(ConfigFormat::Yaml),
            "toml" => Some(ConfigFormat::Toml),
            "json" => Some(ConfigFormat::Json),
            _ => None,
        }
    }

    pub fn parse(&self, content: &str) -> Result<BotConfiguration> {
        let config = match self {
            ConfigFormat::Yaml => serde_yaml::from_str(content)?,
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        Ok(config)
    }

    pub fn render(&self, config: &BotConfiguration) -> Result<String> {
        let content = match self {
            ConfigFormat::Yaml => serde_yaml::to_string(config)?,
            ConfigFormat::Toml => toml::to_string_pretty(config)?,
            ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        };
        Ok(content)
    }
}

/// Configuration validator
#[derive(Default)]
pub struct ConfigValidator;

impl ConfigValidator {
    pub fn new() -> Self {
        Self
    }

    pub fn validate_bot_config(&self, config: &BotConfiguration) -> Result<()> {
        if config.version.is_empty() {
            return Err(anyhow::anyhow!("Version cannot be empty"));
        }

        if config.core.bot_name.trim().is_empty() {
            return Err(anyhow::anyhow!("core.bot_name cannot be empty"));
        }
        if !LOG_LEVELS.contains(&config.core.log_level.to_lowercase().as_str()) {
            return Err(anyhow::anyhow!(
                "core.log_level must be one of {:?}, got '{}'",
                LOG_LEVELS,
                config.core.log_level
            ));
        }

        self.validate_moderation(&config.moderation)?;
        self.validate_chat_settings(&config.default_chat_settings)?;
        Ok(())
    }

    fn validate_moderation(&self, moderation: &ModerationConfig) -> Result<()> {
        if moderation.model_path.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("moderation.model_path cannot be empty"));
        }
        if moderation.spam_window_seconds <= 0 {
            return Err(anyhow::anyhow!("moderation.spam_window_seconds must be positive"));
        }
        if moderation.spam_threshold == 0 {
            return Err(anyhow::anyhow!("moderation.spam_threshold must be at least 1"));
        }
        if moderation.chat_cache_ttl_seconds <= 0 {
            return Err(anyhow::anyhow!("moderation.chat_cache_ttl_seconds must be positive"));
        }
        if moderation.owner_max_punishment.is_zero() {
            return Err(anyhow::anyhow!("moderation.owner_max_punishment cannot be zero"));
        }

        let adjust = moderation.toxicity_threshold_adjust;
        if !adjust.is_finite() || !(-1.0..=1.0).contains(&adjust) {
            return Err(anyhow::anyhow!(
                "moderation.toxicity_threshold_adjust must be within [-1, 1], got {}",
                adjust
            ));
        }
        Ok(())
    }

    pub fn validate_chat_settings(&self, settings: &ChatSettings) -> Result<()> {
        if settings.restricted_words.punishment.duration.is_zero() {
            return Err(anyhow::anyhow!("Punishment duration cannot be zero"));
        }

        if let Some(word) = settings.restricted_words.words.iter().find(|w| w.trim().is_empty()) {
            return Err(anyhow::anyhow!("Restricted word '{}' is blank", word));
        }

        for link in &settings.link_filtering.whitelist {
            if !is_link(link) {
                return Err(anyhow::anyhow!("Whitelist entry '{}' is not a link", link));
            }
        }
        Ok(())
    }
}

impl ConfigurationManager {
    pub fn new<P: AsRef<Path>>(config_dir: P) -> Self {
        let (tx, _) = broadcast::channel(100);

        Self {
            config_dir: config_dir.as_ref().to_path_buf(),
            bot_config: Arc::new(RwLock::new(BotConfiguration::default())),
            watchers: Arc::new(RwLock::new(Vec::new())),
            change_notifier: tx,
            validator: Arc::new(ConfigValidator::new()),
            last_reload: Arc::new(RwLock::new(std::time::Instant::now())),
        }
    }

    /// Manager for `$CHATWARDEN_CONFIG_DIR`, or `./config` when unset
    pub fn from_env() -> Self {
        let dir = std::env::var(CONFIG_DIR_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_DIR.to_string());
        Self::new(dir)
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// Load the configuration and start watching it for changes
    pub async fn initialize(&self) -> Result<()> {
        self.load().await?;
        self.setup_file_watchers().await?;

        info!("Configuration manager initialized successfully");
        Ok(())
    }

    /// Load the configuration file, creating it from defaults when missing.
    pub async fn load(&self) -> Result<()> {
        if !self.config_dir.exists() {
            fs::create_dir_all(&self.config_dir).await?;
            info!("Created configuration directory: {}", self.config_dir.display());
        }

        let loaded = match self.find_config_file() {
            Some(path) => {
                Self::reload_bot_config(&path, &self.bot_config, &self.validator).await?;
                path
            }
            None => {
                warn!("No bot configuration found in {}, using defaults", self.config_dir.display());
                self.create_default_bot_config().await?
            }
        };

        let mut config = self.bot_config.write().await;
        apply_env_overrides(&mut config);
        drop(config);

        let _ = self.change_notifier.send(ConfigChangeEvent::ReloadComplete {
            files_updated: vec![file_label(&loaded)],
        });
        Ok(())
    }

    /// Re-read the configuration file and broadcast the outcome.
    pub async fn reload(&self) -> Result<()> {
        let path = self
            .find_config_file()
            .ok_or_else(|| anyhow::anyhow!("No bot configuration in {}", self.config_dir.display()))?;
        Self::handle_change(&path, &self.bot_config, &self.validator, &self.change_notifier).await
    }

    pub async fn get_bot_config(&self) -> BotConfiguration {
        self.bot_config.read().await.clone()
    }

    pub fn subscribe_to_changes(&self) -> broadcast::Receiver<ConfigChangeEvent> {
        self.change_notifier.subscribe()
    }

    /// Validate and persist a new configuration in the format of the existing file.
    pub async fn save_bot_config(&self, mut config: BotConfiguration) -> Result<()> {
        self.validator.validate_bot_config(&config)?;
        config.last_updated = Utc::now();

        let path = self
            .find_config_file()
            .unwrap_or_else(|| self.config_dir.join(format!("{}.yaml", CONFIG_FILE_STEM)));
        let format = ConfigFormat::from_path(&path).unwrap_or(ConfigFormat::Yaml);
        fs::write(&path, format.render(&config)?).await?;

        *self.bot_config.write().await = config;
        let _ = self.change_notifier.send(ConfigChangeEvent::BotConfigUpdated { file: file_label(&path) });
        info!("Saved bot configuration to {}", path.display());
        Ok(())
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        ["yaml", "yml", "toml", "json"]
            .iter()
            .map(|ext| self.config_dir.join(format!("{}.{}", CONFIG_FILE_STEM, ext)))
            .find(|path| path.exists())
    }

    async fn create_default_bot_config(&self) -> Result<PathBuf> {
        let config = BotConfiguration::default();
        let config_path = self.config_dir.join(format!("{}.yaml", CONFIG_FILE_STEM));
        fs::write(&config_path, ConfigFormat::Yaml.render(&config)?).await?;

        *self.bot_config.write().await = config;
        info!("Created default bot configuration: {}", config_path.display());
        Ok(config_path)
    }

    async fn setup_file_watchers(&self) -> Result<()> {
        let config_dir = self.config_dir.clone();
        let change_notifier = self.change_notifier.clone();
        let bot_config = self.bot_config.clone();
        let validator = self.validator.clone();
        let last_reload = self.last_reload.clone();

        let (tx, mut rx) = tokio::sync::mpsc::channel(100);

        let mut watcher = notify::recommended_watcher(move |res: std::result::Result<Event, notify::Error>| {
            if let Ok(event) = res {
                if let Err(e) = tx.blocking_send(event) {
                    error!("Failed to send file watch event: {}", e);
                }
            }
        })?;

        watcher.watch(&config_dir, RecursiveMode::NonRecursive)?;
        self.watchers.write().await.push(watcher);

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if !matches!(event.kind, EventKind::Modify(_)) {
                    continue;
                }

                // Editors write several events per save
                {
                    let now = std::time::Instant::now();
                    let last = *last_reload.read().await;
                    if now.duration_since(last) < Duration::from_millis(500) {
                        continue;
                    }
                    *last_reload.write().await = now;
                }

                for path in event.paths {
                    if !is_config_file(&path) {
                        debug!("Ignoring change to non-config file: {}", path.display());
                        continue;
                    }

                    info!("Bot configuration file changed, reloading...");
                    // The error is already broadcast and logged
                    let _ = Self::handle_change(&path, &bot_config, &validator, &change_notifier).await;
                }
            }
        });

        info!("File watcher set up for {}", self.config_dir.display());
        Ok(())
    }

    async fn handle_change(
        path: &Path,
        bot_config: &Arc<RwLock<BotConfiguration>>,
        validator: &Arc<ConfigValidator>,
        change_notifier: &broadcast::Sender<ConfigChangeEvent>,
    ) -> Result<()> {
        let file = file_label(path);

        match Self::reload_bot_config(path, bot_config, validator).await {
            Ok(()) => {
                apply_env_overrides(&mut *bot_config.write().await);
                let _ = change_notifier.send(ConfigChangeEvent::BotConfigUpdated { file });
                Ok(())
            }
            Err(e) => {
                error!("Failed to reload bot config: {}", e);
                let _ = change_notifier.send(ConfigChangeEvent::ValidationError {
                    file,
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Parse and validate `path`; the loaded copy is only replaced when both succeed.
    async fn reload_bot_config(
        path: &Path,
        bot_config: &Arc<RwLock<BotConfiguration>>,
        validator: &Arc<ConfigValidator>,
    ) -> Result<()> {
        let format = ConfigFormat::from_path(path)
            .ok_or_else(|| anyhow::anyhow!("Unsupported configuration format: {}", path.display()))?;

        let content = fs::read_to_string(path).await?;
        let config = format.parse(&content)?;
        validator.validate_bot_config(&config)?;

        *bot_config.write().await = config;
        debug!("Loaded bot configuration from {}", path.display());
        Ok(())
    }
}

fn is_config_file(path: &Path) -> bool {
    path.file_stem().and_then(|stem| stem.to_str()) == Some(CONFIG_FILE_STEM)
        && ConfigFormat::from_path(path).is_some()
}

fn file_label(path: &Path) -> String {
    path.file_name()
        .and_then(|name| name.to_str())
        .unwrap_or_default()
        .to_string()
}

fn apply_env_overrides(config: &mut BotConfiguration) {
    if let Ok(model_path) = std::env::var(MODEL_PATH_ENV) {
        if !model_path.is_empty() {
            debug!("Model path overridden by {}", MODEL_PATH_ENV);
            config.moderation.model_path = PathBuf::from(model_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_config_is_created_from_defaults() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigurationManager::new(dir.path().join("conf"));
        let mut events = manager.subscribe_to_changes();

        manager.load().await.unwrap();

        assert!(dir.path().join("conf/bot.yaml").exists());
        let config = manager.get_bot_config().await;
        assert_eq!(config.moderation.spam_window_seconds, 120);
        assert_eq!(config.moderation.spam_threshold, 2);
        assert_eq!(config.moderation.owner_max_punishment.to_string(), "30m");
        assert_eq!(config.default_chat_settings, ChatSettings::default());
        assert_eq!(
            events.recv().await.unwrap(),
            ConfigChangeEvent::ReloadComplete { files_updated: vec!["bot.yaml".to_string()] }
        );
    }

    #[tokio::test]
    async fn test_moderation_section_defaults() {
        let dir = TempDir::new().unwrap();
        let yaml = r#"
version: "2.0"
description: test
last_updated: 2024-01-01T00:00:00Z
core:
  bot_name: warden
  log_level: debug
moderation:
  spam_threshold: 5
"#;
        std::fs::write(dir.path().join("bot.yaml"), yaml).unwrap();

        let manager = ConfigurationManager::new(dir.path());
        manager.load().await.unwrap();

        let config = manager.get_bot_config().await;
        assert_eq!(config.core.bot_name, "warden");
        assert_eq!(config.moderation.spam_threshold, 5);
        assert_eq!(config.moderation.chat_cache_ttl_seconds, 120);
        assert_eq!(config.default_chat_settings.restricted_words.punishment.warning_threshold, 3);
    }

    #[tokio::test]
    async fn test_json_config_is_accepted() {
        let dir = TempDir::new().unwrap();
        let config = BotConfiguration::default();
        std::fs::write(dir.path().join("bot.json"), serde_json::to_string(&config).unwrap()).unwrap();

        let manager = ConfigurationManager::new(dir.path());
        manager.load().await.unwrap();
        assert!(!dir.path().join("bot.yaml").exists());
        assert_eq!(manager.get_bot_config().await.core.bot_name, "chatwarden");
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = BotConfiguration::default();
        let rendered = ConfigFormat::Toml.render(&config).unwrap();
        let parsed = ConfigFormat::Toml.parse(&rendered).unwrap();
        assert_eq!(parsed.default_chat_settings, config.default_chat_settings);
        assert_eq!(ConfigFormat::from_path(Path::new("bot.yml")), Some(ConfigFormat::Yaml));
        assert_eq!(ConfigFormat::from_path(Path::new("bot.ini")), None);
    }

    #[test]
    fn test_validator_rejects_bad_values() {
        let validator = ConfigValidator::new();
        assert!(validator.validate_bot_config(&BotConfiguration::default()).is_ok());

        let mut config = BotConfiguration::default();
        config.core.log_level = "loud".to_string();
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.default_chat_settings = config.default_chat_settings.with_punishment_duration(DurationSpec::zero());
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.default_chat_settings.link_filtering.whitelist.push("not a link".to_string());
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.toxicity_threshold_adjust = 2.0;
        assert!(validator.validate_bot_config(&config).is_err());

        let mut config = BotConfiguration::default();
        config.moderation.spam_threshold = 0;
        assert!(validator.validate_bot_config(&config).is_err());
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_previous_config() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigurationManager::new(dir.path());
        manager.load().await.unwrap();
        let mut events = manager.subscribe_to_changes();

        let mut broken = BotConfiguration::default();
        broken.moderation.spam_window_seconds = 0;
        std::fs::write(dir.path().join("bot.yaml"), serde_yaml::to_string(&broken).unwrap()).unwrap();

        assert!(manager.reload().await.is_err());
        assert_eq!(manager.get_bot_config().await.moderation.spam_window_seconds, 120);
        assert!(matches!(events.recv().await.unwrap(), ConfigChangeEvent::ValidationError { .. }));
    }

    #[tokio::test]
    async fn test_save_then_reload() {
        let dir = TempDir::new().unwrap();
        let manager = ConfigurationManager::new(dir.path());
        manager.load().await.unwrap();

        let mut config = manager.get_bot_config().await;
        config.moderation.spam_threshold = 4;
        manager.save_bot_config(config).await.unwrap();

        manager.reload().await.unwrap();
        assert_eq!(manager.get_bot_config().await.moderation.spam_threshold, 4);
    }
}
