//! Configuration management for Leadgate.
//!
//! Provides configuration loading from TOML files with support for
//! multiple file locations, environment variable overrides for secrets,
//! and sensible defaults for every pipeline knob.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file '{path}': {source}")]
    IoError {
        /// Path to the configuration file that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the configuration file as TOML.
    #[error("failed to parse config file '{path}': {source}")]
    ParseError {
        /// Path to the configuration file that could not be parsed.
        path: PathBuf,
        /// The underlying TOML parse error.
        source: toml::de::Error,
    },
}

/// When the idempotency mark is written relative to the outer transaction.
///
/// `Before` is the upstream behavior: a transient DB error after the mark
/// loses one reply but a redelivered webhook can never double-process.
/// `AfterCommit` flips the trade: no lost replies, but a narrow window in
/// which a redelivery is processed twice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MarkProcessed {
    /// Mark before opening the transaction (default).
    Before,
    /// Mark only after the transaction commits.
    AfterCommit,
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct Config {
    /// HTTP server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Relational store configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Shared key-value store configuration.
    #[serde(default)]
    pub redis: RedisConfig,

    /// Admission-control and handler knobs.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Downstream job queue knobs and endpoints.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// WhatsApp HTTP gateway settings.
    #[serde(default)]
    pub waha: Option<WahaConfig>,

    /// Telegram bot settings.
    #[serde(default)]
    pub telegram: Option<TelegramConfig>,

    /// Reply template overrides, keyed by template name.
    #[serde(default)]
    pub templates: HashMap<String, String>,

    /// Optional rolling-file log output.
    #[serde(default)]
    pub logging: Option<LoggingConfig>,
}

/// HTTP server configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ServerConfig {
    /// Socket address to bind.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

/// Relational store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database URL.
    #[serde(default = "default_database_url")]
    pub url: String,
}

/// Shared key-value store configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct RedisConfig {
    /// Redis URL. When absent, the server falls back to the in-process
    /// store and per-user serialization only holds within one process.
    #[serde(default)]
    pub url: Option<String>,
}

/// Admission-control and handler knobs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PipelineConfig {
    /// TTL for the per-user mutex.
    #[serde(default = "default_lock_ttl_seconds")]
    pub lock_ttl_seconds: u64,

    /// Lock acquisition attempts before giving up on a message.
    #[serde(default = "default_lock_max_attempts")]
    pub lock_max_attempts: u32,

    /// TTL for the post-reply cooldown.
    #[serde(default = "default_user_cooldown_seconds")]
    pub user_cooldown_seconds: u64,

    /// Retention for seen message ids.
    #[serde(default = "default_idempotency_ttl_seconds")]
    pub idempotency_ttl_seconds: u64,

    /// Invalid-input strikes before escalation to an operator.
    #[serde(default = "default_max_warnings")]
    pub max_warnings: u32,

    /// When the idempotency mark is written.
    #[serde(default = "default_mark_processed")]
    pub mark_processed: MarkProcessed,
}

/// Downstream job queue knobs and endpoints.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JobsConfig {
    /// Delivery attempts for spreadsheet-sync jobs.
    #[serde(default = "default_spreadsheet_sync_max_attempts")]
    pub spreadsheet_sync_max_attempts: u32,

    /// Delivery attempts for operator-notify jobs.
    #[serde(default = "default_operator_notify_max_attempts")]
    pub operator_notify_max_attempts: u32,

    /// Endpoint that appends one captured form row to the spreadsheet.
    #[serde(default)]
    pub spreadsheet_append_url: Option<String>,

    /// Chat id that receives operator notifications.
    #[serde(default)]
    pub operator_chat_id: Option<String>,
}

/// WhatsApp HTTP gateway settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct WahaConfig {
    /// Base URL of the gateway (e.g. `http://waha:3000`).
    pub base_url: String,

    /// Gateway session name.
    #[serde(default = "default_waha_session")]
    pub session: String,

    /// API key sent with outbound gateway calls. Overridable via the
    /// `WAHA_API_KEY` environment variable.
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Telegram bot settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct TelegramConfig {
    /// Bot token. Overridable via the `TELEGRAM_BOT_TOKEN` environment
    /// variable; never logged.
    #[serde(default)]
    pub token: Option<String>,
}

/// Rolling-file log output configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LoggingConfig {
    /// Directory for log files.
    pub directory: String,

    /// Rotation policy: "daily", "hourly", or "never".
    #[serde(default = "default_rotation")]
    pub rotation: String,

    /// Maximum number of rotated files to keep.
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_database_url() -> String {
    "sqlite:leadgate.db".to_string()
}

fn default_lock_ttl_seconds() -> u64 {
    10
}

fn default_lock_max_attempts() -> u32 {
    3
}

fn default_user_cooldown_seconds() -> u64 {
    2
}

fn default_idempotency_ttl_seconds() -> u64 {
    86_400
}

fn default_max_warnings() -> u32 {
    3
}

fn default_mark_processed() -> MarkProcessed {
    MarkProcessed::Before
}

fn default_spreadsheet_sync_max_attempts() -> u32 {
    5
}

fn default_operator_notify_max_attempts() -> u32 {
    3
}

fn default_waha_session() -> String {
    "default".to_string()
}

fn default_rotation() -> String {
    "daily".to_string()
}

fn default_max_files() -> usize {
    7
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_seconds: default_lock_ttl_seconds(),
            lock_max_attempts: default_lock_max_attempts(),
            user_cooldown_seconds: default_user_cooldown_seconds(),
            idempotency_ttl_seconds: default_idempotency_ttl_seconds(),
            max_warnings: default_max_warnings(),
            mark_processed: default_mark_processed(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            spreadsheet_sync_max_attempts: default_spreadsheet_sync_max_attempts(),
            operator_notify_max_attempts: default_operator_notify_max_attempts(),
            spreadsheet_append_url: None,
            operator_chat_id: None,
        }
    }
}

impl Config {
    /// Load configuration from file system.
    ///
    /// Priority order:
    /// 1. Explicit `path` argument (from the CLI)
    /// 2. LEADGATE_CONFIG environment variable
    /// 3. ./config.toml (local directory)
    /// 4. ~/.config/leadgate/config.toml (user config)
    ///
    /// Returns default config if no config file found.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if a found file cannot be read.
    /// Returns [`ConfigError::ParseError`] if a found file is not valid TOML.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        // 1. Explicit CLI path (must exist; errors surface).
        if let Some(p) = path {
            return Self::load_from(p);
        }

        // 2. Environment variable.
        if let Ok(env_path) = std::env::var("LEADGATE_CONFIG") {
            let p = PathBuf::from(&env_path);
            if p.exists() {
                return Self::load_from(p);
            }
        }

        // 3. Local directory.
        let local = PathBuf::from("config.toml");
        if local.exists() {
            return Self::load_from(local);
        }

        // 4. User config directory (~/.config/leadgate/).
        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".config/leadgate/config.toml");
            if user_config.exists() {
                return Self::load_from(user_config);
            }
        }

        // No config file found, return defaults.
        Ok(Self::default())
    }

    /// Load configuration from a specific path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::IoError`] if the file cannot be read.
    /// Returns [`ConfigError::ParseError`] if the file is not valid TOML.
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::IoError {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&content).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }
}
