use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::encryption::MIN_SECRET_LEN;
use crate::sync::CycleSettings;
use crate::types::error::{BridgeError, Result};

pub const ENV_TELEGRAM_TOKEN: &str = "MAILGRAM_TELEGRAM_TOKEN";
pub const ENV_GOOGLE_CLIENT_ID: &str = "MAILGRAM_GOOGLE_CLIENT_ID";
pub const ENV_GOOGLE_CLIENT_SECRET: &str = "MAILGRAM_GOOGLE_CLIENT_SECRET";
pub const ENV_SECRET: &str = "MAILGRAM_SECRET";

/// Application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,

    #[serde(default)]
    pub google: GoogleConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Bot token from @BotFather
    #[serde(default)]
    pub bot_token: String,

    #[serde(default = "default_telegram_api")]
    pub api_base: String,

    /// getUpdates long-poll timeout
    #[serde(default = "default_long_poll_secs")]
    pub long_poll_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleConfig {
    #[serde(default)]
    pub client_id: String,

    /// Optional for public clients using PKCE
    pub client_secret: Option<String>,

    /// Must match a redirect URI registered for the client
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,

    #[serde(default = "default_gmail_api")]
    pub api_base: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Recent inbox messages fetched per cycle
    #[serde(default = "default_fetch_window")]
    pub fetch_window: usize,

    /// Most recent tracked messages verified per cycle
    #[serde(default = "default_reconcile_window")]
    pub reconcile_window: usize,

    #[serde(default = "default_delivery_gap_ms")]
    pub delivery_gap_ms: u64,

    #[serde(default = "default_retraction_gap_ms")]
    pub retraction_gap_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file
    #[serde(default = "default_database_path")]
    pub database: PathBuf,

    /// Secret the token encryption key is derived from
    #[serde(default)]
    pub secret: String,
}

fn default_telegram_api() -> String {
    crate::adapters::telegram::TELEGRAM_API_BASE.to_string()
}

fn default_long_poll_secs() -> u64 {
    30
}

fn default_redirect_uri() -> String {
    "http://localhost".to_string()
}

fn default_gmail_api() -> String {
    crate::adapters::gmail::GMAIL_API_BASE.to_string()
}

fn default_interval_secs() -> u64 {
    60
}

fn default_fetch_window() -> usize {
    10
}

fn default_reconcile_window() -> usize {
    20
}

fn default_delivery_gap_ms() -> u64 {
    500
}

fn default_retraction_gap_ms() -> u64 {
    200
}

fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mailgram")
        .join("mailgram.db")
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: default_telegram_api(),
            long_poll_secs: default_long_poll_secs(),
        }
    }
}

impl Default for GoogleConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: default_redirect_uri(),
            api_base: default_gmail_api(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            fetch_window: default_fetch_window(),
            reconcile_window: default_reconcile_window(),
            delivery_gap_ms: default_delivery_gap_ms(),
            retraction_gap_ms: default_retraction_gap_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database_path(),
            secret: String::new(),
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn cycle_settings(&self) -> CycleSettings {
        CycleSettings {
            fetch_window: self.fetch_window,
            reconcile_window: self.reconcile_window,
            delivery_gap: Duration::from_millis(self.delivery_gap_ms),
            retraction_gap: Duration::from_millis(self.retraction_gap_ms),
            ..CycleSettings::default()
        }
    }
}

impl AppConfig {
    /// Environment variables win over the file for secrets
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = lookup(ENV_TELEGRAM_TOKEN) {
            self.telegram.bot_token = token;
        }
        if let Some(id) = lookup(ENV_GOOGLE_CLIENT_ID) {
            self.google.client_id = id;
        }
        if let Some(secret) = lookup(ENV_GOOGLE_CLIENT_SECRET) {
            self.google.client_secret = Some(secret);
        }
        if let Some(secret) = lookup(ENV_SECRET) {
            self.storage.secret = secret;
        }
    }

    /// Check everything `run` needs before anything is started
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        if self.telegram.bot_token.trim().is_empty() {
            problems.push(format!("telegram.bot_token is missing (or set {})", ENV_TELEGRAM_TOKEN));
        }
        if self.google.client_id.trim().is_empty() {
            problems.push(format!("google.client_id is missing (or set {})", ENV_GOOGLE_CLIENT_ID));
        }
        if self.storage.secret.len() < MIN_SECRET_LEN {
            problems.push(format!(
                "storage.secret must be at least {} characters (or set {})",
                MIN_SECRET_LEN, ENV_SECRET
            ));
        }
        if self.polling.interval_secs == 0 {
            problems.push("polling.interval_secs must be greater than zero".to_string());
        }
        if self.polling.fetch_window == 0 || self.polling.fetch_window > 100 {
            problems.push("polling.fetch_window must be between 1 and 100".to_string());
        }
        if self.polling.reconcile_window == 0 {
            problems.push("polling.reconcile_window must be greater than zero".to_string());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(BridgeError::Config(problems.join("; ")))
        }
    }
}

/// Get default config paths
pub fn default_config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("mailgram").join("config.toml"));
    }

    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".config").join("mailgram").join("config.toml"));
        paths.push(home_dir.join(".mailgram.toml"));
    }

    paths
}

/// Load configuration from `path`, or from the first default path that
/// exists. Without any file the defaults plus environment are used.
pub fn load_config(path: Option<&Path>) -> Result<AppConfig> {
    let mut config = match path {
        Some(path) => load_config_from_path(path)?,
        None => match default_config_paths().into_iter().find(|p| p.exists()) {
            Some(found) => load_config_from_path(&found)?,
            None => {
                info!("No config file found, using defaults and environment");
                AppConfig::default()
            }
        },
    };

    config.apply_env_overrides();
    Ok(config)
}

pub fn load_config_from_path(path: &Path) -> Result<AppConfig> {
    info!("Loading configuration from: {:?}", path);

    let content = fs::read_to_string(path)
        .map_err(|e| BridgeError::Config(format!("Failed to read config {:?}: {}", path, e)))?;

    toml::from_str(&content)
        .map_err(|e| BridgeError::Config(format!("Failed to parse config {:?}: {}", path, e)))
}
