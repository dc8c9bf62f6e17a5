//! Configuration management for tgtransfer

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;
use crate::telegram::AccountKind;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Overrides the directory holding the config and session files
pub const CONFIG_DIRECTORY_ENV: &str = "TELEGRAM_UPLOAD_CONFIG_DIRECTORY";

/// Default config file name
pub const CONFIG_FILE_NAME: &str = "telegram-upload.json";

/// Default session file name
pub const SESSION_FILE_NAME: &str = "telegram-upload.session";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Telegram API configuration
    pub telegram: TelegramConfig,

    /// Upload and download behavior
    #[serde(default)]
    pub transfer: TransferConfig,
}

/// Telegram API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Telegram API ID (get from my.telegram.org)
    pub api_id: i32,

    /// Telegram API hash
    pub api_hash: String,

    /// Phone number for user authentication
    #[serde(default)]
    pub phone: Option<String>,

    /// Bot token; when set the session logs in as a bot
    #[serde(default)]
    pub bot_token: Option<String>,

    /// Session file path
    #[serde(default = "default_session_file")]
    pub session_file: PathBuf,

    /// Account has Telegram Premium (raises file and caption limits)
    #[serde(default)]
    pub premium: bool,
}

/// Transfer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Retry attempts for transient failures, per file
    pub retry_attempts: u32,

    /// Base delay for exponential backoff (ms)
    pub retry_base_delay_ms: u64,

    /// Directory downloads are written to
    pub download_dir: PathBuf,

    /// Draw progress bars on the terminal
    pub show_progress: bool,
}

fn default_session_file() -> PathBuf {
    config_directory().join(SESSION_FILE_NAME)
}

impl Default for TelegramConfig {
    fn default() -> Self {
        TelegramConfig {
            api_id: 0,
            api_hash: String::new(),
            phone: None,
            bot_token: None,
            session_file: default_session_file(),
            premium: false,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        TransferConfig {
            retry_attempts: policy.max_retries,
            retry_base_delay_ms: policy.base_delay_ms,
            download_dir: PathBuf::from("."),
            show_progress: true,
        }
    }
}

/// Directory holding the config and session files
///
/// `$TELEGRAM_UPLOAD_CONFIG_DIRECTORY` when set, `~/.config` otherwise.
pub fn config_directory() -> PathBuf {
    if let Ok(dir) = std::env::var(CONFIG_DIRECTORY_ENV) {
        let dir = dir.trim();
        if !dir.is_empty() {
            return expand_tilde(Path::new(dir));
        }
    }
    dirs::config_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Default location of the config file
pub fn default_config_file() -> PathBuf {
    config_directory().join(CONFIG_FILE_NAME)
}

/// Expand a leading `~` to the home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some(home) => home.join(rest),
        None => path.to_path_buf(),
    }
}

impl Config {
    /// Load configuration from a file, with environment variable overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = expand_tilde(path.as_ref());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;

        let mut config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("Failed to parse config file: {}", e))
        })?;

        // Override with environment variables if set
        config.apply_env_overrides();
        config.telegram.session_file = expand_tilde(&config.telegram.session_file);
        config.transfer.download_dir = expand_tilde(&config.transfer.download_dir);

        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides to configuration
    pub fn apply_env_overrides(&mut self) {
        if let Ok(api_id) = std::env::var("TELEGRAM_APP_ID") {
            if let Ok(id) = api_id.trim().parse::<i32>() {
                self.telegram.api_id = id;
            }
        }

        if let Ok(api_hash) = std::env::var("TELEGRAM_APP_HASH") {
            let hash = api_hash.trim().to_string();
            if !hash.is_empty() {
                self.telegram.api_hash = hash;
            }
        }

        if let Ok(phone) = std::env::var("TELEGRAM_PHONE") {
            let phone = phone.trim().to_string();
            if !phone.is_empty() {
                self.telegram.phone = Some(phone);
            }
        }

        if let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN") {
            let token = token.trim().to_string();
            if !token.is_empty() {
                self.telegram.bot_token = Some(token);
            }
        }
    }

    /// Save configuration to a file, creating its directory if needed
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self).map_err(|e| {
            Error::Config(format!("Failed to serialize config: {}", e))
        })?;

        std::fs::write(path, content).map_err(|e| {
            Error::Config(format!("Failed to write config file: {}", e))
        })?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.telegram.api_id == 0 {
            return Err(Error::InvalidConfig(
                "Telegram API ID is required".to_string(),
            ));
        }

        if self.telegram.api_hash.is_empty() {
            return Err(Error::InvalidConfig(
                "Telegram API hash is required".to_string(),
            ));
        }

        if self.telegram.session_file.as_os_str().is_empty() {
            return Err(Error::InvalidConfig(
                "Session file path must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Account tier used for file size and caption limits
    pub fn account_kind(&self) -> AccountKind {
        if self.telegram.bot_token.is_some() {
            AccountKind::Bot
        } else if self.telegram.premium {
            AccountKind::Premium
        } else {
            AccountKind::User
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.transfer.retry_attempts,
            base_delay_ms: self.transfer.retry_base_delay_ms,
        }
    }
}
