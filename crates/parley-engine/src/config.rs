//! Configuration for the parley client.
//!
//! The config file is JSON; every field has a default so a partial (or
//! missing) file is always valid.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `base_url`.
pub const API_URL_ENV: &str = "PARLEY_API_URL";

/// Directory name used under the platform config/data directories.
const APP_DIR: &str = "parley";

/// Main configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the chat backend (without the `/api/...` suffix).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Timeout for the history request, in seconds.
    #[serde(default = "default_history_timeout")]
    pub history_timeout_secs: u64,

    /// Timeout for the ask request, in seconds.
    #[serde(default = "default_ask_timeout")]
    pub ask_timeout_secs: u64,

    /// Delay between reveal steps, in milliseconds.
    #[serde(default = "default_reveal_interval")]
    pub reveal_interval_ms: u64,

    /// Assistant message appended when an ask request fails.
    #[serde(default = "default_fallback_message")]
    pub fallback_message: String,

    /// Whether to keep and send backend cookies.
    #[serde(default = "default_send_credentials")]
    pub send_credentials: bool,
}

fn default_base_url() -> String {
    "http://127.0.0.1:8080".into()
}

fn default_history_timeout() -> u64 {
    10
}

fn default_ask_timeout() -> u64 {
    30
}

fn default_reveal_interval() -> u64 {
    25
}

fn default_fallback_message() -> String {
    "⚠️ Sorry, something went wrong.".into()
}

fn default_send_credentials() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            history_timeout_secs: default_history_timeout(),
            ask_timeout_secs: default_ask_timeout(),
            reveal_interval_ms: default_reveal_interval(),
            fallback_message: default_fallback_message(),
            send_credentials: default_send_credentials(),
        }
    }
}

impl Config {
    /// Load configuration from a file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Load configuration, falling back to defaults when the file is absent.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Save configuration to a file.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
        }
        std::fs::write(path, content).map_err(ConfigError::Io)
    }

    /// Default config file location (`<config_dir>/parley/config.json`).
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.json"))
    }

    /// Apply the `PARLEY_API_URL` override, if set and non-empty.
    #[must_use]
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.base_url = url;
            }
        }
        self
    }

    /// Base URL with any trailing slash removed.
    pub fn api_base(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn history_timeout(&self) -> Duration {
        Duration::from_secs(self.history_timeout_secs)
    }

    pub fn ask_timeout(&self) -> Duration {
        Duration::from_secs(self.ask_timeout_secs)
    }

    pub fn reveal_interval(&self) -> Duration {
        Duration::from_millis(self.reveal_interval_ms)
    }
}

/// Platform data directory for parley (`<data_dir>/parley`).
pub fn data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|dir| dir.join(APP_DIR))
}

/// Errors that can occur when working with configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading or writing config.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error parsing config JSON.
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),

    /// Error serializing config to JSON.
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
}
