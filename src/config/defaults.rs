//! Typed config sections and their defaults
//!
//! Every field carries a serde default, so a partial (or missing) config
//! file deserializes into a complete [`Config`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default SQLite busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Default per-target lock wait (ms).
const DEFAULT_LOCK_TIMEOUT_MS: u64 = 30_000;

/// Default log level.
const DEFAULT_LOG_LEVEL: &str = "info";

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub memory_store: MemoryStoreConfig,

    #[serde(default)]
    pub log: LogSettings,
}

/// Where and how message metadata is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryStoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            lock_timeout_ms: DEFAULT_LOCK_TIMEOUT_MS,
        }
    }
}

impl MemoryStoreConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }
}

/// Log output format name as written in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormatSetting {
    #[default]
    Plaintext,
    Json,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub format: LogFormatSetting,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormatSetting::default(),
        }
    }
}

/// `~/.chatmeta/messages.db`, or a relative path if there is no home dir.
fn default_store_path() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".chatmeta").join("messages.db"))
        .unwrap_or_else(|| PathBuf::from(".chatmeta/messages.db"))
}

fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

fn default_lock_timeout_ms() -> u64 {
    DEFAULT_LOCK_TIMEOUT_MS
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}
