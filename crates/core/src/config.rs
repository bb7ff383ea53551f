//! Configuration for conversation sessions.

use crate::error::{Error, Result};
use crate::platform;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default typing indicator lifetime in milliseconds.
pub const DEFAULT_TYPING_TTL_MS: u64 = 3000;

/// Default maximum message length (10KB).
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 10 * 1024;

/// Default capacity of the session event channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Tunables shared by every session opened with this config.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// How long a remote typing signal stays on without renewal.
    #[serde(default = "default_typing_ttl_ms")]
    pub typing_ttl_ms: u64,

    /// Maximum accepted message body, in bytes.
    #[serde(default = "default_max_message_length")]
    pub max_message_length: usize,

    /// Buffered session events per subscriber before lagging.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

fn default_typing_ttl_ms() -> u64 {
    DEFAULT_TYPING_TTL_MS
}

fn default_max_message_length() -> usize {
    DEFAULT_MAX_MESSAGE_LENGTH
}

fn default_event_capacity() -> usize {
    DEFAULT_EVENT_CAPACITY
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            typing_ttl_ms: DEFAULT_TYPING_TTL_MS,
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl SyncConfig {
    /// Typing TTL as a duration.
    pub fn typing_ttl(&self) -> Duration {
        Duration::from_millis(self.typing_ttl_ms)
    }

    /// Load configuration from the default config file.
    pub fn load() -> Result<Self> {
        Self::load_from(&platform::config_file_path())
    }

    /// Load configuration from a specific file, using defaults if it is missing.
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let mut config: SyncConfig = serde_json::from_str(&contents)?;
            config.fix_invalid_values();
            Ok(config)
        } else {
            Ok(SyncConfig::default())
        }
    }

    /// Fix any invalid or zero values with sensible defaults.
    fn fix_invalid_values(&mut self) {
        if self.typing_ttl_ms == 0 {
            self.typing_ttl_ms = DEFAULT_TYPING_TTL_MS;
        }
        if self.max_message_length == 0 {
            self.max_message_length = DEFAULT_MAX_MESSAGE_LENGTH;
        }
        if self.event_capacity == 0 {
            self.event_capacity = DEFAULT_EVENT_CAPACITY;
        }
    }

    /// Save configuration to the default config file.
    pub fn save(&mut self) -> Result<()> {
        self.save_to(&platform::config_file_path())
    }

    /// Save configuration to a specific file.
    pub fn save_to(&mut self, path: &Path) -> Result<()> {
        self.fix_invalid_values();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;

        Ok(())
    }

    /// Load configuration from environment variables, falling back to file/defaults.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup.
    fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ttl) = lookup("WAYFARE_TYPING_TTL_MS") {
            self.typing_ttl_ms = ttl
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("invalid WAYFARE_TYPING_TTL_MS: {}", ttl)))?;
        }

        if let Some(max) = lookup("WAYFARE_MAX_MESSAGE_LENGTH") {
            self.max_message_length = max.trim().parse().map_err(|_| {
                Error::Config(format!("invalid WAYFARE_MAX_MESSAGE_LENGTH: {}", max))
            })?;
        }

        self.fix_invalid_values();
        Ok(())
    }
}
