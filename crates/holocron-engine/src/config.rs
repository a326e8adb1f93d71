//! Engine configuration

use holocron_storage::StorageConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Tunables for the resolver, loaders and mutation coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How long a mutation waits for the store's writer lock before it is
    /// reported as a retryable conflict
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Split a loader batch into chunks of at most this many keys.
    /// Unset means every batch is one fetch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_batch_size: Option<usize>,

    /// Deepest selection tree the executor accepts
    #[serde(default = "default_max_selection_depth")]
    pub max_selection_depth: usize,
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_max_selection_depth() -> usize {
    12
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_timeout_ms: default_lock_timeout_ms(),
            max_batch_size: None,
            max_selection_depth: default_max_selection_depth(),
        }
    }
}

impl EngineConfig {
    /// Parse from TOML text
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        tracing::debug!("Loaded engine config from {:?}", path.as_ref());
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::Invalid(
                "max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.max_selection_depth == 0 {
            return Err(ConfigError::Invalid(
                "max_selection_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings for the in-memory backend
    pub fn storage_config(&self) -> StorageConfig {
        StorageConfig {
            lock_timeout_ms: self.lock_timeout_ms,
        }
    }
}
