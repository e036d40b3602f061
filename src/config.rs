//! Runtime configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compute::BUILD_LOG_CAPACITY;

/// Errors loading or validating a [`RuntimeConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Settings for the compute/graphics runtime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory compute sources are loaded from.
    pub resource_root: PathBuf,
    /// Command queues created together with the context.
    pub queue_count: usize,
    /// Maximum number of build-log characters surfaced on a failed build.
    pub build_log_capacity: usize,
    /// Request profiling-enabled queues.
    pub queue_profiling: bool,
    /// `env_logger` filter used by [`init_logging`](crate::logging::init_logging).
    pub log_filter: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            resource_root: PathBuf::from("res"),
            queue_count: 1,
            build_log_capacity: BUILD_LOG_CAPACITY,
            queue_profiling: false,
            log_filter: None,
        }
    }
}

impl RuntimeConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn with_resource_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.resource_root = root.into();
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_count == 0 {
            return Err(ConfigError::Invalid(
                "queue_count must be at least 1".to_string(),
            ));
        }
        if self.build_log_capacity == 0 {
            return Err(ConfigError::Invalid(
                "build_log_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
