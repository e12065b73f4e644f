//! YAML configuration parsing.
//!
//! Parses the commissioner's configuration file:
//!
//! ```yaml
//! max_concurrent_subtasks: 8
//! shutdown_timeout_secs: 60
//! retry:
//!   max_retries: 3
//!   delay_ms: 500
//!   backoff: exponential
//!   max_delay_ms: 10000
//! storage:
//!   type: sqlite
//!   path: /var/lib/commissioner/tasks.db
//! infrastructure:
//!   program: /opt/yb/bin/node-agent
//!   timeout_secs: 120
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use super::error::ConfigError;
use crate::core::retry::{Backoff, RetryPolicy};
use crate::execution::CommandInfrastructure;

const DEFAULT_MAX_CONCURRENT_SUBTASKS: usize = 4;
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// Top-level commissioner configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommissionerConfig {
    /// Upper bound on subtasks running at once across all tasks.
    pub max_concurrent_subtasks: usize,
    /// Default retry policy for tasks whose plan does not set one.
    pub retry: RetryConfig,
    pub storage: StorageConfig,
    /// External program used as the infrastructure collaborator.
    pub infrastructure: Option<InfrastructureConfig>,
    /// How long shutdown waits for in-flight tasks.
    pub shutdown_timeout_secs: u64,
}

impl Default for CommissionerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_subtasks: DEFAULT_MAX_CONCURRENT_SUBTASKS,
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            infrastructure: None,
            shutdown_timeout_secs: DEFAULT_SHUTDOWN_TIMEOUT_SECS,
        }
    }
}

impl CommissionerConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Check values serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_subtasks == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_concurrent_subtasks cannot be zero".into(),
            ));
        }

        if self.retry.backoff == BackoffKind::Exponential && self.retry.multiplier < 1.0 {
            return Err(ConfigError::InvalidConfig(format!(
                "retry multiplier must be at least 1.0, got {}",
                self.retry.multiplier
            )));
        }

        if let StorageConfig::Sqlite { path } = &self.storage {
            if path.trim().is_empty() {
                return Err(ConfigError::MissingField("storage.path".into()));
            }
        }

        if let Some(infra) = &self.infrastructure {
            if infra.program.trim().is_empty() {
                return Err(ConfigError::MissingField("infrastructure.program".into()));
            }
        }

        Ok(())
    }
}

/// Delay progression named in the configuration file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    #[default]
    Fixed,
    Exponential,
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retry budget shared by all groups of a task.
    pub max_retries: u32,
    /// Delay before the first retry in milliseconds.
    pub delay_ms: u64,
    pub backoff: BackoffKind,
    /// Growth factor for exponential backoff.
    pub multiplier: f64,
    /// Cap for exponential backoff; defaults to 60 times the initial delay.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
            backoff: BackoffKind::Fixed,
            multiplier: 2.0,
            max_delay_ms: None,
        }
    }
}

impl RetryConfig {
    /// Convert to the policy the executor applies.
    pub fn to_policy(&self) -> RetryPolicy {
        let delay = Duration::from_millis(self.delay_ms);
        let backoff = match self.backoff {
            BackoffKind::Fixed => Backoff::Fixed,
            BackoffKind::Exponential => Backoff::Exponential {
                multiplier: self.multiplier,
                max_delay: Duration::from_millis(
                    self.max_delay_ms
                        .unwrap_or_else(|| self.delay_ms.saturating_mul(60)),
                ),
            },
        };
        RetryPolicy {
            max_retries: self.max_retries,
            delay,
            backoff,
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StorageConfig {
    /// In-memory storage (default, non-persistent).
    #[serde(rename = "memory")]
    #[default]
    Memory,
    /// SQLite storage.
    #[serde(rename = "sqlite")]
    Sqlite {
        /// Path to the database file.
        path: String,
    },
}

/// External infrastructure program.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InfrastructureConfig {
    pub program: String,
    /// Arguments placed before the operation name.
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub working_dir: Option<String>,
    /// Per-operation timeout in seconds.
    pub timeout_secs: Option<u64>,
}

impl InfrastructureConfig {
    /// Build the command-backed infrastructure this entry describes.
    pub fn build(&self) -> CommandInfrastructure {
        let mut builder = CommandInfrastructure::builder(&self.program).args(self.args.clone());
        for (key, value) in &self.env {
            builder = builder.env(key, value);
        }
        if let Some(dir) = &self.working_dir {
            builder = builder.working_dir(dir);
        }
        if let Some(secs) = self.timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build()
    }
}

/// YAML configuration loader.
pub struct YamlLoader;

impl YamlLoader {
    /// Load and validate configuration from a file.
    pub fn load_config(path: impl AsRef<Path>) -> Result<CommissionerConfig, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::FileReadError {
            path: path.to_path_buf(),
            source,
        })?;
        let config: CommissionerConfig =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::YamlFileError {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate configuration from a YAML string.
    pub fn parse_config(yaml: &str) -> Result<CommissionerConfig, ConfigError> {
        let config: CommissionerConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }
}
