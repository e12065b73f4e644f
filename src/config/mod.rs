//! Configuration loading and parsing.
//!
//! The commissioner reads one YAML file holding its concurrency bound,
//! default retry policy, storage backend and infrastructure program.

mod error;
mod yaml;

pub use error::ConfigError;
pub use yaml::{
    BackoffKind, CommissionerConfig, InfrastructureConfig, RetryConfig, StorageConfig, YamlLoader,
};
