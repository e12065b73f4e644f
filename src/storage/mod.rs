//! Storage abstraction for persisting task state.
//!
//! This module provides a trait-based storage abstraction with
//! pluggable backends (in-memory, SQLite).

mod memory;
#[cfg(any(feature = "sqlite", test))]
mod sqlite;

pub use memory::InMemoryStorage;
#[cfg(any(feature = "sqlite", test))]
pub use sqlite::SqliteStorage;

use async_trait::async_trait;
use thiserror::Error;

use crate::core::state::TaskState;
use crate::core::types::TaskUuid;

/// Errors that can occur during storage operations.
#[derive(Debug, Clone, Error)]
pub enum StorageError {
    /// The requested item was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A duplicate key was detected.
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Storage lock was poisoned.
    #[error("storage lock poisoned")]
    LockPoisoned,

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// Generic storage error.
    #[error("storage error: {0}")]
    Other(String),
}

/// Persistence for task lifecycle records.
///
/// The executor driving a task is the only writer of its record; every
/// read returns an owned copy.
#[async_trait]
pub trait TaskStateStore: Send + Sync {
    /// Insert the record of a newly submitted task.
    async fn insert_task(&self, state: &TaskState) -> Result<(), StorageError>;

    /// Replace the record of an existing task.
    async fn update_task(&self, state: &TaskState) -> Result<(), StorageError>;

    /// Get a task record by UUID.
    async fn get_task(&self, task_uuid: &TaskUuid) -> Result<TaskState, StorageError>;

    /// List task records, newest first. Returns at most `limit` records.
    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskState>, StorageError>;

    /// Get all records that are not terminal (Created or Running).
    async fn get_incomplete_tasks(&self) -> Result<Vec<TaskState>, StorageError>;
}
