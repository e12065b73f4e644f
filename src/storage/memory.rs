//! In-memory storage implementation.
//!
//! Provides a thread-safe in-memory backend for testing and development.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::RwLock;

use super::{StorageError, TaskStateStore};
use crate::core::state::TaskState;
use crate::core::types::TaskUuid;

/// In-memory storage backend.
///
/// Thread-safe storage using RwLock for concurrent access.
/// Data is not persisted across restarts.
pub struct InMemoryStorage {
    tasks: RwLock<HashMap<TaskUuid, TaskState>>,
}

impl InMemoryStorage {
    /// Create a new empty in-memory storage.
    pub fn new() -> Self {
        Self {
            tasks: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStateStore for InMemoryStorage {
    async fn insert_task(&self, state: &TaskState) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        if tasks.contains_key(&state.task_uuid) {
            return Err(StorageError::DuplicateKey(format!("task: {}", state.task_uuid)));
        }
        tasks.insert(state.task_uuid, state.clone());
        Ok(())
    }

    async fn update_task(&self, state: &TaskState) -> Result<(), StorageError> {
        let mut tasks = self.tasks.write().map_err(|_| StorageError::LockPoisoned)?;
        match tasks.get_mut(&state.task_uuid) {
            Some(stored) => {
                *stored = state.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound(format!("task: {}", state.task_uuid))),
        }
    }

    async fn get_task(&self, task_uuid: &TaskUuid) -> Result<TaskState, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        tasks
            .get(task_uuid)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("task: {}", task_uuid)))
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskState>, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        let mut result: Vec<_> = tasks.values().cloned().collect();
        // Most recent first
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }

    async fn get_incomplete_tasks(&self) -> Result<Vec<TaskState>, StorageError> {
        let tasks = self.tasks.read().map_err(|_| StorageError::LockPoisoned)?;
        let result: Vec<_> = tasks
            .values()
            .filter(|t| !t.is_terminal())
            .cloned()
            .collect();
        Ok(result)
    }
}
