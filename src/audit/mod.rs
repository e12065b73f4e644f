//! Customer-visible audit records.
//!
//! Every accepted submission gets an [`AuditRecord`]. The record is created
//! when the commissioner emits `TaskSubmitted` and finalized exactly once
//! from the `TaskFinished` notification. [`AuditRecorder`] wires an
//! [`AuditLog`] into the event bus.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

use crate::core::state::{ErrorDetail, TaskStatus};
use crate::core::types::{TaskType, TaskUuid};
use crate::events::{AuditNotification, Event, EventHandler};
use crate::storage::StorageError;

/// Errors raised by an audit log.
#[derive(Debug, Clone, Error)]
pub enum AuditError {
    #[error("audit record not found: {0}")]
    NotFound(TaskUuid),

    #[error("audit record already exists: {0}")]
    Duplicate(TaskUuid),

    /// The record was already finalized; terminal notifications arrive once.
    #[error("audit record already finalized: {0}")]
    AlreadyFinalized(TaskUuid),

    #[error("audit storage error: {0}")]
    Storage(String),
}

impl From<StorageError> for AuditError {
    fn from(e: StorageError) -> Self {
        AuditError::Storage(e.to_string())
    }
}

/// Customer-visible record of one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub task_uuid: TaskUuid,
    pub task_type: TaskType,
    pub target_uuid: Option<Uuid>,
    pub creator: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    pub error: Option<ErrorDetail>,
}

impl AuditRecord {
    /// Create an open record for an accepted submission.
    pub fn new(task_uuid: TaskUuid, task_type: TaskType) -> Self {
        Self {
            task_uuid,
            task_type,
            target_uuid: None,
            creator: None,
            description: None,
            created_at: Utc::now(),
            completed_at: None,
            status: TaskStatus::Created,
            error: None,
        }
    }

    pub fn with_target(mut self, target_uuid: Option<Uuid>) -> Self {
        self.target_uuid = target_uuid;
        self
    }

    pub fn with_creator(mut self, creator: Option<String>) -> Self {
        self.creator = creator;
        self
    }

    pub fn with_description(mut self, description: Option<String>) -> Self {
        self.description = description;
        self
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// Apply the terminal notification.
    pub fn finalize(&mut self, notification: &AuditNotification) -> Result<(), AuditError> {
        if self.is_finalized() {
            return Err(AuditError::AlreadyFinalized(self.task_uuid));
        }
        self.status = notification.status;
        self.error = notification.error.clone();
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Persistence for audit records.
#[async_trait]
pub trait AuditLog: Send + Sync {
    /// Create the record of an accepted submission.
    async fn create_record(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Finalize a record from its terminal notification.
    async fn finalize_record(
        &self,
        notification: &AuditNotification,
    ) -> Result<AuditRecord, AuditError>;

    /// Get a record by task UUID.
    async fn get_record(&self, task_uuid: &TaskUuid) -> Result<AuditRecord, AuditError>;

    /// List records, newest first. Returns at most `limit` records.
    async fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError>;
}

/// In-memory audit log.
pub struct InMemoryAuditLog {
    records: RwLock<HashMap<TaskUuid, AuditRecord>>,
}

impl InMemoryAuditLog {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryAuditLog {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> AuditError {
    AuditError::Storage("audit log lock poisoned".to_string())
}

#[async_trait]
impl AuditLog for InMemoryAuditLog {
    async fn create_record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.write().map_err(poisoned)?;
        if records.contains_key(&record.task_uuid) {
            return Err(AuditError::Duplicate(record.task_uuid));
        }
        records.insert(record.task_uuid, record);
        Ok(())
    }

    async fn finalize_record(
        &self,
        notification: &AuditNotification,
    ) -> Result<AuditRecord, AuditError> {
        let mut records = self.records.write().map_err(poisoned)?;
        let record = records
            .get_mut(&notification.task_uuid)
            .ok_or(AuditError::NotFound(notification.task_uuid))?;
        record.finalize(notification)?;
        Ok(record.clone())
    }

    async fn get_record(&self, task_uuid: &TaskUuid) -> Result<AuditRecord, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        records
            .get(task_uuid)
            .cloned()
            .ok_or(AuditError::NotFound(*task_uuid))
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let records = self.records.read().map_err(poisoned)?;
        let mut result: Vec<_> = records.values().cloned().collect();
        result.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        result.truncate(limit);
        Ok(result)
    }
}

/// Event handler that maintains audit records from lifecycle events.
pub struct AuditRecorder {
    log: Arc<dyn AuditLog>,
}

impl AuditRecorder {
    pub fn new(log: Arc<dyn AuditLog>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl EventHandler for AuditRecorder {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskSubmitted {
                task_uuid,
                task_type,
                target_uuid,
                creator,
                description,
                ..
            } => {
                let record = AuditRecord::new(*task_uuid, *task_type)
                    .with_target(*target_uuid)
                    .with_creator(creator.clone())
                    .with_description(description.clone());
                if let Err(e) = self.log.create_record(record).await {
                    warn!(task_uuid = %task_uuid, error = %e, "failed to create audit record");
                }
            }
            Event::TaskFinished { notification, .. } => {
                if let Err(e) = self.log.finalize_record(notification).await {
                    warn!(
                        task_uuid = %notification.task_uuid,
                        error = %e,
                        "failed to finalize audit record"
                    );
                }
            }
            _ => {}
        }
    }
}
