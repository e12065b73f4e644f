//! SQLite storage implementation.
//!
//! Provides persistent storage using SQLite database. The same database
//! holds task state and audit records.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use super::{StorageError, TaskStateStore};
use crate::audit::{AuditError, AuditLog, AuditRecord};
use crate::core::state::{ErrorDetail, TaskState, TaskStatus};
use crate::core::types::{TaskType, TaskUuid};
use crate::events::AuditNotification;

/// SQLite storage backend.
///
/// Provides persistent storage with automatic schema migration.
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SQLite storage with the given database path.
    ///
    /// Creates the database file if it doesn't exist and runs migrations.
    pub async fn new(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy();
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path_str))
            .map_err(|e| StorageError::Other(e.to_string()))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Create an in-memory SQLite database (useful for testing).
    pub async fn in_memory() -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Other(e.to_string()))?;

        let storage = Self { pool };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> Result<(), StorageError> {
        let schema = include_str!("../../migrations/001_initial_schema.sql");
        sqlx::raw_sql(schema)
            .execute(&self.pool)
            .await
            .map_err(|e| StorageError::Other(format!("migration failed: {}", e)))?;
        Ok(())
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

type TaskRow = (
    String,
    String,
    String,
    f64,
    Option<String>,
    i64,
    String,
    Option<String>,
    Option<String>,
);

type AuditRow = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    Option<String>,
    String,
    Option<String>,
);

const TASK_COLUMNS: &str = "task_uuid, task_type, status, percent_complete, error, retries_used, created_at, started_at, completed_at";

const AUDIT_COLUMNS: &str =
    "task_uuid, task_type, target_uuid, creator, description, created_at, completed_at, status, error";

// Fixed precision keeps lexicographic order equal to chronological order.
fn time_to_string(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn string_to_time(s: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::SerializationError(format!("invalid timestamp {s}: {e}")))
}

fn error_to_string(error: &Option<ErrorDetail>) -> Result<Option<String>, StorageError> {
    error
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn string_to_error(s: Option<String>) -> Result<Option<ErrorDetail>, StorageError> {
    s.map(|s| serde_json::from_str(&s))
        .transpose()
        .map_err(|e| StorageError::SerializationError(e.to_string()))
}

fn parse_uuid(s: &str) -> Result<TaskUuid, StorageError> {
    s.parse()
        .map_err(|e| StorageError::SerializationError(format!("invalid uuid: {}", e)))
}

fn parse_task_type(s: &str) -> Result<TaskType, StorageError> {
    s.parse().map_err(StorageError::SerializationError)
}

fn parse_status(s: &str) -> Result<TaskStatus, StorageError> {
    s.parse().map_err(StorageError::SerializationError)
}

fn row_to_state(row: TaskRow) -> Result<TaskState, StorageError> {
    Ok(TaskState {
        task_uuid: parse_uuid(&row.0)?,
        task_type: parse_task_type(&row.1)?,
        status: parse_status(&row.2)?,
        percent_complete: row.3,
        error: string_to_error(row.4)?,
        retries_used: row.5 as u32,
        created_at: string_to_time(&row.6)?,
        started_at: row.7.as_deref().map(string_to_time).transpose()?,
        completed_at: row.8.as_deref().map(string_to_time).transpose()?,
    })
}

fn row_to_record(row: AuditRow) -> Result<AuditRecord, StorageError> {
    Ok(AuditRecord {
        task_uuid: parse_uuid(&row.0)?,
        task_type: parse_task_type(&row.1)?,
        target_uuid: row
            .2
            .as_deref()
            .map(|s| s.parse())
            .transpose()
            .map_err(|e| StorageError::SerializationError(format!("invalid uuid: {}", e)))?,
        creator: row.3,
        description: row.4,
        created_at: string_to_time(&row.5)?,
        completed_at: row.6.as_deref().map(string_to_time).transpose()?,
        status: parse_status(&row.7)?,
        error: string_to_error(row.8)?,
    })
}

#[async_trait]
impl TaskStateStore for SqliteStorage {
    async fn insert_task(&self, state: &TaskState) -> Result<(), StorageError> {
        let result = sqlx::query(&format!(
            "INSERT INTO task_states ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(state.task_uuid.to_string())
        .bind(state.task_type.as_str())
        .bind(state.status.as_str())
        .bind(state.percent_complete)
        .bind(error_to_string(&state.error)?)
        .bind(state.retries_used as i64)
        .bind(time_to_string(state.created_at))
        .bind(state.started_at.map(time_to_string))
        .bind(state.completed_at.map(time_to_string))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(
                StorageError::DuplicateKey(format!("task: {}", state.task_uuid)),
            ),
            Err(e) => Err(StorageError::Other(e.to_string())),
        }
    }

    async fn update_task(&self, state: &TaskState) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"
            UPDATE task_states
            SET status = ?, percent_complete = ?, error = ?, retries_used = ?,
                started_at = ?, completed_at = ?
            WHERE task_uuid = ?
            "#,
        )
        .bind(state.status.as_str())
        .bind(state.percent_complete)
        .bind(error_to_string(&state.error)?)
        .bind(state.retries_used as i64)
        .bind(state.started_at.map(time_to_string))
        .bind(state.completed_at.map(time_to_string))
        .bind(state.task_uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("task: {}", state.task_uuid)));
        }
        Ok(())
    }

    async fn get_task(&self, task_uuid: &TaskUuid) -> Result<TaskState, StorageError> {
        let row: TaskRow = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM task_states WHERE task_uuid = ?"
        ))
        .bind(task_uuid.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?
        .ok_or_else(|| StorageError::NotFound(format!("task: {}", task_uuid)))?;

        row_to_state(row)
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskState>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM task_states ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_state).collect()
    }

    async fn get_incomplete_tasks(&self) -> Result<Vec<TaskState>, StorageError> {
        let rows: Vec<TaskRow> = sqlx::query_as(&format!(
            "SELECT {TASK_COLUMNS} FROM task_states WHERE status IN ('created', 'running')"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StorageError::Other(e.to_string()))?;

        rows.into_iter().map(row_to_state).collect()
    }
}

#[async_trait]
impl AuditLog for SqliteStorage {
    async fn create_record(&self, record: AuditRecord) -> Result<(), AuditError> {
        let result = sqlx::query(&format!(
            "INSERT INTO audit_records ({AUDIT_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(record.task_uuid.to_string())
        .bind(record.task_type.as_str())
        .bind(record.target_uuid.map(|u| u.to_string()))
        .bind(&record.creator)
        .bind(&record.description)
        .bind(time_to_string(record.created_at))
        .bind(record.completed_at.map(time_to_string))
        .bind(record.status.as_str())
        .bind(error_to_string(&record.error)?)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(AuditError::Duplicate(record.task_uuid))
            }
            Err(e) => Err(AuditError::Storage(e.to_string())),
        }
    }

    async fn finalize_record(
        &self,
        notification: &AuditNotification,
    ) -> Result<AuditRecord, AuditError> {
        let mut record = self.get_record(&notification.task_uuid).await?;
        record.finalize(notification)?;

        // Guard on completed_at so a concurrent finalize cannot win twice.
        let result = sqlx::query(
            r#"
            UPDATE audit_records SET status = ?, error = ?, completed_at = ?
            WHERE task_uuid = ? AND completed_at IS NULL
            "#,
        )
        .bind(record.status.as_str())
        .bind(error_to_string(&record.error)?)
        .bind(record.completed_at.map(time_to_string))
        .bind(record.task_uuid.to_string())
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(AuditError::AlreadyFinalized(record.task_uuid));
        }
        Ok(record)
    }

    async fn get_record(&self, task_uuid: &TaskUuid) -> Result<AuditRecord, AuditError> {
        let row: AuditRow = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records WHERE task_uuid = ?"
        ))
        .bind(task_uuid.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?
        .ok_or(AuditError::NotFound(*task_uuid))?;

        Ok(row_to_record(row)?)
    }

    async fn list_records(&self, limit: usize) -> Result<Vec<AuditRecord>, AuditError> {
        let rows: Vec<AuditRow> = sqlx::query_as(&format!(
            "SELECT {AUDIT_COLUMNS} FROM audit_records ORDER BY created_at DESC LIMIT ?"
        ))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| AuditError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(row_to_record)
            .collect::<Result<Vec<_>, _>>()?)
    }
}
