//! Task lifecycle state.
//!
//! `TaskState` is the persisted record of one task. Its transition methods
//! enforce the lifecycle `Created -> Running -> {Success | Failure | Aborted}`:
//! terminal states are final and progress never moves backwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::types::{TaskType, TaskUuid};

/// Errors raised by an illegal state transition.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// The requested transition is not allowed from the current status.
    #[error("invalid transition for task {task_uuid}: {from} -> {to}")]
    InvalidTransition {
        task_uuid: TaskUuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Progress would move backwards or leave [0, 100].
    #[error("invalid progress for task {task_uuid}: {current} -> {requested}")]
    InvalidProgress {
        task_uuid: TaskUuid,
        current: f64,
        requested: f64,
    },
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Identity allocated, executor not yet started.
    Created,
    /// Executor is running the task's groups.
    Running,
    /// All groups completed.
    Success,
    /// A group failed and could not be retried.
    Failure,
    /// Cancelled by an operator.
    Aborted,
}

impl TaskStatus {
    /// Check if this is a terminal status (no further transitions allowed).
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::Failure | Self::Aborted)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(Self::Created),
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            "aborted" => Ok(Self::Aborted),
            _ => Err(format!("invalid task status: {s}")),
        }
    }
}

/// Classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Params rejected before execution.
    Validation,
    /// Retryable failure whose retry budget ran out.
    Transient,
    /// Non-retryable subtask failure.
    Permanent,
    /// A subtask panicked.
    SystemFault,
    /// Cancelled by an operator.
    Cancelled,
    /// The process running the task went away.
    Interrupted,
    /// The task's own state could not be persisted.
    Storage,
}

/// Structured failure information recorded on a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    /// Group that failed, if any.
    pub group: Option<String>,
    /// Subtask that failed, if any.
    pub subtask: Option<String>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            group: None,
            subtask: None,
        }
    }

    /// Builder: attach the failing group.
    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Builder: attach the failing subtask.
    pub fn at_subtask(mut self, subtask: impl Into<String>) -> Self {
        self.subtask = Some(subtask.into());
        self
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.group, &self.subtask) {
            (Some(group), Some(subtask)) => write!(f, "{group}/{subtask}: {}", self.message),
            (Some(group), None) => write!(f, "{group}: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

/// Persisted record of a task's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_uuid: TaskUuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    /// Percentage of groups completed, in [0, 100].
    pub percent_complete: f64,
    pub error: Option<ErrorDetail>,
    /// Retries spent from the task's budget.
    pub retries_used: u32,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskState {
    /// Create a state in `Created` status.
    pub fn new(task_uuid: TaskUuid, task_type: TaskType) -> Self {
        Self {
            task_uuid,
            task_type,
            status: TaskStatus::Created,
            percent_complete: 0.0,
            error: None,
            retries_used: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, to: TaskStatus) -> Result<(), StateError> {
        let allowed = match (self.status, to) {
            (TaskStatus::Created, TaskStatus::Running) => true,
            // Aborted before pickup, or failed during recovery.
            (TaskStatus::Created, TaskStatus::Aborted | TaskStatus::Failure) => true,
            (TaskStatus::Running, to) => to.is_terminal(),
            _ => false,
        };
        if !allowed {
            return Err(StateError::InvalidTransition {
                task_uuid: self.task_uuid,
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Mark the task as running.
    pub fn mark_running(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record progress. Only allowed while running; never decreases and
    /// never reaches 100 (that value is reserved for `Success`).
    pub fn set_progress(&mut self, percent: f64) -> Result<(), StateError> {
        let valid = self.status == TaskStatus::Running
            && percent.is_finite()
            && percent >= self.percent_complete
            && percent < 100.0;
        if !valid {
            return Err(StateError::InvalidProgress {
                task_uuid: self.task_uuid,
                current: self.percent_complete,
                requested: percent,
            });
        }
        self.percent_complete = percent;
        Ok(())
    }

    /// Mark the task as succeeded.
    pub fn mark_success(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Success)?;
        self.percent_complete = 100.0;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as failed.
    pub fn mark_failure(&mut self, error: ErrorDetail) -> Result<(), StateError> {
        self.transition(TaskStatus::Failure)?;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the task as aborted by an operator.
    pub fn mark_aborted(&mut self) -> Result<(), StateError> {
        self.transition(TaskStatus::Aborted)?;
        self.error = Some(ErrorDetail::new(
            ErrorKind::Cancelled,
            "task cancelled by operator",
        ));
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// Progress for `completed` out of `total` groups.
///
/// An empty plan is complete by definition.
pub fn progress_percent(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    (completed as f64 / total as f64) * 100.0
}
