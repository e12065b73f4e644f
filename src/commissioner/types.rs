//! Commissioner type definitions.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::params::ValidationError;
use crate::core::state::{TaskState, TaskStatus};
use crate::core::types::{TaskType, TaskUuid};
use crate::storage::StorageError;

/// Errors returned by the commissioner.
#[derive(Debug, Error)]
pub enum CommissionerError {
    /// No task with this UUID is known.
    #[error("task not found: {0}")]
    NotFound(TaskUuid),

    /// The operation is not allowed in the task's current status.
    #[error("task {task_uuid} is {status}")]
    InvalidState {
        task_uuid: TaskUuid,
        status: TaskStatus,
    },

    /// The submission was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The task did not reach a terminal state in time. It keeps running.
    #[error("timed out after {timeout:?} waiting for task {task_uuid}")]
    Timeout {
        task_uuid: TaskUuid,
        timeout: Duration,
    },

    /// Storage error.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// No builder is registered for the task type.
    #[error("no builder registered for task type {0}")]
    UnknownTaskType(TaskType),

    /// Submissions are no longer accepted.
    #[error("commissioner is shutting down")]
    ShuttingDown,

    /// Channel error.
    #[error("channel error: {0}")]
    ChannelError(String),
}

/// Bookkeeping for a task whose executor is alive in this process.
pub(crate) struct InFlight {
    pub(crate) cancel: CancellationToken,
    pub(crate) updates: watch::Receiver<TaskState>,
    pub(crate) handle: JoinHandle<()>,
}

impl InFlight {
    /// Latest published state.
    pub(crate) fn snapshot(&self) -> TaskState {
        self.updates.borrow().clone()
    }
}
