//! Lifecycle events and event handling.
//!
//! The commissioner and its executors emit events for every submission,
//! group run, retry and terminal state. The terminal event carries the
//! [`AuditNotification`] consumed by the audit collaborator.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::core::state::{ErrorDetail, TaskState, TaskStatus};
use crate::core::types::{TaskType, TaskUuid};

/// Terminal-state notification for the audit collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditNotification {
    pub task_uuid: TaskUuid,
    pub task_type: TaskType,
    pub status: TaskStatus,
    pub error: Option<ErrorDetail>,
}

impl AuditNotification {
    /// Build a notification from a terminal state.
    pub fn from_state(state: &TaskState) -> Self {
        Self {
            task_uuid: state.task_uuid,
            task_type: state.task_type,
            status: state.status,
            error: state.error.clone(),
        }
    }
}

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A submission was accepted.
    TaskSubmitted {
        task_uuid: TaskUuid,
        task_type: TaskType,
        target_uuid: Option<Uuid>,
        creator: Option<String>,
        description: Option<String>,
        timestamp: Instant,
    },

    /// The executor picked the task up.
    TaskStarted {
        task_uuid: TaskUuid,
        task_type: TaskType,
        group_count: usize,
        timestamp: Instant,
    },

    /// A group run started.
    GroupStarted {
        task_uuid: TaskUuid,
        group: String,
        /// Position of the group in the plan (0-indexed).
        index: usize,
        /// Run of this group, starting at 1.
        attempt: u32,
        timestamp: Instant,
    },

    /// A group run finished.
    GroupCompleted {
        task_uuid: TaskUuid,
        group: String,
        index: usize,
        success: bool,
        duration: Duration,
        percent_complete: f64,
        timestamp: Instant,
    },

    /// A failed group is about to be re-run.
    ///
    /// Emitted before the backoff delay so consumers observe retries as
    /// they are scheduled.
    GroupRetrying {
        task_uuid: TaskUuid,
        group: String,
        /// Retry number for the task (1-indexed).
        retry: u32,
        /// The task's retry budget.
        max_retries: u32,
        delay: Duration,
        reason: String,
        timestamp: Instant,
    },

    /// The task reached a terminal state.
    TaskFinished {
        notification: AuditNotification,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TaskSubmitted { timestamp, .. } => *timestamp,
            Event::TaskStarted { timestamp, .. } => *timestamp,
            Event::GroupStarted { timestamp, .. } => *timestamp,
            Event::GroupCompleted { timestamp, .. } => *timestamp,
            Event::GroupRetrying { timestamp, .. } => *timestamp,
            Event::TaskFinished { timestamp, .. } => *timestamp,
        }
    }

    /// Get the task the event belongs to.
    pub fn task_uuid(&self) -> TaskUuid {
        match self {
            Event::TaskSubmitted { task_uuid, .. }
            | Event::TaskStarted { task_uuid, .. }
            | Event::GroupStarted { task_uuid, .. }
            | Event::GroupCompleted { task_uuid, .. }
            | Event::GroupRetrying { task_uuid, .. } => *task_uuid,
            Event::TaskFinished { notification, .. } => notification.task_uuid,
        }
    }

    /// Create a TaskSubmitted event.
    pub fn task_submitted(
        task_uuid: TaskUuid,
        task_type: TaskType,
        target_uuid: Option<Uuid>,
        creator: Option<String>,
        description: Option<String>,
    ) -> Self {
        Event::TaskSubmitted {
            task_uuid,
            task_type,
            target_uuid,
            creator,
            description,
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskStarted event.
    pub fn task_started(task_uuid: TaskUuid, task_type: TaskType, group_count: usize) -> Self {
        Event::TaskStarted {
            task_uuid,
            task_type,
            group_count,
            timestamp: Instant::now(),
        }
    }

    /// Create a GroupStarted event.
    pub fn group_started(
        task_uuid: TaskUuid,
        group: impl Into<String>,
        index: usize,
        attempt: u32,
    ) -> Self {
        Event::GroupStarted {
            task_uuid,
            group: group.into(),
            index,
            attempt,
            timestamp: Instant::now(),
        }
    }

    /// Create a GroupCompleted event.
    pub fn group_completed(
        task_uuid: TaskUuid,
        group: impl Into<String>,
        index: usize,
        success: bool,
        duration: Duration,
        percent_complete: f64,
    ) -> Self {
        Event::GroupCompleted {
            task_uuid,
            group: group.into(),
            index,
            success,
            duration,
            percent_complete,
            timestamp: Instant::now(),
        }
    }

    /// Create a GroupRetrying event.
    pub fn group_retrying(
        task_uuid: TaskUuid,
        group: impl Into<String>,
        retry: u32,
        max_retries: u32,
        delay: Duration,
        reason: impl Into<String>,
    ) -> Self {
        Event::GroupRetrying {
            task_uuid,
            group: group.into(),
            retry,
            max_retries,
            delay,
            reason: reason.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a TaskFinished event from a terminal state.
    pub fn task_finished(state: &TaskState) -> Self {
        Event::TaskFinished {
            notification: AuditNotification::from_state(state),
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Event handler that logs lifecycle events through `tracing`.
pub struct LoggingHandler;

#[async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::TaskSubmitted {
                task_uuid,
                task_type,
                creator,
                ..
            } => {
                tracing::info!(task_uuid = %task_uuid, task_type = %task_type, creator = ?creator, "task submitted");
            }
            Event::TaskStarted {
                task_uuid,
                group_count,
                ..
            } => {
                tracing::info!(task_uuid = %task_uuid, group_count, "task started");
            }
            Event::GroupStarted {
                task_uuid,
                group,
                attempt,
                ..
            } => {
                tracing::debug!(task_uuid = %task_uuid, group = %group, attempt, "group started");
            }
            Event::GroupCompleted {
                task_uuid,
                group,
                success,
                duration,
                percent_complete,
                ..
            } => {
                tracing::info!(
                    task_uuid = %task_uuid,
                    group = %group,
                    success,
                    duration_ms = duration.as_millis() as u64,
                    percent_complete,
                    "group completed"
                );
            }
            Event::GroupRetrying {
                task_uuid,
                group,
                retry,
                max_retries,
                delay,
                reason,
                ..
            } => {
                tracing::warn!(
                    task_uuid = %task_uuid,
                    group = %group,
                    retry,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    reason = %reason,
                    "retrying group"
                );
            }
            Event::TaskFinished { notification, .. } => match &notification.error {
                Some(error) => tracing::warn!(
                    task_uuid = %notification.task_uuid,
                    status = %notification.status,
                    error = %error,
                    "task finished"
                ),
                None => tracing::info!(
                    task_uuid = %notification.task_uuid,
                    status = %notification.status,
                    "task finished"
                ),
            },
        }
    }
}
