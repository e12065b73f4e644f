//! Commissioner implementation.
//!
//! The commissioner is responsible for:
//! - Validating submissions and building their plans
//! - Allocating task identity and the initial persisted state
//! - Spawning one executor per task
//! - Status, cancellation and waiting on in-flight tasks
//! - Recovery of records interrupted by a restart
//! - Graceful shutdown

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{RwLock, watch};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::types::{CommissionerError, InFlight};
use crate::config::CommissionerConfig;
use crate::core::infra::Collaborators;
use crate::core::params::TaskParams;
use crate::core::retry::RetryPolicy;
use crate::core::state::{ErrorDetail, ErrorKind, TaskState};
use crate::core::subtask::SubTaskContext;
use crate::core::types::{TaskType, TaskUuid};
use crate::events::{Event, EventBus};
use crate::execution::{GroupRunner, TaskExecutor, TaskRun};
use crate::storage::{StorageError, TaskStateStore};
use crate::tasks::TaskRegistry;

/// Interval between checks for finished workers during shutdown.
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Public entry point of the orchestration core.
///
/// Cloning is cheap; clones share the same in-flight directory.
#[derive(Clone)]
pub struct Commissioner {
    store: Arc<dyn TaskStateStore>,
    event_bus: Arc<EventBus>,
    registry: TaskRegistry,
    collaborators: Collaborators,
    runner: Arc<GroupRunner>,
    retry_policy: RetryPolicy,
    shutdown_timeout: Duration,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<RwLock<HashMap<TaskUuid, InFlight>>>,
    /// Terminal states that could not be persisted, keyed by task.
    persistence_failures: Arc<RwLock<HashMap<TaskUuid, TaskState>>>,
}

impl Commissioner {
    /// Create a commissioner with the built-in task types and default
    /// configuration.
    pub fn new(store: Arc<dyn TaskStateStore>, collaborators: Collaborators) -> Self {
        Self::from_config(&CommissionerConfig::default(), store, collaborators)
    }

    /// Create a commissioner from configuration.
    pub fn from_config(
        config: &CommissionerConfig,
        store: Arc<dyn TaskStateStore>,
        collaborators: Collaborators,
    ) -> Self {
        Self {
            store,
            event_bus: Arc::new(EventBus::new()),
            registry: TaskRegistry::builtin(),
            collaborators,
            runner: Arc::new(GroupRunner::new(config.max_concurrent_subtasks.max(1))),
            retry_policy: config.retry.to_policy(),
            shutdown_timeout: config.shutdown_timeout(),
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(RwLock::new(HashMap::new())),
            persistence_failures: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Set the event bus lifecycle events are emitted on.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Set the retry policy for tasks whose plan does not carry one.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the bound on subtasks running at once across all tasks.
    pub fn with_max_concurrent_subtasks(mut self, max: usize) -> Self {
        self.runner = Arc::new(GroupRunner::new(max.max(1)));
        self
    }

    /// Set how long [`Commissioner::shutdown`] waits for in-flight tasks.
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.registry
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Accept a task and start it in the background.
    ///
    /// Returns once the task's state is persisted; execution continues
    /// after the call returns. Validation failures are reported here and
    /// leave no record behind.
    pub async fn submit(
        &self,
        task_type: TaskType,
        params: TaskParams,
    ) -> Result<TaskUuid, CommissionerError> {
        if !self.is_accepting() {
            return Err(CommissionerError::ShuttingDown);
        }

        let builder = self
            .registry
            .get(task_type)
            .ok_or(CommissionerError::UnknownTaskType(task_type))?;
        builder.validate(&params, &self.collaborators).await?;
        let plan = builder.build(&params, &self.collaborators)?;

        let task_uuid = TaskUuid::new();
        let state = TaskState::new(task_uuid, task_type);
        self.store.insert_task(&state).await?;

        self.event_bus
            .emit(Event::task_submitted(
                task_uuid,
                task_type,
                params.target_uuid,
                params.creator.clone(),
                params.description.clone(),
            ))
            .await;

        let group_count = plan.groups.len();
        let run = TaskRun {
            state: state.clone(),
            groups: plan.groups,
            retry_policy: plan
                .retry_policy
                .unwrap_or_else(|| self.retry_policy.clone()),
            context: SubTaskContext::new(task_uuid, task_type).with_creator(params.creator),
        };
        let (updates_tx, updates_rx) = watch::channel(state);
        let cancel = CancellationToken::new();
        let executor = TaskExecutor::new(self.runner.clone(), self.store.clone())
            .with_event_bus(self.event_bus.clone());

        // Holding the write lock keeps the worker from deregistering the
        // task before it is registered.
        let mut in_flight = self.in_flight.write().await;
        let worker_cancel = cancel.clone();
        let directory = self.in_flight.clone();
        let persistence_failures = self.persistence_failures.clone();
        let handle = tokio::spawn(async move {
            let final_state = executor.execute(run, worker_cancel, updates_tx).await;
            if is_persistence_failure(&final_state) {
                persistence_failures
                    .write()
                    .await
                    .insert(task_uuid, final_state);
            }
            directory.write().await.remove(&task_uuid);
        });
        in_flight.insert(
            task_uuid,
            InFlight {
                cancel,
                updates: updates_rx,
                handle,
            },
        );
        drop(in_flight);

        info!(task_uuid = %task_uuid, task_type = %task_type, group_count, "task accepted");
        Ok(task_uuid)
    }

    /// Snapshot of a task's state.
    pub async fn status(&self, task_uuid: &TaskUuid) -> Result<TaskState, CommissionerError> {
        if let Some(state) = self.persistence_failures.read().await.get(task_uuid) {
            return Err(persistence_error(state));
        }

        let live = self
            .in_flight
            .read()
            .await
            .get(task_uuid)
            .map(InFlight::snapshot);
        if let Some(state) = live {
            return surface(state);
        }

        match self.store.get_task(task_uuid).await {
            Ok(state) => Ok(state),
            Err(StorageError::NotFound(_)) => Err(CommissionerError::NotFound(*task_uuid)),
            Err(e) => Err(e.into()),
        }
    }

    /// Request cooperative cancellation of a running task.
    ///
    /// The task stops at its next group boundary and ends Aborted unless it
    /// finishes first.
    pub async fn cancel(&self, task_uuid: &TaskUuid) -> Result<(), CommissionerError> {
        {
            let in_flight = self.in_flight.read().await;
            if let Some(entry) = in_flight.get(task_uuid) {
                let snapshot = entry.snapshot();
                if snapshot.is_terminal() {
                    return Err(CommissionerError::InvalidState {
                        task_uuid: *task_uuid,
                        status: snapshot.status,
                    });
                }
                entry.cancel.cancel();
                info!(task_uuid = %task_uuid, "cancellation requested");
                return Ok(());
            }
        }

        // Known but not running here: terminal, or left over from another
        // process and awaiting recovery.
        let state = self.status(task_uuid).await?;
        Err(CommissionerError::InvalidState {
            task_uuid: *task_uuid,
            status: state.status,
        })
    }

    /// Wait until a task reaches a terminal state.
    ///
    /// Returns immediately for tasks that are already terminal. On timeout
    /// the task keeps running.
    pub async fn wait_for_task(
        &self,
        task_uuid: &TaskUuid,
        timeout: Duration,
    ) -> Result<TaskState, CommissionerError> {
        let receiver = self
            .in_flight
            .read()
            .await
            .get(task_uuid)
            .map(|entry| entry.updates.clone());

        let Some(mut updates) = receiver else {
            let state = self.status(task_uuid).await?;
            if state.is_terminal() {
                return Ok(state);
            }
            return Err(CommissionerError::InvalidState {
                task_uuid: *task_uuid,
                status: state.status,
            });
        };

        let state = match tokio::time::timeout(timeout, updates.wait_for(TaskState::is_terminal))
            .await
        {
            Ok(Ok(state)) => state.clone(),
            Ok(Err(_)) => {
                return Err(CommissionerError::ChannelError(format!(
                    "executor of task {task_uuid} stopped without a terminal state"
                )));
            }
            Err(_) => {
                return Err(CommissionerError::Timeout {
                    task_uuid: *task_uuid,
                    timeout,
                });
            }
        };
        surface(state)
    }

    /// Most recent tasks, newest first.
    pub async fn list(&self, limit: usize) -> Result<Vec<TaskState>, CommissionerError> {
        Ok(self.store.list_tasks(limit).await?)
    }

    /// Tasks whose executor is alive in this process.
    pub async fn in_flight(&self) -> Vec<TaskUuid> {
        let mut uuids: Vec<TaskUuid> = self.in_flight.read().await.keys().copied().collect();
        uuids.sort();
        uuids
    }

    /// Finalize records left in flight by a previous process.
    ///
    /// Every Created or Running record without a live executor becomes
    /// Failure(Interrupted) and its audit notification is emitted. Call once
    /// at startup, before accepting submissions.
    pub async fn recover(&self) -> Result<Vec<TaskUuid>, CommissionerError> {
        let incomplete = self.store.get_incomplete_tasks().await?;
        let live = self.in_flight().await;
        let mut recovered = Vec::new();

        for mut state in incomplete {
            if live.contains(&state.task_uuid) {
                continue;
            }

            let detail = ErrorDetail::new(ErrorKind::Interrupted, "interrupted by restart");
            if let Err(e) = state.mark_failure(detail) {
                warn!(task_uuid = %state.task_uuid, error = %e, "cannot finalize interrupted task");
                continue;
            }
            if let Err(e) = self.store.update_task(&state).await {
                warn!(
                    task_uuid = %state.task_uuid,
                    error = %e,
                    "failed to persist interrupted task during recovery"
                );
                continue;
            }
            self.event_bus.emit(Event::task_finished(&state)).await;
            recovered.push(state.task_uuid);
        }

        if !recovered.is_empty() {
            info!(count = recovered.len(), "recovered interrupted tasks");
        }
        Ok(recovered)
    }

    /// Stop accepting submissions and wait for in-flight tasks using the
    /// configured shutdown timeout.
    ///
    /// Returns the number of tasks still running when the timeout passed.
    pub async fn shutdown(&self) -> usize {
        self.shutdown_with_timeout(self.shutdown_timeout).await
    }

    /// Stop accepting submissions and wait up to `timeout` for in-flight
    /// tasks.
    ///
    /// Tasks still running at the deadline are asked to cancel; they end
    /// Aborted at their next group boundary.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> usize {
        self.accepting.store(false, Ordering::SeqCst);

        let running_count = self.in_flight.read().await.len();
        if running_count == 0 {
            info!("no in-flight tasks to wait for during shutdown");
            return 0;
        }

        info!(
            running_count,
            timeout = ?timeout,
            "graceful shutdown: waiting for in-flight tasks"
        );

        let start = tokio::time::Instant::now();
        let deadline = start + timeout;

        loop {
            let remaining = {
                let mut in_flight = self.in_flight.write().await;
                in_flight.retain(|_, entry| !entry.handle.is_finished());
                in_flight.len()
            };

            if remaining == 0 {
                info!(elapsed = ?start.elapsed(), "all in-flight tasks completed");
                return 0;
            }

            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining,
                    timeout = ?timeout,
                    "shutdown timeout exceeded, cancelling remaining tasks"
                );
                for entry in self.in_flight.read().await.values() {
                    entry.cancel.cancel();
                }
                return remaining;
            }

            tokio::time::sleep(SHUTDOWN_POLL_INTERVAL).await;
        }
    }
}

fn is_persistence_failure(state: &TaskState) -> bool {
    state
        .error
        .as_ref()
        .is_some_and(|e| e.kind == ErrorKind::Storage)
}

fn persistence_error(state: &TaskState) -> CommissionerError {
    let message = state
        .error
        .as_ref()
        .map(|e| e.message.clone())
        .unwrap_or_else(|| "task state could not be persisted".to_string());
    CommissionerError::Storage(StorageError::Other(message))
}

/// Report a terminal storage failure as an error instead of a state.
fn surface(state: TaskState) -> Result<TaskState, CommissionerError> {
    if is_persistence_failure(&state) {
        Err(persistence_error(&state))
    } else {
        Ok(state)
    }
}
