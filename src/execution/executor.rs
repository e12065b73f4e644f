//! Task execution engine.
//!
//! The `TaskExecutor` drives one task's groups in declared order with:
//! - Retry of failed retryable groups against the task's retry budget
//! - Cooperative cancellation at group boundaries and during retry backoff
//! - Persistence of the task state after every transition
//! - Lifecycle events for every group run and the terminal state

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use super::group_runner::GroupRunner;
use crate::core::group::SubTaskGroup;
use crate::core::retry::RetryPolicy;
use crate::core::state::{ErrorDetail, ErrorKind, TaskState, progress_percent};
use crate::core::subtask::SubTaskContext;
use crate::events::{Event, EventBus};
use crate::storage::{StorageError, TaskStateStore};

/// Everything the executor needs to drive one task.
pub struct TaskRun {
    /// Current state, as persisted at submission.
    pub state: TaskState,
    pub groups: Vec<SubTaskGroup>,
    pub retry_policy: RetryPolicy,
    /// Base context; the executor fills in group and attempt.
    pub context: SubTaskContext,
}

enum Terminal {
    Success,
    Failure(ErrorDetail),
    Aborted,
}

/// Executor for running tasks group by group.
pub struct TaskExecutor {
    runner: Arc<GroupRunner>,
    store: Arc<dyn TaskStateStore>,
    event_bus: Option<Arc<EventBus>>,
}

impl TaskExecutor {
    /// Create a new executor persisting through `store`.
    pub fn new(runner: Arc<GroupRunner>, store: Arc<dyn TaskStateStore>) -> Self {
        Self {
            runner,
            store,
            event_bus: None,
        }
    }

    /// Builder: emit lifecycle events on `bus`.
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    /// Run a task to a terminal state.
    ///
    /// Every persisted state is also published on `updates`. The returned
    /// state is terminal.
    pub async fn execute(
        &self,
        run: TaskRun,
        cancel: CancellationToken,
        updates: watch::Sender<TaskState>,
    ) -> TaskState {
        let span = info_span!(
            "task_execution",
            task_uuid = %run.state.task_uuid,
            task_type = %run.state.task_type,
            group_count = run.groups.len(),
        );
        self.execute_inner(run, cancel, updates).instrument(span).await
    }

    async fn execute_inner(
        &self,
        run: TaskRun,
        cancel: CancellationToken,
        updates: watch::Sender<TaskState>,
    ) -> TaskState {
        let TaskRun {
            mut state,
            groups,
            retry_policy,
            context,
        } = run;
        let total = groups.len();
        let start = Instant::now();

        // Cancelled before pickup.
        if cancel.is_cancelled() {
            return self.finish(&state, Terminal::Aborted, &updates).await;
        }

        if let Err(e) = state.mark_running() {
            error!(error = %e, "cannot start task");
            return self
                .finish(&state, Terminal::Failure(system_fault(e)), &updates)
                .await;
        }
        if let Err(e) = self.checkpoint(&state, &updates).await {
            return self.storage_failure(&state, e, &updates).await;
        }
        self.emit(Event::task_started(state.task_uuid, state.task_type, total))
            .await;
        info!("task started");

        let mut completed = 0usize;
        for (index, group) in groups.iter().enumerate() {
            if cancel.is_cancelled() {
                info!(completed, total, "cancellation observed before group");
                return self.finish(&state, Terminal::Aborted, &updates).await;
            }

            let mut attempt = 1u32;
            loop {
                self.emit(Event::group_started(
                    state.task_uuid,
                    group.name(),
                    index,
                    attempt,
                ))
                .await;
                debug!(group = %group.name(), attempt, "running group");

                let result = self
                    .runner
                    .run(group, &context.for_group(group.name(), attempt))
                    .await;

                if result.succeeded() {
                    completed += 1;
                }
                let percent = progress_percent(completed, total);
                self.emit(Event::group_completed(
                    state.task_uuid,
                    group.name(),
                    index,
                    result.succeeded(),
                    result.duration,
                    percent,
                ))
                .await;

                if result.succeeded() {
                    // 100 is only reported together with Success.
                    if completed < total {
                        if let Err(e) = state.set_progress(percent) {
                            warn!(error = %e, "progress not recorded");
                        }
                        if let Err(e) = self.checkpoint(&state, &updates).await {
                            return self.storage_failure(&state, e, &updates).await;
                        }
                    }
                    // A cancel requested while this group ran, the last one
                    // included, ends the task here.
                    if cancel.is_cancelled() {
                        info!(
                            group = %group.name(),
                            completed,
                            total,
                            "cancellation observed after group"
                        );
                        return self.finish(&state, Terminal::Aborted, &updates).await;
                    }
                    break;
                }

                // Cancellation wins over the group's own failure.
                if cancel.is_cancelled() {
                    info!(group = %group.name(), "group failed after cancellation was requested");
                    return self.finish(&state, Terminal::Aborted, &updates).await;
                }

                let detail = result.error_detail().unwrap_or_else(|| {
                    ErrorDetail::new(ErrorKind::Permanent, "group failed").in_group(group.name())
                });

                let may_retry = result.is_retryable()
                    && group.is_retryable()
                    && retry_policy.should_retry(state.retries_used);
                if !may_retry {
                    return self.finish(&state, Terminal::Failure(detail), &updates).await;
                }

                state.retries_used += 1;
                let delay = retry_policy.delay_for(state.retries_used);
                if let Err(e) = self.checkpoint(&state, &updates).await {
                    return self.storage_failure(&state, e, &updates).await;
                }
                self.emit(Event::group_retrying(
                    state.task_uuid,
                    group.name(),
                    state.retries_used,
                    retry_policy.max_retries,
                    delay,
                    detail.message.clone(),
                ))
                .await;

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        info!(group = %group.name(), "retry abandoned, task cancelled");
                        return self.finish(&state, Terminal::Aborted, &updates).await;
                    }
                }
                attempt += 1;
            }
        }

        debug!(duration_ms = start.elapsed().as_millis() as u64, "all groups completed");
        self.finish(&state, Terminal::Success, &updates).await
    }

    /// Persist a non-terminal state and publish it.
    async fn checkpoint(
        &self,
        state: &TaskState,
        updates: &watch::Sender<TaskState>,
    ) -> Result<(), StorageError> {
        self.store.update_task(state).await?;
        updates.send_replace(state.clone());
        Ok(())
    }

    async fn storage_failure(
        &self,
        state: &TaskState,
        err: StorageError,
        updates: &watch::Sender<TaskState>,
    ) -> TaskState {
        error!(error = %err, "failed to persist task state");
        let detail = ErrorDetail::new(
            ErrorKind::Storage,
            format!("failed to persist task state: {err}"),
        );
        self.finish(state, Terminal::Failure(detail), updates).await
    }

    /// Apply the terminal transition, persist, notify, then publish.
    async fn finish(
        &self,
        state: &TaskState,
        terminal: Terminal,
        updates: &watch::Sender<TaskState>,
    ) -> TaskState {
        let mut final_state = state.clone();
        let transition = match terminal {
            Terminal::Success => final_state.mark_success(),
            Terminal::Failure(detail) => final_state.mark_failure(detail),
            Terminal::Aborted => final_state.mark_aborted(),
        };
        if let Err(e) = transition {
            error!(error = %e, "invalid terminal transition");
        }

        if let Err(err) = self.store.update_task(&final_state).await {
            error!(error = %err, status = %final_state.status, "failed to persist terminal state");
            // The in-memory record reports the storage failure instead.
            if final_state.error.as_ref().map(|e| e.kind) != Some(ErrorKind::Storage) {
                final_state = state.clone();
                let detail = ErrorDetail::new(
                    ErrorKind::Storage,
                    format!("failed to persist task state: {err}"),
                );
                if let Err(e) = final_state.mark_failure(detail) {
                    error!(error = %e, "invalid terminal transition");
                }
                if let Err(e) = self.store.update_task(&final_state).await {
                    error!(error = %e, "state store unavailable");
                }
            }
        }

        match &final_state.error {
            Some(detail) => warn!(status = %final_state.status, error = %detail, "task finished"),
            None => info!(status = %final_state.status, "task finished"),
        }
        // Handlers run before waiters observe the terminal state.
        self.emit(Event::task_finished(&final_state)).await;
        updates.send_replace(final_state.clone());
        final_state
    }

    async fn emit(&self, event: Event) {
        if let Some(bus) = &self.event_bus {
            bus.emit(event).await;
        }
    }
}

fn system_fault(e: impl std::fmt::Display) -> ErrorDetail {
    ErrorDetail::new(ErrorKind::SystemFault, e.to_string())
}
