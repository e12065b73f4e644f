//! Runs one subtask group on the bounded worker pool.
//!
//! Every subtask invocation holds a permit from a semaphore shared by all
//! tasks of the commissioner. Permits are acquired inside the spawned work,
//! so dispatching a concurrent group never blocks the task's worker.

use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info_span, warn};

use crate::core::group::{ExecutionMode, SubTaskGroup};
use crate::core::state::{ErrorDetail, ErrorKind};
use crate::core::subtask::{Outcome, SubTask, SubTaskContext};

/// Result of one subtask invocation.
#[derive(Debug, Clone)]
pub struct SubTaskReport {
    pub subtask: String,
    pub outcome: Outcome,
    /// The subtask panicked instead of returning.
    pub panicked: bool,
    pub duration: Duration,
}

impl SubTaskReport {
    fn panicked(subtask: String, message: String, duration: Duration) -> Self {
        Self {
            subtask,
            outcome: Outcome::Failed(format!("subtask panicked: {message}")),
            panicked: true,
            duration,
        }
    }

    /// Classification of this report's failure, if it failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match &self.outcome {
            Outcome::Succeeded => None,
            Outcome::Retryable(_) => Some(ErrorKind::Transient),
            Outcome::Failed(_) if self.panicked => Some(ErrorKind::SystemFault),
            Outcome::Failed(_) => Some(ErrorKind::Permanent),
        }
    }
}

/// Combined outcome of one group run.
#[derive(Debug, Clone)]
pub struct GroupResult {
    pub group: String,
    /// Reports in declared order. A sequential group that stopped early has
    /// no report for the members it never started.
    pub reports: Vec<SubTaskReport>,
    pub duration: Duration,
}

impl GroupResult {
    /// True when every member ran and succeeded.
    pub fn succeeded(&self) -> bool {
        self.reports.iter().all(|r| r.outcome.is_success())
    }

    /// True when the group failed and every failing member reported
    /// `Retryable`.
    pub fn is_retryable(&self) -> bool {
        let mut failures = self.failures().peekable();
        failures.peek().is_some()
            && failures.all(|r| matches!(r.outcome, Outcome::Retryable(_)))
    }

    /// Reports of members that did not succeed.
    pub fn failures(&self) -> impl Iterator<Item = &SubTaskReport> {
        self.reports.iter().filter(|r| !r.outcome.is_success())
    }

    /// Error detail for the first failing member, in declared order.
    pub fn error_detail(&self) -> Option<ErrorDetail> {
        let failure = self.failures().next()?;
        let kind = failure.error_kind()?;
        let message = failure.outcome.reason().unwrap_or("subtask failed");
        Some(
            ErrorDetail::new(kind, message)
                .in_group(self.group.clone())
                .at_subtask(failure.subtask.clone()),
        )
    }
}

/// Executes groups with a shared concurrency limit.
pub struct GroupRunner {
    max_concurrency: usize,
    semaphore: Arc<Semaphore>,
}

impl GroupRunner {
    /// Create a runner allowing `max_concurrency` subtasks in flight.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency,
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
        }
    }

    /// Get the maximum concurrency limit.
    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Get the number of available permits.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Run a group to completion.
    pub async fn run(&self, group: &SubTaskGroup, ctx: &SubTaskContext) -> GroupResult {
        let start = Instant::now();
        let reports = match group.mode() {
            ExecutionMode::Sequential => self.run_sequential(group, ctx).await,
            ExecutionMode::Concurrent => self.run_concurrent(group, ctx).await,
        };
        GroupResult {
            group: group.name().to_string(),
            reports,
            duration: start.elapsed(),
        }
    }

    async fn run_sequential(
        &self,
        group: &SubTaskGroup,
        ctx: &SubTaskContext,
    ) -> Vec<SubTaskReport> {
        let mut reports = Vec::with_capacity(group.len());
        for subtask in group.subtasks() {
            let span = info_span!("subtask", group = %group.name(), subtask = %subtask.name());
            let report = run_subtask(
                Arc::clone(subtask),
                ctx.clone(),
                Arc::clone(&self.semaphore),
            )
            .instrument(span)
            .await;
            let stop = !report.outcome.is_success();
            reports.push(report);
            if stop {
                break;
            }
        }
        reports
    }

    async fn run_concurrent(
        &self,
        group: &SubTaskGroup,
        ctx: &SubTaskContext,
    ) -> Vec<SubTaskReport> {
        let start = Instant::now();
        let mut handles = Vec::with_capacity(group.len());
        for subtask in group.subtasks() {
            let span = info_span!("subtask", group = %group.name(), subtask = %subtask.name());
            let name = subtask.name().to_string();
            let handle = tokio::spawn(
                run_subtask(
                    Arc::clone(subtask),
                    ctx.clone(),
                    Arc::clone(&self.semaphore),
                )
                .instrument(span),
            );
            handles.push((name, handle));
        }

        // Join point: wait for every member, keep declared order.
        let mut reports = Vec::with_capacity(handles.len());
        for (name, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => SubTaskReport::panicked(name, e.to_string(), start.elapsed()),
            };
            reports.push(report);
        }
        reports
    }
}

impl Default for GroupRunner {
    fn default() -> Self {
        Self::new(4)
    }
}

async fn run_subtask(
    subtask: Arc<dyn SubTask>,
    ctx: SubTaskContext,
    semaphore: Arc<Semaphore>,
) -> SubTaskReport {
    let start = Instant::now();
    let name = subtask.name().to_string();

    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => {
            return SubTaskReport {
                subtask: name,
                outcome: Outcome::Failed("worker pool closed".to_string()),
                panicked: false,
                duration: start.elapsed(),
            };
        }
    };

    let result = AssertUnwindSafe(subtask.execute(&ctx)).catch_unwind().await;
    let duration = start.elapsed();

    let report = match result {
        Ok(result) => SubTaskReport {
            subtask: name,
            outcome: Outcome::from_result(result, subtask.retryable()),
            panicked: false,
            duration,
        },
        Err(payload) => SubTaskReport::panicked(name, panic_message(payload), duration),
    };

    match &report.outcome {
        Outcome::Succeeded => {
            debug!(duration_ms = duration.as_millis() as u64, "subtask succeeded")
        }
        Outcome::Retryable(reason) => warn!(reason = %reason, "subtask failed, retryable"),
        Outcome::Failed(reason) => warn!(reason = %reason, panicked = report.panicked, "subtask failed"),
    }
    report
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
