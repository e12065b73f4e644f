//! Common test utilities shared across integration tests.

use commissioner::{Commissioner, TaskState, TaskStatus, TaskUuid};
use std::time::Duration;

/// Wait for a task to reach an expected status, polling the commissioner.
///
/// Polls every 5ms and times out after the specified duration.
///
/// # Panics
///
/// Panics if the timeout is reached before the task reaches the expected status.
pub async fn wait_for_status(
    commissioner: &Commissioner,
    task_uuid: &TaskUuid,
    expected: TaskStatus,
    timeout: Duration,
) -> TaskState {
    let start = tokio::time::Instant::now();
    loop {
        let state = commissioner.status(task_uuid).await.unwrap();
        if state.status == expected {
            return state;
        }
        if start.elapsed() > timeout {
            panic!(
                "Timeout waiting for task {} to reach {}, current status: {}",
                task_uuid, expected, state.status
            );
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Poll a task's status until it is terminal, recording every snapshot.
pub async fn observe_until_terminal(
    commissioner: &Commissioner,
    task_uuid: &TaskUuid,
    timeout: Duration,
) -> Vec<TaskState> {
    let start = tokio::time::Instant::now();
    let mut observed = Vec::new();
    loop {
        let state = commissioner.status(task_uuid).await.unwrap();
        let terminal = state.is_terminal();
        observed.push(state);
        if terminal {
            return observed;
        }
        if start.elapsed() > timeout {
            panic!("Timeout observing task {}", task_uuid);
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Position of a status in the lifecycle.
pub fn lifecycle_rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Created => 0,
        TaskStatus::Running => 1,
        TaskStatus::Success | TaskStatus::Failure | TaskStatus::Aborted => 2,
    }
}
