//! Cancellation and wait timeouts.

use crate::common::wait_for_status;
use commissioner::testing::{FakeInfrastructure, TestHarness};
use commissioner::{
    AuditLog, CommissionerError, ErrorKind, InfraError, RetryPolicy, TaskStatus, TaskType,
};
use std::time::Duration;

#[tokio::test]
async fn test_cancel_stops_at_next_group_boundary() {
    let infrastructure =
        FakeInfrastructure::new().with_delay("node.provision", Duration::from_millis(200));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::CreateUniverse, harness.create_universe_params(&["n1", "n2"]))
        .await
        .unwrap();
    wait_for_status(
        &harness.commissioner,
        &task_uuid,
        TaskStatus::Running,
        Duration::from_secs(2),
    )
    .await;

    harness.commissioner.cancel(&task_uuid).await.unwrap();
    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Aborted);
    assert_eq!(state.error.unwrap().kind, ErrorKind::Cancelled);
    assert!(state.percent_complete < 100.0);
    // The running group finishes, nothing after it starts.
    assert_eq!(harness.infrastructure.invocations("node.provision").await, 2);
    assert_eq!(harness.infrastructure.invocations("node.configure").await, 0);

    let stored = harness.store.get_task(&task_uuid).await.unwrap();
    assert_eq!(stored.status, TaskStatus::Aborted);
}

#[tokio::test]
async fn test_cancel_during_final_group_aborts() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(300));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();
    wait_for_status(
        &harness.commissioner,
        &task_uuid,
        TaskStatus::Running,
        Duration::from_secs(2),
    )
    .await;

    harness.commissioner.cancel(&task_uuid).await.unwrap();
    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();

    // The operation in progress completes, the task still ends Aborted.
    assert_eq!(state.status, TaskStatus::Aborted);
    assert_eq!(state.percent_complete, 0.0);
    assert_eq!(
        harness.infrastructure.invocations("dns.manipulate_record").await,
        1
    );
    let record = harness.audit.get_record(&task_uuid).await.unwrap();
    assert_eq!(record.status, TaskStatus::Aborted);
}

#[tokio::test]
async fn test_cancel_during_retry_backoff() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        "dns.manipulate_record",
        5,
        InfraError::Unavailable("provider throttled".into()),
    );
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .with_retry_policy(RetryPolicy::fixed(5, Duration::from_secs(10)))
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();

    // Wait until the first retry has been scheduled.
    let start = tokio::time::Instant::now();
    while harness.commissioner.status(&task_uuid).await.unwrap().retries_used == 0 {
        assert!(start.elapsed() < Duration::from_secs(2), "retry never scheduled");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    harness.commissioner.cancel(&task_uuid).await.unwrap();
    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Aborted);
    assert_eq!(
        harness.infrastructure.invocations("dns.manipulate_record").await,
        1
    );
}

#[tokio::test]
async fn test_cancel_finished_task_is_invalid() {
    let harness = TestHarness::builder().build().await;
    let state = harness
        .submit_and_wait(TaskType::ManipulateDnsRecord, harness.dns_params("delete"))
        .await
        .unwrap();

    let err = harness
        .commissioner
        .cancel(&state.task_uuid)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommissionerError::InvalidState { status: TaskStatus::Success, .. }
    ));
}

#[tokio::test]
async fn test_wait_timeout_leaves_task_running() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(300));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("edit"))
        .await
        .unwrap();

    let err = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_millis(10))
        .await
        .unwrap_err();
    assert!(matches!(err, CommissionerError::Timeout { task_uuid: id, .. } if id == task_uuid));

    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);
}

#[tokio::test]
async fn test_concurrent_waiters_see_the_same_terminal_state() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(50));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();

    let waiters: Vec<_> = (0..4)
        .map(|_| {
            let commissioner = harness.commissioner.clone();
            tokio::spawn(async move {
                commissioner
                    .wait_for_task(&task_uuid, Duration::from_secs(5))
                    .await
            })
        })
        .collect();

    for waiter in waiters {
        let state = waiter.await.unwrap().unwrap();
        assert_eq!(state.status, TaskStatus::Success);
        assert_eq!(state.task_uuid, task_uuid);
    }
}
