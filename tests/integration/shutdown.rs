//! Graceful shutdown behavior.

use commissioner::testing::{FakeInfrastructure, TestHarness};
use commissioner::{CommissionerError, TaskStatus, TaskType};
use std::time::Duration;

#[tokio::test]
async fn test_shutdown_waits_for_in_flight_tasks() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(100));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let mut tasks = Vec::new();
    for _ in 0..3 {
        tasks.push(
            harness
                .commissioner
                .submit(TaskType::ManipulateDnsRecord, harness.dns_params("edit"))
                .await
                .unwrap(),
        );
    }

    let remaining = harness
        .commissioner
        .shutdown_with_timeout(Duration::from_secs(5))
        .await;
    assert_eq!(remaining, 0);
    assert!(harness.commissioner.in_flight().await.is_empty());

    for task_uuid in &tasks {
        let state = harness.commissioner.status(task_uuid).await.unwrap();
        assert_eq!(state.status, TaskStatus::Success);
    }
}

#[tokio::test]
async fn test_shutdown_rejects_new_submissions() {
    let harness = TestHarness::builder().build().await;

    assert_eq!(harness.commissioner.shutdown().await, 0);
    assert!(!harness.commissioner.is_accepting());

    let err = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap_err();
    assert!(matches!(err, CommissionerError::ShuttingDown));
    assert!(harness.commissioner.list(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_shutdown_timeout_cancels_stragglers() {
    let infrastructure =
        FakeInfrastructure::new().with_delay("node.provision", Duration::from_millis(300));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::CreateUniverse, harness.create_universe_params(&["n1"]))
        .await
        .unwrap();

    let remaining = harness
        .commissioner
        .shutdown_with_timeout(Duration::from_millis(50))
        .await;
    assert_eq!(remaining, 1);

    // The straggler stops at its next group boundary.
    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Aborted);
    assert_eq!(harness.infrastructure.invocations("node.configure").await, 0);
}
