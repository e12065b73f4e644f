//! Audit record lifecycle.

use commissioner::testing::{FakeInfrastructure, TestHarness};
use commissioner::{
    AuditLog, AuditError, ErrorKind, InfraError, TaskStatus, TaskType, TaskUuid,
};
use serde_json::json;
use std::time::Duration;

#[tokio::test]
async fn test_record_created_at_submission() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(200));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let params = harness
        .dns_params("create")
        .with_description("Create DNS entry for universe orders");
    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, params)
        .await
        .unwrap();

    let record = harness.audit.get_record(&task_uuid).await.unwrap();
    assert_eq!(record.task_type, TaskType::ManipulateDnsRecord);
    assert_eq!(record.target_uuid, Some(harness.universe_uuid()));
    assert_eq!(record.creator.as_deref(), Some("admin@example.com"));
    assert_eq!(
        record.description.as_deref(),
        Some("Create DNS entry for universe orders")
    );
    assert!(!record.is_finalized());

    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);

    let record = harness.audit.get_record(&task_uuid).await.unwrap();
    assert!(record.is_finalized());
    assert_eq!(record.status, TaskStatus::Success);
    assert!(record.error.is_none());
    assert!(record.completed_at.unwrap() >= record.created_at);
}

#[tokio::test]
async fn test_record_carries_failure() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        "node.configure",
        1,
        InfraError::Rejected("invalid gflag".into()),
    );
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let state = harness
        .submit_and_wait(TaskType::CreateUniverse, harness.create_universe_params(&["n1"]))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Failure);

    let record = harness.audit.get_record(&state.task_uuid).await.unwrap();
    assert_eq!(record.status, TaskStatus::Failure);
    assert_eq!(record.error, state.error);
    let error = record.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Permanent);
    assert_eq!(error.group.as_deref(), Some("ConfigureServers"));
    assert!(error.message.contains("invalid gflag"));
}

#[tokio::test]
async fn test_rejected_submission_leaves_no_record() {
    let harness = TestHarness::builder().build().await;
    let mut params = harness.dns_params("create");
    params.body["node_ips"] = json!([]);

    assert!(
        harness
            .commissioner
            .submit(TaskType::ManipulateDnsRecord, params)
            .await
            .is_err()
    );
    assert!(harness.audit.list_records(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unknown_record() {
    let harness = TestHarness::builder().build().await;
    let task_uuid = TaskUuid::new();

    let err = harness.audit.get_record(&task_uuid).await.unwrap_err();
    assert!(matches!(err, AuditError::NotFound(id) if id == task_uuid));
}
