//! Retry of transient infrastructure failures.

use commissioner::testing::{FakeInfrastructure, TestHarness};
use commissioner::{
    ErrorKind, Event, InfraError, OpResponse, RetryPolicy, TaskStatus, TaskType,
};
use std::time::Duration;

const DNS_OP: &str = "dns.manipulate_record";

#[tokio::test]
async fn test_transient_dns_failures_are_retried() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        DNS_OP,
        2,
        InfraError::Unavailable("provider throttled".into()),
    );
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let state = harness
        .submit_and_wait(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Success);
    assert_eq!(state.retries_used, 2);
    assert_eq!(harness.infrastructure.invocations(DNS_OP).await, 3);

    let retries = harness
        .events
        .events_for(&state.task_uuid)
        .await
        .into_iter()
        .filter(|e| matches!(e, Event::GroupRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
}

#[tokio::test]
async fn test_exhausted_retry_budget_fails_transient() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        DNS_OP,
        10,
        InfraError::Unavailable("provider down".into()),
    );
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .with_retry_policy(RetryPolicy::fixed(2, Duration::from_millis(5)))
        .build()
        .await;

    let state = harness
        .submit_and_wait(TaskType::ManipulateDnsRecord, harness.dns_params("edit"))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Failure);
    assert_eq!(state.retries_used, 2);
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Transient);
    assert!(error.message.contains("provider down"));
    assert_eq!(harness.infrastructure.invocations(DNS_OP).await, 3);
}

#[tokio::test]
async fn test_error_response_is_not_retried() {
    let infrastructure =
        FakeInfrastructure::new().respond_with(DNS_OP, OpResponse::error(2, "zone not found"));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let state = harness
        .submit_and_wait(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Failure);
    assert_eq!(state.retries_used, 0);
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Permanent);
    assert!(error.message.contains("zone not found"));
    assert_eq!(harness.infrastructure.invocations(DNS_OP).await, 1);
}

#[tokio::test]
async fn test_rejected_request_is_not_retried() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        "node.provision",
        1,
        InfraError::Rejected("quota exceeded".into()),
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
    let error = state.error.unwrap();
    assert_eq!(error.kind, ErrorKind::Permanent);
    assert_eq!(error.group.as_deref(), Some("ProvisionNodes"));
    assert_eq!(harness.infrastructure.invocations("node.configure").await, 0);
}

#[tokio::test]
async fn test_retry_reruns_the_failed_group_only() {
    let infrastructure = FakeInfrastructure::new().fail_times(
        "node.start_tserver",
        1,
        InfraError::Unavailable("master not ready".into()),
    );
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let state = harness
        .submit_and_wait(TaskType::CreateUniverse, harness.create_universe_params(&["n1"]))
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Success);
    assert_eq!(state.retries_used, 1);
    assert_eq!(harness.infrastructure.invocations("node.provision").await, 1);
    assert_eq!(harness.infrastructure.invocations("node.configure").await, 1);
    assert_eq!(harness.infrastructure.invocations("node.start_master").await, 2);
    assert_eq!(harness.infrastructure.invocations("node.start_tserver").await, 2);
}
