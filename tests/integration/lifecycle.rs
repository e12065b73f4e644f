//! Submission to terminal state for the built-in task types.

use crate::common::{lifecycle_rank, observe_until_terminal};
use commissioner::testing::{FakeInfrastructure, TestHarness};
use commissioner::{
    CommissionerError, TaskParams, TaskStatus, TaskType, TaskUuid, ValidationError,
};
use serde_json::json;
use std::collections::HashSet;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test]
async fn test_create_universe_runs_groups_in_order() {
    let harness = TestHarness::builder().build().await;

    let state = harness
        .submit_and_wait(
            TaskType::CreateUniverse,
            harness.create_universe_params(&["n1", "n2", "n3"]),
        )
        .await
        .unwrap();

    assert_eq!(state.status, TaskStatus::Success);
    assert_eq!(state.percent_complete, 100.0);
    assert!(state.error.is_none());
    assert!(state.started_at.is_some());
    assert!(state.completed_at.is_some());

    let ops: Vec<String> = harness
        .infrastructure
        .requests()
        .await
        .into_iter()
        .map(|r| r.op)
        .collect();
    assert_eq!(ops.len(), 3 * 4 + 1);

    // Every provision precedes every configure, which precedes every start.
    let last = |op: &str| ops.iter().rposition(|o| o == op).unwrap();
    let first = |op: &str| ops.iter().position(|o| o == op).unwrap();
    assert!(last("node.provision") < first("node.configure"));
    assert!(last("node.configure") < first("node.start_master"));
    assert!(last("node.start_master") < first("node.start_tserver"));
    assert_eq!(ops.last().map(String::as_str), Some("universe.mark_ready"));
}

#[tokio::test]
async fn test_create_universe_with_dns_entry() {
    let harness = TestHarness::builder().build().await;
    let params = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "nodes": [
            {"name": "n1", "private_ip": "10.0.0.1"},
            {"name": "n2", "private_ip": "10.0.0.2"},
        ],
        "software_version": "2.20.1.0-b97",
        "dns": {
            "provider_uuid": Uuid::new_v4(),
            "hosted_zone_id": "Z0123456789",
            "domain_name_prefix": "orders",
        },
    }));

    let state = harness
        .submit_and_wait(TaskType::CreateUniverse, params)
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);

    let requests = harness.infrastructure.requests().await;
    let dns = requests
        .iter()
        .find(|r| r.op == "dns.manipulate_record")
        .expect("dns request");
    assert_eq!(dns.args["command"], "create");
    assert_eq!(dns.args["node_ips"], json!(["10.0.0.1", "10.0.0.2"]));
    assert_eq!(
        requests.last().map(|r| r.op.as_str()),
        Some("universe.mark_ready")
    );
}

#[tokio::test]
async fn test_dns_record_uses_universe_nodes_when_omitted() {
    let harness = TestHarness::builder().build().await;
    harness
        .universes
        .set_node_ips(harness.universe_uuid(), &["10.0.0.4", "10.0.0.5"]);
    let params = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "provider_uuid": Uuid::new_v4(),
        "command": "create",
    }));

    let state = harness
        .submit_and_wait(TaskType::ManipulateDnsRecord, params)
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);

    let requests = harness.infrastructure.requests().await;
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].args["node_ips"], json!(["10.0.0.4", "10.0.0.5"]));
    assert_eq!(requests[0].args["hosted_zone_id"], "");
}

#[tokio::test]
async fn test_rolling_upgrade_finishes_one_node_before_the_next() {
    let harness = TestHarness::builder().build().await;
    let params = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "kind": "software",
        "target_version": "2.21.0.0-b1",
        "nodes": ["n1", "n2"],
    }));

    let state = harness
        .submit_and_wait(TaskType::UpgradeUniverse, params)
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);

    let calls: Vec<(String, String)> = harness
        .infrastructure
        .requests()
        .await
        .into_iter()
        .map(|r| (r.op, r.args["node"].as_str().unwrap_or_default().to_string()))
        .collect();
    let expected: Vec<(String, String)> = ["n1", "n2"]
        .iter()
        .flat_map(|node| {
            [
                "node.stop_processes",
                "node.upgrade_software",
                "node.start_processes",
            ]
            .into_iter()
            .map(move |op| (op.to_string(), node.to_string()))
        })
        .collect();
    assert_eq!(calls, expected);
}

#[tokio::test]
async fn test_non_rolling_gflags_upgrade() {
    let harness = TestHarness::builder().build().await;
    let params = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "kind": "gflags",
        "gflags": {"ysql_max_connections": "400"},
        "nodes": ["n1", "n2", "n3"],
        "rolling": false,
    }));

    let state = harness
        .submit_and_wait(TaskType::UpgradeUniverse, params)
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);

    let ops: Vec<String> = harness
        .infrastructure
        .requests()
        .await
        .into_iter()
        .map(|r| r.op)
        .collect();
    assert_eq!(ops.len(), 9);
    assert!(ops[..3].iter().all(|op| op == "node.stop_processes"));
    assert!(ops[3..6].iter().all(|op| op == "node.update_gflags"));
    assert!(ops[6..].iter().all(|op| op == "node.start_processes"));
}

#[tokio::test]
async fn test_submissions_get_unique_ids() {
    let harness = TestHarness::builder().build().await;

    let mut ids = HashSet::new();
    for _ in 0..20 {
        let task_uuid = harness
            .commissioner
            .submit(TaskType::ManipulateDnsRecord, harness.dns_params("edit"))
            .await
            .unwrap();
        assert!(ids.insert(task_uuid));
    }

    for task_uuid in &ids {
        let state = harness
            .commissioner
            .wait_for_task(task_uuid, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(state.status, TaskStatus::Success);
    }
    assert_eq!(harness.commissioner.list(100).await.unwrap().len(), 20);
}

#[tokio::test]
async fn test_status_and_progress_never_move_backwards() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("node.provision", Duration::from_millis(20))
        .with_delay("node.configure", Duration::from_millis(20));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(
            TaskType::CreateUniverse,
            harness.create_universe_params(&["n1", "n2"]),
        )
        .await
        .unwrap();

    let observed =
        observe_until_terminal(&harness.commissioner, &task_uuid, Duration::from_secs(5)).await;

    for pair in observed.windows(2) {
        assert!(lifecycle_rank(pair[0].status) <= lifecycle_rank(pair[1].status));
        assert!(pair[0].percent_complete <= pair[1].percent_complete);
    }
    let last = observed.last().unwrap();
    assert_eq!(last.status, TaskStatus::Success);
    assert!(
        observed
            .iter()
            .filter(|s| !s.is_terminal())
            .all(|s| s.percent_complete < 100.0)
    );
}

#[tokio::test]
async fn test_unknown_universe_is_rejected() {
    let harness = TestHarness::builder().build().await;
    let params = TaskParams::new(json!({
        "universe_uuid": Uuid::new_v4(),
        "nodes": [{"name": "n1"}],
        "software_version": "2.20.1.0-b97",
    }));

    let err = harness
        .commissioner
        .submit(TaskType::CreateUniverse, params)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        CommissionerError::Validation(ValidationError::UnknownReference { .. })
    ));
    assert!(harness.commissioner.list(10).await.unwrap().is_empty());
    assert!(harness.infrastructure.requests().await.is_empty());
}

#[tokio::test]
async fn test_missing_fields_are_rejected() {
    let harness = TestHarness::builder().build().await;

    let no_nodes = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "nodes": [],
        "software_version": "2.20.1.0-b97",
    }));
    let err = harness
        .commissioner
        .submit(TaskType::CreateUniverse, no_nodes)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommissionerError::Validation(ValidationError::MissingField(ref field)) if field == "nodes"
    ));

    let no_version = TaskParams::new(json!({
        "universe_uuid": harness.universe_uuid(),
        "kind": "software",
        "nodes": ["n1"],
    }));
    let err = harness
        .commissioner
        .submit(TaskType::UpgradeUniverse, no_version)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommissionerError::Validation(ValidationError::MissingField(ref field))
            if field == "target_version"
    ));

    let malformed = TaskParams::new(json!({"universe_uuid": "not-a-uuid"}));
    let err = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, malformed)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommissionerError::Validation(ValidationError::Malformed(_))
    ));
}

#[tokio::test]
async fn test_status_of_unknown_task() {
    let harness = TestHarness::builder().build().await;
    let task_uuid = TaskUuid::new();

    let err = harness.commissioner.status(&task_uuid).await.unwrap_err();
    assert!(matches!(err, CommissionerError::NotFound(id) if id == task_uuid));
}
