//! Recovery of tasks interrupted by a restart.

use commissioner::testing::{EventRecorder, FakeInfrastructure, TestHarness};
use commissioner::{
    AuditLog, CommissionerError, ErrorKind, Event, InMemoryStorage, TaskState, TaskStateStore,
    TaskStatus, TaskType, TaskUuid,
};
use std::sync::Arc;
use std::time::Duration;

/// A task the previous process accepted and started but never finished.
fn interrupted(task_type: TaskType) -> TaskState {
    let mut state = TaskState::new(TaskUuid::new(), task_type);
    state.mark_running().unwrap();
    state.set_progress(40.0).unwrap();
    state
}

#[tokio::test]
async fn test_recover_fails_interrupted_tasks() {
    let store = Arc::new(InMemoryStorage::new());
    let running = interrupted(TaskType::CreateUniverse);
    let created = TaskState::new(TaskUuid::new(), TaskType::ManipulateDnsRecord);
    let mut finished = TaskState::new(TaskUuid::new(), TaskType::UpgradeUniverse);
    finished.mark_running().unwrap();
    finished.mark_success().unwrap();
    for state in [&running, &created, &finished] {
        store.insert_task(state).await.unwrap();
    }

    let harness = TestHarness::builder().with_store(store).build().await;
    let mut recovered = harness.commissioner.recover().await.unwrap();
    recovered.sort();

    let mut expected = vec![running.task_uuid, created.task_uuid];
    expected.sort();
    assert_eq!(recovered, expected);

    for task_uuid in &expected {
        let state = harness.commissioner.status(task_uuid).await.unwrap();
        assert_eq!(state.status, TaskStatus::Failure);
        assert_eq!(state.error.unwrap().kind, ErrorKind::Interrupted);
        assert!(state.completed_at.is_some());
    }
    let state = harness.commissioner.status(&running.task_uuid).await.unwrap();
    assert_eq!(state.percent_complete, 40.0);

    let untouched = harness.commissioner.status(&finished.task_uuid).await.unwrap();
    assert_eq!(untouched.status, TaskStatus::Success);

    let finished_events = harness
        .events
        .events()
        .await
        .into_iter()
        .filter(|e| matches!(e, Event::TaskFinished { .. }))
        .count();
    assert_eq!(finished_events, 2);

    // A second pass has nothing left to do.
    assert!(harness.commissioner.recover().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_recover_skips_live_tasks() {
    let infrastructure = FakeInfrastructure::new()
        .with_delay("dns.manipulate_record", Duration::from_millis(200));
    let harness = TestHarness::builder()
        .with_infrastructure(infrastructure)
        .build()
        .await;

    let task_uuid = harness
        .commissioner
        .submit(TaskType::ManipulateDnsRecord, harness.dns_params("create"))
        .await
        .unwrap();

    assert!(harness.commissioner.recover().await.unwrap().is_empty());
    let state = harness
        .commissioner
        .wait_for_task(&task_uuid, Duration::from_secs(5))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Success);
}

#[tokio::test]
async fn test_wait_on_interrupted_task_before_recovery() {
    let store = Arc::new(InMemoryStorage::new());
    let running = interrupted(TaskType::ManipulateDnsRecord);
    store.insert_task(&running).await.unwrap();

    let harness = TestHarness::builder().with_store(store).build().await;

    let err = harness
        .commissioner
        .wait_for_task(&running.task_uuid, Duration::from_millis(50))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CommissionerError::InvalidState { status: TaskStatus::Running, .. }
    ));

    harness.commissioner.recover().await.unwrap();
    let state = harness
        .commissioner
        .wait_for_task(&running.task_uuid, Duration::from_millis(50))
        .await
        .unwrap();
    assert_eq!(state.status, TaskStatus::Failure);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn test_recover_after_restart_with_sqlite() {
    use commissioner::testing::InMemoryUniverseRepository;
    use commissioner::{
        AuditRecord, AuditRecorder, Collaborators, Commissioner, EventBus, SqliteStorage,
    };

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("commissioner.db");
    let running = interrupted(TaskType::CreateUniverse);

    // Previous process: accepted and started the task, then went away.
    {
        let storage = SqliteStorage::new(&path).await.unwrap();
        storage.insert_task(&running).await.unwrap();
        storage
            .create_record(
                AuditRecord::new(running.task_uuid, running.task_type)
                    .with_creator(Some("admin@example.com".to_string())),
            )
            .await
            .unwrap();
        storage.close().await;
    }

    let storage = Arc::new(SqliteStorage::new(&path).await.unwrap());
    let bus = Arc::new(EventBus::new());
    bus.register(Arc::new(AuditRecorder::new(storage.clone()))).await;
    let events = Arc::new(EventRecorder::new());
    bus.register(events.clone()).await;

    let collaborators = Collaborators::new(
        Arc::new(FakeInfrastructure::new()),
        Arc::new(InMemoryUniverseRepository::new()),
    );
    let commissioner = Commissioner::new(storage.clone(), collaborators).with_event_bus(bus);

    let recovered = commissioner.recover().await.unwrap();
    assert_eq!(recovered, vec![running.task_uuid]);

    let state = commissioner.status(&running.task_uuid).await.unwrap();
    assert_eq!(state.status, TaskStatus::Failure);
    assert_eq!(state.error.as_ref().unwrap().kind, ErrorKind::Interrupted);

    let record = storage.get_record(&running.task_uuid).await.unwrap();
    assert!(record.is_finalized());
    assert_eq!(record.status, TaskStatus::Failure);
    assert_eq!(record.creator.as_deref(), Some("admin@example.com"));
    assert_eq!(record.error.unwrap().kind, ErrorKind::Interrupted);

    assert_eq!(events.events_for(&running.task_uuid).await.len(), 1);
}
