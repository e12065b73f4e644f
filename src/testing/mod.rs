//! Testing utilities for users of the commissioner.
//!
//! This module provides fakes for the commissioner's collaborators and
//! scripted subtasks:
//!
//! - [`FakeInfrastructure`]: records operations, with scripted failures and delays
//! - [`InMemoryUniverseRepository`]: a universe repository backed by a map
//! - [`FailingSubTask`]: a subtask that fails N times then succeeds
//! - [`SlowSubTask`]: a subtask that sleeps before succeeding
//! - [`FailingStore`]: a state store whose writes can be made to fail
//! - [`EventRecorder`]: an event handler that keeps every event
//! - [`TestHarness`]: a commissioner wired to all of the above

use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::audit::{AuditRecorder, InMemoryAuditLog};
use crate::commissioner::{Commissioner, CommissionerError};
use crate::core::infra::{
    Collaborators, InfraError, Infrastructure, OpRequest, OpResponse, UniverseRepository,
};
use crate::core::params::TaskParams;
use crate::core::retry::RetryPolicy;
use crate::core::state::TaskState;
use crate::core::subtask::{SubTask, SubTaskContext, SubTaskError};
use crate::core::types::{TaskType, TaskUuid};
use crate::events::{Event, EventBus, EventHandler};
use crate::storage::{InMemoryStorage, StorageError, TaskStateStore};
use crate::tasks::TaskRegistry;

/// Infrastructure fake that records every request.
///
/// Operations succeed unless scripted otherwise. Scripts are keyed by the
/// operation name.
///
/// # Example
///
/// ```
/// use commissioner::testing::FakeInfrastructure;
/// use commissioner::InfraError;
///
/// // The first two DNS calls find the provider unavailable.
/// let infra = FakeInfrastructure::new().fail_times(
///     "dns.manipulate_record",
///     2,
///     InfraError::Unavailable("provider throttled".into()),
/// );
/// ```
pub struct FakeInfrastructure {
    state: Mutex<FakeInfraState>,
    delays: HashMap<String, Duration>,
}

struct FakeInfraState {
    requests: Vec<OpRequest>,
    failures: HashMap<String, VecDeque<InfraError>>,
    responses: HashMap<String, OpResponse>,
}

impl FakeInfrastructure {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(FakeInfraState {
                requests: Vec::new(),
                failures: HashMap::new(),
                responses: HashMap::new(),
            }),
            delays: HashMap::new(),
        }
    }

    /// Fail the next `times` invocations of `op` with `error`.
    pub fn fail_times(mut self, op: impl Into<String>, times: u32, error: InfraError) -> Self {
        let queue = self.state.get_mut().failures.entry(op.into()).or_default();
        for _ in 0..times {
            queue.push_back(error.clone());
        }
        self
    }

    /// Answer every invocation of `op` with `response`.
    pub fn respond_with(mut self, op: impl Into<String>, response: OpResponse) -> Self {
        self.state.get_mut().responses.insert(op.into(), response);
        self
    }

    /// Sleep for `delay` before answering `op`.
    pub fn with_delay(mut self, op: impl Into<String>, delay: Duration) -> Self {
        self.delays.insert(op.into(), delay);
        self
    }

    /// All requests received so far, in arrival order.
    pub async fn requests(&self) -> Vec<OpRequest> {
        self.state.lock().await.requests.clone()
    }

    /// Number of times `op` was invoked.
    pub async fn invocations(&self, op: &str) -> usize {
        self.state
            .lock()
            .await
            .requests
            .iter()
            .filter(|r| r.op == op)
            .count()
    }
}

impl Default for FakeInfrastructure {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Infrastructure for FakeInfrastructure {
    async fn invoke(&self, request: &OpRequest) -> Result<OpResponse, InfraError> {
        let scripted = {
            let mut state = self.state.lock().await;
            state.requests.push(request.clone());
            let failure = state
                .failures
                .get_mut(&request.op)
                .and_then(VecDeque::pop_front);
            match failure {
                Some(err) => Err(err),
                None => Ok(state
                    .responses
                    .get(&request.op)
                    .cloned()
                    .unwrap_or_default()),
            }
        };

        if let Some(delay) = self.delays.get(&request.op) {
            tokio::time::sleep(*delay).await;
        }
        scripted
    }
}

/// Universe repository backed by an in-memory map of universe to node
/// addresses.
#[derive(Default)]
pub struct InMemoryUniverseRepository {
    universes: RwLock<HashMap<Uuid, Vec<String>>>,
}

impl InMemoryUniverseRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: register a universe.
    pub fn with_universe(self, universe_uuid: Uuid) -> Self {
        self.insert(universe_uuid);
        self
    }

    /// Builder: register a universe with its node addresses.
    pub fn with_nodes(self, universe_uuid: Uuid, node_ips: &[&str]) -> Self {
        self.set_node_ips(universe_uuid, node_ips);
        self
    }

    pub fn insert(&self, universe_uuid: Uuid) {
        if let Ok(mut universes) = self.universes.write() {
            universes.entry(universe_uuid).or_default();
        }
    }

    /// Replace the node addresses of a universe, registering it if needed.
    pub fn set_node_ips(&self, universe_uuid: Uuid, node_ips: &[&str]) {
        if let Ok(mut universes) = self.universes.write() {
            universes.insert(
                universe_uuid,
                node_ips.iter().map(|ip| ip.to_string()).collect(),
            );
        }
    }
}

#[async_trait]
impl UniverseRepository for InMemoryUniverseRepository {
    async fn exists(&self, universe_uuid: &Uuid) -> Result<bool, InfraError> {
        let universes = self
            .universes
            .read()
            .map_err(|_| InfraError::Io("universe repository lock poisoned".into()))?;
        Ok(universes.contains_key(universe_uuid))
    }

    async fn node_ips(&self, universe_uuid: &Uuid) -> Result<Vec<String>, InfraError> {
        let universes = self
            .universes
            .read()
            .map_err(|_| InfraError::Io("universe repository lock poisoned".into()))?;
        Ok(universes.get(universe_uuid).cloned().unwrap_or_default())
    }
}

/// A subtask that fails a configurable number of times before succeeding.
///
/// Useful for testing retry logic and error handling. Failures are
/// transient unless [`FailingSubTask::permanent`] is used.
///
/// The failure counting is protected by a mutex, so the subtask behaves
/// deterministically inside concurrent groups.
///
/// # Example
///
/// ```
/// use commissioner::testing::FailingSubTask;
///
/// // Fails 2 times, then succeeds on the 3rd invocation
/// let subtask = FailingSubTask::new("flaky_subtask", 2);
/// ```
pub struct FailingSubTask {
    name: String,
    state: Mutex<FailingSubTaskState>,
    total_failures: u32,
    error_message: String,
    transient: bool,
    retryable: bool,
}

struct FailingSubTaskState {
    failures_remaining: u32,
    call_count: u32,
}

impl FailingSubTask {
    /// Create a retryable subtask that fails transiently `fail_count` times.
    pub fn new(name: impl Into<String>, fail_count: u32) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(FailingSubTaskState {
                failures_remaining: fail_count,
                call_count: 0,
            }),
            total_failures: fail_count,
            error_message: "intentional test failure".to_string(),
            transient: true,
            retryable: true,
        }
    }

    /// Builder: fail permanently instead of transiently.
    pub fn permanent(mut self) -> Self {
        self.transient = false;
        self
    }

    /// Builder: declare the subtask non-retryable.
    pub fn not_retryable(mut self) -> Self {
        self.retryable = false;
        self
    }

    /// Builder: use a custom error message.
    pub fn with_error(mut self, message: impl Into<String>) -> Self {
        self.error_message = message.into();
        self
    }

    /// Get the number of failures remaining before success.
    pub async fn failures_remaining(&self) -> u32 {
        self.state.lock().await.failures_remaining
    }

    /// Get the number of times this subtask has been invoked.
    pub async fn call_count(&self) -> u32 {
        self.state.lock().await.call_count
    }

    /// Reset the failure counter for reuse.
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        state.failures_remaining = self.total_failures;
        state.call_count = 0;
    }
}

#[async_trait]
impl SubTask for FailingSubTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &SubTaskContext) -> Result<(), SubTaskError> {
        let mut state = self.state.lock().await;
        state.call_count += 1;

        if state.failures_remaining == 0 {
            return Ok(());
        }
        state.failures_remaining -= 1;
        if self.transient {
            Err(SubTaskError::Transient(self.error_message.clone()))
        } else {
            Err(SubTaskError::Permanent(self.error_message.clone()))
        }
    }

    fn retryable(&self) -> bool {
        self.retryable
    }
}

/// A subtask that sleeps before succeeding.
pub struct SlowSubTask {
    name: String,
    delay: Duration,
    call_count: Mutex<u32>,
}

impl SlowSubTask {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        Self {
            name: name.into(),
            delay,
            call_count: Mutex::new(0),
        }
    }

    pub async fn call_count(&self) -> u32 {
        *self.call_count.lock().await
    }
}

#[async_trait]
impl SubTask for SlowSubTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &SubTaskContext) -> Result<(), SubTaskError> {
        *self.call_count.lock().await += 1;
        tokio::time::sleep(self.delay).await;
        Ok(())
    }

    fn retryable(&self) -> bool {
        true
    }
}

/// State store whose writes can be made to fail on demand.
///
/// Reads always go to the wrapped in-memory store.
#[derive(Default)]
pub struct FailingStore {
    inner: InMemoryStorage,
    fail_insert: AtomicBool,
    fail_update: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_insert(&self, fail: bool) {
        self.fail_insert.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_update(&self, fail: bool) {
        self.fail_update.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskStateStore for FailingStore {
    async fn insert_task(&self, state: &TaskState) -> Result<(), StorageError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StorageError::Other("simulated insert failure".into()));
        }
        self.inner.insert_task(state).await
    }

    async fn update_task(&self, state: &TaskState) -> Result<(), StorageError> {
        if self.fail_update.load(Ordering::SeqCst) {
            return Err(StorageError::Other("simulated update failure".into()));
        }
        self.inner.update_task(state).await
    }

    async fn get_task(&self, task_uuid: &TaskUuid) -> Result<TaskState, StorageError> {
        self.inner.get_task(task_uuid).await
    }

    async fn list_tasks(&self, limit: usize) -> Result<Vec<TaskState>, StorageError> {
        self.inner.list_tasks(limit).await
    }

    async fn get_incomplete_tasks(&self) -> Result<Vec<TaskState>, StorageError> {
        self.inner.get_incomplete_tasks().await
    }
}

/// Event handler that keeps every event it sees.
#[derive(Default)]
pub struct EventRecorder {
    events: Mutex<Vec<Event>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Events of one task, in emission order.
    pub async fn events_for(&self, task_uuid: &TaskUuid) -> Vec<Event> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_uuid() == *task_uuid)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventHandler for EventRecorder {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// A commissioner wired to in-memory fakes.
///
/// Provides:
/// - One known universe ([`TestHarness::universe_uuid`])
/// - A [`FakeInfrastructure`] for assertions on operations
/// - In-memory task state and audit records
/// - Every event recorded
///
/// # Example
///
/// ```ignore
/// use commissioner::testing::TestHarness;
/// use commissioner::{DnsCommand, TaskStatus};
///
/// let harness = TestHarness::builder().build().await;
/// let state = harness
///     .submit_and_wait(TaskType::ManipulateDnsRecord, harness.dns_params(DnsCommand::Create))
///     .await?;
/// assert_eq!(state.status, TaskStatus::Success);
/// ```
pub struct TestHarness {
    pub commissioner: Commissioner,
    pub infrastructure: Arc<FakeInfrastructure>,
    pub universes: Arc<InMemoryUniverseRepository>,
    pub store: Arc<dyn TaskStateStore>,
    pub audit: Arc<InMemoryAuditLog>,
    pub events: Arc<EventRecorder>,
    universe_uuid: Uuid,
    wait_timeout: Duration,
}

/// Builder for [`TestHarness`].
pub struct TestHarnessBuilder {
    infrastructure: FakeInfrastructure,
    store: Option<Arc<dyn TaskStateStore>>,
    registry: TaskRegistry,
    retry_policy: RetryPolicy,
    max_concurrent_subtasks: usize,
    wait_timeout: Duration,
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder {
            infrastructure: FakeInfrastructure::new(),
            store: None,
            registry: TaskRegistry::builtin(),
            retry_policy: RetryPolicy::fixed(3, Duration::from_millis(10)),
            max_concurrent_subtasks: 4,
            wait_timeout: Duration::from_secs(5),
        }
    }

    /// The universe registered in the fake repository.
    pub fn universe_uuid(&self) -> Uuid {
        self.universe_uuid
    }

    /// Params for a DNS task against the registered universe.
    pub fn dns_params(&self, command: &str) -> TaskParams {
        TaskParams::new(json!({
            "universe_uuid": self.universe_uuid,
            "provider_uuid": Uuid::new_v4(),
            "command": command,
            "hosted_zone_id": "Z0123456789",
            "domain_name_prefix": "orders",
            "node_ips": ["10.0.0.1", "10.0.0.2", "10.0.0.3"],
        }))
        .with_target(self.universe_uuid)
        .with_creator("admin@example.com")
    }

    /// Params for creating the registered universe with `nodes`.
    pub fn create_universe_params(&self, nodes: &[&str]) -> TaskParams {
        let nodes: Vec<Value> = nodes
            .iter()
            .enumerate()
            .map(|(i, name)| json!({"name": name, "private_ip": format!("10.0.0.{}", i + 1)}))
            .collect();
        TaskParams::new(json!({
            "universe_uuid": self.universe_uuid,
            "nodes": nodes,
            "software_version": "2.20.1.0-b97",
        }))
        .with_target(self.universe_uuid)
        .with_creator("admin@example.com")
    }

    /// Submit a task and wait for its terminal state.
    pub async fn submit_and_wait(
        &self,
        task_type: TaskType,
        params: TaskParams,
    ) -> Result<TaskState, CommissionerError> {
        let task_uuid = self.commissioner.submit(task_type, params).await?;
        self.commissioner
            .wait_for_task(&task_uuid, self.wait_timeout)
            .await
    }
}

impl TestHarnessBuilder {
    /// Use a scripted infrastructure fake.
    pub fn with_infrastructure(mut self, infrastructure: FakeInfrastructure) -> Self {
        self.infrastructure = infrastructure;
        self
    }

    /// Use a specific state store instead of a fresh in-memory one.
    pub fn with_store(mut self, store: Arc<dyn TaskStateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_registry(mut self, registry: TaskRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Default: 3 retries, 10ms apart.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_concurrency(mut self, max_concurrent_subtasks: usize) -> Self {
        self.max_concurrent_subtasks = max_concurrent_subtasks;
        self
    }

    /// Deadline used by [`TestHarness::submit_and_wait`].
    pub fn with_wait_timeout(mut self, timeout: Duration) -> Self {
        self.wait_timeout = timeout;
        self
    }

    pub async fn build(self) -> TestHarness {
        let universe_uuid = Uuid::new_v4();
        let infrastructure = Arc::new(self.infrastructure);
        let universes = Arc::new(InMemoryUniverseRepository::new().with_universe(universe_uuid));
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryStorage::new()) as Arc<dyn TaskStateStore>);
        let audit = Arc::new(InMemoryAuditLog::new());
        let events = Arc::new(EventRecorder::new());

        let bus = Arc::new(EventBus::new());
        bus.register(Arc::new(AuditRecorder::new(audit.clone()))).await;
        bus.register(events.clone()).await;

        let collaborators = Collaborators::new(infrastructure.clone(), universes.clone());
        let commissioner = Commissioner::new(store.clone(), collaborators)
            .with_event_bus(bus)
            .with_registry(self.registry)
            .with_retry_policy(self.retry_policy)
            .with_max_concurrent_subtasks(self.max_concurrent_subtasks);

        TestHarness {
            commissioner,
            infrastructure,
            universes,
            store,
            audit,
            events,
            universe_uuid,
            wait_timeout: self.wait_timeout,
        }
    }
}
