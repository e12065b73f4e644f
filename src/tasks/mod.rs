//! Task types and the registry that builds their plans.
//!
//! Each [`TaskType`] maps to one [`TaskBuilder`] in a static table. The
//! builder validates submitted params and decomposes them into a
//! [`TaskPlan`], the ordered groups the executor runs. Plans are never
//! persisted; building twice from the same params yields the same plan.

mod dns;
mod universe;

pub use dns::{DnsCommand, ManipulateDnsRecord, ManipulateDnsRecordParams};
pub use universe::{
    CreateUniverse, CreateUniverseParams, DnsSettings, NodeSpec, UpgradeKind, UpgradeUniverse,
    UpgradeUniverseParams,
};

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::core::group::SubTaskGroup;
use crate::core::infra::{Collaborators, Infrastructure, OpRequest};
use crate::core::params::{TaskParams, ValidationError};
use crate::core::retry::RetryPolicy;
use crate::core::subtask::{SubTask, SubTaskContext, SubTaskError};
use crate::core::types::TaskType;

/// The ordered groups of one task.
#[derive(Debug, Clone, Default)]
pub struct TaskPlan {
    pub groups: Vec<SubTaskGroup>,
    /// Overrides the commissioner's default retry policy.
    pub retry_policy: Option<RetryPolicy>,
}

impl TaskPlan {
    pub fn new(groups: Vec<SubTaskGroup>) -> Self {
        Self {
            groups,
            retry_policy: None,
        }
    }

    /// Builder: set a task-specific retry policy.
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups.iter().map(|g| g.name()).collect()
    }
}

/// Validates params and builds the plan of one task type.
#[async_trait]
pub trait TaskBuilder: Send + Sync {
    /// Semantic validation, e.g. referenced entities exist.
    ///
    /// Default implementation accepts everything.
    async fn validate(
        &self,
        _params: &TaskParams,
        _collaborators: &Collaborators,
    ) -> Result<(), ValidationError> {
        Ok(())
    }

    /// Decompose params into groups.
    fn build(
        &self,
        params: &TaskParams,
        collaborators: &Collaborators,
    ) -> Result<TaskPlan, ValidationError>;
}

/// Dispatch table from task type to builder.
#[derive(Clone, Default)]
pub struct TaskRegistry {
    builders: HashMap<TaskType, Arc<dyn TaskBuilder>>,
}

impl TaskRegistry {
    /// Registry with no builders.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry with a builder for every task type.
    pub fn builtin() -> Self {
        Self::empty()
            .with_builder(TaskType::ManipulateDnsRecord, Arc::new(ManipulateDnsRecord))
            .with_builder(TaskType::CreateUniverse, Arc::new(CreateUniverse))
            .with_builder(TaskType::UpgradeUniverse, Arc::new(UpgradeUniverse))
    }

    /// Builder: register or replace the builder of one task type.
    pub fn with_builder(mut self, task_type: TaskType, builder: Arc<dyn TaskBuilder>) -> Self {
        self.builders.insert(task_type, builder);
        self
    }

    pub fn get(&self, task_type: TaskType) -> Option<Arc<dyn TaskBuilder>> {
        self.builders.get(&task_type).cloned()
    }

    /// Registered task types, in declaration order.
    pub fn task_types(&self) -> Vec<TaskType> {
        TaskType::ALL
            .into_iter()
            .filter(|t| self.builders.contains_key(t))
            .collect()
    }
}

/// A subtask that performs one infrastructure operation.
///
/// A non-zero response code is a permanent failure; an unavailable
/// collaborator is transient.
pub struct OperationSubTask {
    name: String,
    request: OpRequest,
    infrastructure: Arc<dyn Infrastructure>,
    retryable: bool,
    description: Option<String>,
}

impl OperationSubTask {
    pub fn new(
        name: impl Into<String>,
        request: OpRequest,
        infrastructure: Arc<dyn Infrastructure>,
    ) -> Self {
        Self {
            name: name.into(),
            request,
            infrastructure,
            retryable: false,
            description: None,
        }
    }

    /// Builder: allow the executor to re-invoke after transient failures.
    ///
    /// Only set this for operations that converge on the same end state.
    pub fn retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn request(&self) -> &OpRequest {
        &self.request
    }
}

#[async_trait]
impl SubTask for OperationSubTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, _ctx: &SubTaskContext) -> Result<(), SubTaskError> {
        let response = self.infrastructure.invoke(&self.request).await?;
        if response.is_success() {
            Ok(())
        } else {
            Err(SubTaskError::Permanent(format!(
                "{} failed with code {}: {}",
                self.request.op, response.code, response.message
            )))
        }
    }

    fn retryable(&self) -> bool {
        self.retryable
    }

    fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }
}

/// Reject references to universes the repository does not know.
pub(crate) async fn require_universe(
    collaborators: &Collaborators,
    universe_uuid: &Uuid,
) -> Result<(), ValidationError> {
    let exists = collaborators
        .universes
        .exists(universe_uuid)
        .await
        .map_err(|e| ValidationError::Lookup(e.to_string()))?;
    if !exists {
        return Err(ValidationError::UnknownReference {
            kind: "universe",
            id: universe_uuid.to_string(),
        });
    }
    Ok(())
}

/// Wrap an operation in a retryable subtask.
pub(crate) fn operation(
    name: impl Into<String>,
    op: &str,
    args: serde_json::Value,
    infrastructure: &Arc<dyn Infrastructure>,
) -> Arc<dyn SubTask> {
    Arc::new(
        OperationSubTask::new(name, OpRequest::new(op, args), Arc::clone(infrastructure))
            .retryable(true),
    )
}
