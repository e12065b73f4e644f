//! SubTask trait and error types.
//!
//! A `SubTask` is the smallest unit of work inside a task. Retries re-invoke
//! `execute`, so an implementation must leave the same end state no matter
//! how many times it runs ("create the DNS record if absent", not "create
//! the DNS record").

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use super::infra::InfraError;
use super::types::{TaskType, TaskUuid};

/// Errors that can occur during subtask execution.
#[derive(Debug, Error)]
pub enum SubTaskError {
    /// A failure that may succeed on retry (network blip, resource not ready).
    #[error("transient error: {0}")]
    Transient(String),

    /// A failure that will not go away on retry.
    #[error("permanent error: {0}")]
    Permanent(String),

    /// Subtask timed out.
    #[error("subtask timed out after {0:?}")]
    Timeout(Duration),

    /// Error reported by an infrastructure collaborator.
    #[error(transparent)]
    Infrastructure(#[from] InfraError),

    /// Generic error wrapper.
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl SubTaskError {
    /// Check if this error is considered transient (should trigger retry).
    pub fn is_transient(&self) -> bool {
        match self {
            SubTaskError::Transient(_) | SubTaskError::Timeout(_) => true,
            SubTaskError::Infrastructure(e) => e.is_transient(),
            SubTaskError::Permanent(_) | SubTaskError::Other(_) => false,
        }
    }
}

/// Result of one subtask invocation, as seen by its group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    /// Failure that must not be retried.
    Failed(String),
    /// Transient failure of a retryable subtask.
    Retryable(String),
}

impl Outcome {
    /// Classify a subtask's result.
    ///
    /// Transient errors only become `Retryable` when the subtask declared
    /// itself retryable.
    pub fn from_result(result: Result<(), SubTaskError>, retryable: bool) -> Self {
        match result {
            Ok(()) => Outcome::Succeeded,
            Err(err) if retryable && err.is_transient() => Outcome::Retryable(err.to_string()),
            Err(err) => Outcome::Failed(err.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Succeeded)
    }

    /// Failure reason, if any.
    pub fn reason(&self) -> Option<&str> {
        match self {
            Outcome::Succeeded => None,
            Outcome::Failed(reason) | Outcome::Retryable(reason) => Some(reason),
        }
    }
}

/// Explicit execution context handed to every subtask.
#[derive(Debug, Clone)]
pub struct SubTaskContext {
    pub task_uuid: TaskUuid,
    pub task_type: TaskType,
    /// Name of the group being executed.
    pub group: String,
    /// Run of the group, starting at 1; above 1 means a retry.
    pub attempt: u32,
    /// Acting user of the task.
    pub creator: Option<String>,
}

impl SubTaskContext {
    pub fn new(task_uuid: TaskUuid, task_type: TaskType) -> Self {
        Self {
            task_uuid,
            task_type,
            group: String::new(),
            attempt: 1,
            creator: None,
        }
    }

    /// Builder: set the acting user.
    pub fn with_creator(mut self, creator: Option<String>) -> Self {
        self.creator = creator;
        self
    }

    /// Context for one run of a group.
    pub fn for_group(&self, group: &str, attempt: u32) -> Self {
        Self {
            group: group.to_string(),
            attempt,
            ..self.clone()
        }
    }
}

/// The core trait for units of work inside a task.
///
/// # Example
///
/// ```ignore
/// use commissioner::{SubTask, SubTaskContext, SubTaskError};
/// use async_trait::async_trait;
///
/// struct EnsureDnsRecord {
///     name: String,
/// }
///
/// #[async_trait]
/// impl SubTask for EnsureDnsRecord {
///     fn name(&self) -> &str {
///         &self.name
///     }
///
///     fn retryable(&self) -> bool {
///         true
///     }
///
///     async fn execute(&self, ctx: &SubTaskContext) -> Result<(), SubTaskError> {
///         // create the record only if it is absent
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait SubTask: Send + Sync {
    /// Returns the name of this subtask, unique within its group.
    fn name(&self) -> &str;

    /// Execute the subtask.
    ///
    /// # Returns
    /// * `Ok(())` - Subtask completed successfully
    /// * `Err(SubTaskError)` - Subtask failed; transient errors may be retried
    async fn execute(&self, ctx: &SubTaskContext) -> Result<(), SubTaskError>;

    /// Whether the executor may re-invoke this subtask after a transient failure.
    ///
    /// Default implementation returns false.
    fn retryable(&self) -> bool {
        false
    }

    /// Optional description for display/logging purposes.
    fn description(&self) -> Option<&str> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SuccessSubTask {
        name: String,
    }

    #[async_trait]
    impl SubTask for SuccessSubTask {
        fn name(&self) -> &str {
            &self.name
        }

        async fn execute(&self, _ctx: &SubTaskContext) -> Result<(), SubTaskError> {
            Ok(())
        }
    }

    struct CreatorCheckingSubTask;

    #[async_trait]
    impl SubTask for CreatorCheckingSubTask {
        fn name(&self) -> &str {
            "creator_check"
        }

        async fn execute(&self, ctx: &SubTaskContext) -> Result<(), SubTaskError> {
            match ctx.creator.as_deref() {
                Some(_) => Ok(()),
                None => Err(SubTaskError::Permanent("no acting user".to_string())),
            }
        }

        fn retryable(&self) -> bool {
            true
        }
    }

    fn context() -> SubTaskContext {
        SubTaskContext::new(TaskUuid::new(), TaskType::ManipulateDnsRecord)
    }

    #[tokio::test]
    async fn test_subtask_defaults() {
        let subtask = SuccessSubTask {
            name: "noop".to_string(),
        };

        assert_eq!(subtask.name(), "noop");
        assert!(!subtask.retryable());
        assert!(subtask.description().is_none());
        assert!(subtask.execute(&context()).await.is_ok());
    }

    #[tokio::test]
    async fn test_context_is_passed_explicitly() {
        let subtask = CreatorCheckingSubTask;

        let anonymous = context();
        assert!(subtask.execute(&anonymous).await.is_err());

        let with_user = context().with_creator(Some("ops@example.com".to_string()));
        assert!(subtask.execute(&with_user).await.is_ok());
    }

    #[test]
    fn test_for_group_keeps_task_identity() {
        let ctx = context().with_creator(Some("ops".to_string()));
        let group_ctx = ctx.for_group("ProvisionNodes", 2);

        assert_eq!(group_ctx.task_uuid, ctx.task_uuid);
        assert_eq!(group_ctx.group, "ProvisionNodes");
        assert_eq!(group_ctx.attempt, 2);
        assert_eq!(group_ctx.creator.as_deref(), Some("ops"));
    }

    #[test]
    fn test_error_is_transient() {
        assert!(SubTaskError::Transient("blip".into()).is_transient());
        assert!(SubTaskError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(SubTaskError::from(InfraError::Unavailable("dns api".into())).is_transient());
        assert!(!SubTaskError::Permanent("bad credentials".into()).is_transient());
        assert!(!SubTaskError::from(InfraError::Rejected("conflict".into())).is_transient());
    }

    #[test]
    fn test_outcome_from_result() {
        assert_eq!(Outcome::from_result(Ok(()), false), Outcome::Succeeded);

        let transient = || Err(SubTaskError::Transient("blip".into()));
        assert!(matches!(
            Outcome::from_result(transient(), true),
            Outcome::Retryable(_)
        ));
        // A non-retryable subtask never yields Retryable.
        assert!(matches!(
            Outcome::from_result(transient(), false),
            Outcome::Failed(_)
        ));

        let permanent = Err(SubTaskError::Permanent("denied".into()));
        assert_eq!(
            Outcome::from_result(permanent, true),
            Outcome::Failed("permanent error: denied".to_string())
        );
    }

    #[test]
    fn test_outcome_reason() {
        assert_eq!(Outcome::Succeeded.reason(), None);
        assert_eq!(Outcome::Retryable("later".into()).reason(), Some("later"));
    }
}
