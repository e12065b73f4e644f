//! Task submission parameters.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

/// Params rejected at submission.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// The body does not match the task type's schema.
    #[error("malformed params: {0}")]
    Malformed(String),

    /// A required field is missing or empty.
    #[error("missing required field: {0}")]
    MissingField(String),

    /// A referenced entity does not exist.
    #[error("{kind} not found: {id}")]
    UnknownReference { kind: &'static str, id: String },

    /// Params are well-formed but semantically invalid.
    #[error("invalid params: {0}")]
    Invalid(String),

    /// A collaborator needed for validation failed.
    #[error("validation lookup failed: {0}")]
    Lookup(String),
}

/// Input payload of a task.
///
/// The commissioner takes its own copy at submission; the executor never
/// sees the caller's value. The acting user travels in `creator` rather
/// than in any ambient request context.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskParams {
    /// Entity the task acts on (usually a universe).
    pub target_uuid: Option<Uuid>,
    /// Acting user, recorded on the audit record.
    pub creator: Option<String>,
    /// Customer-visible description.
    pub description: Option<String>,
    /// Task-type specific payload.
    #[serde(default)]
    pub body: Value,
}

impl TaskParams {
    /// Create params with the given body.
    pub fn new(body: Value) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    /// Builder: set the target entity.
    pub fn with_target(mut self, target_uuid: Uuid) -> Self {
        self.target_uuid = Some(target_uuid);
        self
    }

    /// Builder: set the acting user.
    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// Builder: set the customer-visible description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Deserialize the body into a task-specific params type.
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, ValidationError> {
        serde_json::from_value(self.body.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))
    }
}
