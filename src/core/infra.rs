//! Interfaces to the platform's external collaborators.
//!
//! The orchestration core never manipulates infrastructure directly: every
//! side effect goes through [`Infrastructure::invoke`] from inside a subtask,
//! and entity lookups go through injected repositories.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// Errors reported by an infrastructure collaborator.
#[derive(Debug, Clone, Error)]
pub enum InfraError {
    /// The collaborator could not be reached or is not ready yet.
    #[error("infrastructure unavailable: {0}")]
    Unavailable(String),

    /// The collaborator refused the request (bad credentials, conflicting state).
    #[error("request rejected: {0}")]
    Rejected(String),

    /// Local failure launching or talking to the collaborator.
    #[error("io error: {0}")]
    Io(String),
}

impl InfraError {
    /// Check if this error may go away on retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, InfraError::Unavailable(_))
    }
}

/// One infrastructure operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpRequest {
    /// Operation name, e.g. `dns.manipulate_record`.
    pub op: String,
    /// Operation arguments.
    pub args: Value,
}

impl OpRequest {
    pub fn new(op: impl Into<String>, args: Value) -> Self {
        Self {
            op: op.into(),
            args,
        }
    }
}

impl fmt::Display for OpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.op)
    }
}

/// Response to an infrastructure operation. `code == 0` means success.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OpResponse {
    pub code: i32,
    pub message: String,
}

impl OpResponse {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn error(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == 0
    }
}

/// Narrow interface to the infrastructure layer (DNS providers, node scripts).
#[async_trait]
pub trait Infrastructure: Send + Sync {
    /// Run one operation and report its response.
    async fn invoke(&self, request: &OpRequest) -> Result<OpResponse, InfraError>;
}

/// Read access to universes, used to validate referenced identifiers.
#[async_trait]
pub trait UniverseRepository: Send + Sync {
    /// Check whether a universe with this UUID exists.
    async fn exists(&self, universe_uuid: &Uuid) -> Result<bool, InfraError>;

    /// Private addresses of the universe's nodes. Empty when unknown.
    async fn node_ips(&self, _universe_uuid: &Uuid) -> Result<Vec<String>, InfraError> {
        Ok(Vec::new())
    }
}

/// Repository that accepts every universe. Used when no entity store is wired in.
pub struct PermissiveUniverses;

#[async_trait]
impl UniverseRepository for PermissiveUniverses {
    async fn exists(&self, _universe_uuid: &Uuid) -> Result<bool, InfraError> {
        Ok(true)
    }
}

/// Collaborators handed to task builders.
#[derive(Clone)]
pub struct Collaborators {
    pub infrastructure: Arc<dyn Infrastructure>,
    pub universes: Arc<dyn UniverseRepository>,
}

impl Collaborators {
    pub fn new(
        infrastructure: Arc<dyn Infrastructure>,
        universes: Arc<dyn UniverseRepository>,
    ) -> Self {
        Self {
            infrastructure,
            universes,
        }
    }
}
