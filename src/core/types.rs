//! Core identifier types for the commissioner.
//!
//! `TaskUuid` identifies one submitted task for its whole life; `TaskType`
//! is the closed set of operations the commissioner knows how to build.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for a submitted task.
///
/// Allocated once at submission and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskUuid(Uuid);

impl TaskUuid {
    /// Generate a new random TaskUuid.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a TaskUuid from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskUuid {
    fn default() -> Self {
        Self::new()
    }
}

impl FromStr for TaskUuid {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

impl fmt::Display for TaskUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kinds of task the commissioner can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Create, edit or delete the DNS records of a universe.
    ManipulateDnsRecord,
    /// Provision and start a new universe.
    CreateUniverse,
    /// Software or gflags upgrade of an existing universe.
    UpgradeUniverse,
}

impl TaskType {
    /// Every task type, in declaration order.
    pub const ALL: [TaskType; 3] = [
        TaskType::ManipulateDnsRecord,
        TaskType::CreateUniverse,
        TaskType::UpgradeUniverse,
    ];

    /// The snake_case name used in storage and events.
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::ManipulateDnsRecord => "manipulate_dns_record",
            TaskType::CreateUniverse => "create_universe",
            TaskType::UpgradeUniverse => "upgrade_universe",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskType {
    type Err = String;

    /// Accepts snake_case and kebab-case names.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        TaskType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| format!("unknown task type: {s}"))
    }
}
