//! commissioner - asynchronous task orchestration for database platform
//! operations.
//!
//! A submitted task is decomposed into ordered groups of idempotent
//! subtasks, executed on a bounded worker pool with retry and cooperative
//! cancellation, persisted after every step and finalized into an audit
//! record.

pub mod audit;
pub mod commissioner;
pub mod config;
pub mod core;
pub mod events;
pub mod execution;
pub mod storage;
pub mod tasks;
pub mod testing;

pub use audit::{AuditError, AuditLog, AuditRecord, AuditRecorder, InMemoryAuditLog};
pub use commissioner::{Commissioner, CommissionerError};
pub use config::{CommissionerConfig, ConfigError, StorageConfig, YamlLoader};
pub use crate::core::group::{ExecutionMode, SubTaskGroup};
pub use crate::core::infra::{
    Collaborators, InfraError, Infrastructure, OpRequest, OpResponse, PermissiveUniverses,
    UniverseRepository,
};
pub use crate::core::params::{TaskParams, ValidationError};
pub use crate::core::retry::{Backoff, RetryPolicy};
pub use crate::core::state::{ErrorDetail, ErrorKind, StateError, TaskState, TaskStatus};
pub use crate::core::subtask::{Outcome, SubTask, SubTaskContext, SubTaskError};
pub use crate::core::types::{TaskType, TaskUuid};
pub use events::{AuditNotification, Event, EventBus, EventHandler, LoggingHandler};
pub use execution::{
    CommandInfrastructure, CommandInfrastructureBuilder, GroupResult, GroupRunner, SubTaskReport,
    TaskExecutor, TaskRun,
};
#[cfg(feature = "sqlite")]
pub use storage::SqliteStorage;
pub use storage::{InMemoryStorage, StorageError, TaskStateStore};
pub use tasks::{
    CreateUniverse, CreateUniverseParams, DnsCommand, ManipulateDnsRecord,
    ManipulateDnsRecordParams, OperationSubTask, TaskBuilder, TaskPlan, TaskRegistry,
    UpgradeKind, UpgradeUniverse, UpgradeUniverseParams,
};
