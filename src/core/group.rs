//! Subtask groups.
//!
//! A group is one step of a task: an ordered list of subtasks executed
//! either one after another or all at once.

use std::fmt;
use std::sync::Arc;

use super::subtask::SubTask;

/// How the members of a group are executed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExecutionMode {
    /// Declared order; the group stops at the first failure.
    #[default]
    Sequential,
    /// All members dispatched together; the group waits for every one.
    ///
    /// Members must be independent of each other.
    Concurrent,
}

/// An ordered batch of subtasks forming one execution step.
#[derive(Clone)]
pub struct SubTaskGroup {
    name: String,
    mode: ExecutionMode,
    subtasks: Vec<Arc<dyn SubTask>>,
}

impl SubTaskGroup {
    /// Create an empty group.
    pub fn new(name: impl Into<String>, mode: ExecutionMode) -> Self {
        Self {
            name: name.into(),
            mode,
            subtasks: Vec::new(),
        }
    }

    /// Create an empty sequential group.
    pub fn sequential(name: impl Into<String>) -> Self {
        Self::new(name, ExecutionMode::Sequential)
    }

    /// Create an empty concurrent group.
    pub fn concurrent(name: impl Into<String>) -> Self {
        Self::new(name, ExecutionMode::Concurrent)
    }

    /// Builder: append a subtask.
    pub fn add(mut self, subtask: Arc<dyn SubTask>) -> Self {
        self.subtasks.push(subtask);
        self
    }

    /// Append a subtask in place.
    pub fn push(&mut self, subtask: Arc<dyn SubTask>) {
        self.subtasks.push(subtask);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn subtasks(&self) -> &[Arc<dyn SubTask>] {
        &self.subtasks
    }

    pub fn len(&self) -> usize {
        self.subtasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subtasks.is_empty()
    }

    /// Whether the group may be re-run after a transient failure.
    ///
    /// True when at least one member declares itself retryable.
    pub fn is_retryable(&self) -> bool {
        self.subtasks.iter().any(|s| s.retryable())
    }
}

impl fmt::Debug for SubTaskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.subtasks.iter().map(|s| s.name()).collect();
        f.debug_struct("SubTaskGroup")
            .field("name", &self.name)
            .field("mode", &self.mode)
            .field("subtasks", &names)
            .finish()
    }
}
