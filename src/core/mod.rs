//! Core domain types: identifiers, params, subtasks, groups, retry policy
//! and task state.

pub mod group;
pub mod infra;
pub mod params;
pub mod retry;
pub mod state;
pub mod subtask;
pub mod types;
