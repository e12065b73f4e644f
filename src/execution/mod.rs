//! Task execution engine.
//!
//! This module provides the execution infrastructure: the bounded worker
//! pool that runs subtask groups, the executor that drives a task through
//! its groups, and the command-backed infrastructure collaborator.

mod command;
mod executor;
mod group_runner;

pub use command::{CommandInfrastructure, CommandInfrastructureBuilder};
pub use executor::{TaskExecutor, TaskRun};
pub use group_runner::{GroupResult, GroupRunner, SubTaskReport};
