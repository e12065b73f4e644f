//! The commissioner: public entry point for submitting and tracking tasks.
//!
//! It validates submissions, spawns one executor per task and keeps the
//! directory of tasks in flight in this process.

mod engine;
mod types;

pub use engine::Commissioner;
pub use types::CommissionerError;
