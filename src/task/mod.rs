//! Task module - task records and the registry that executes them.
//!
//! - `TaskRecord` is a value object with a monotone status state machine
//! - `TaskManager` owns all records and serializes execution per task id

pub mod task;
mod manager;

pub use manager::{TaskEventStream, TaskManager, TaskManagerError, TaskStats};
pub use task::{
    ActionOutcome, IterationRecord, TaskError, TaskId, TaskRecord, TaskStatus, TaskSummary,
};
