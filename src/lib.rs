//! # Workspace Agent
//!
//! Autonomous coding agent confined to a single workspace directory.
//!
//! This library provides:
//! - A policy engine that confines file access and command execution to a workspace
//! - A tool registry with file, search, process and task-control capabilities
//! - An orchestration loop that turns model output into validated tool calls
//! - A task manager that tracks tasks and serializes their execution
//!
//! ## Architecture
//!
//! ```text
//!        ┌──────────────────────────────────┐
//!        │           TaskManager            │
//!        │   (records, per-task lock)       │
//!        └────────────────┬─────────────────┘
//!                         │ execute_task
//!                         ▼
//!                ┌─────────────────┐
//!                │  Orchestrator   │◄──── ModelGateway (Ollama)
//!                └───┬─────────┬───┘
//!                    │         │
//!                    ▼         ▼
//!           PolicyEngine    ToolRegistry
//! ```
//!
//! ## Task Flow
//! 1. Create a task with a request and a workspace root
//! 2. Ask the model for the next batch of actions
//! 3. Validate each action, then dispatch it
//! 4. Feed the results back until `finish`, a policy rejection, or a limit
//!
//! ## Modules
//! - `agents`: orchestration loop, conversation window, events
//! - `task`: task records and the task manager
//! - `security`: policy engine
//! - `tools`: tool trait, registry and built-in tools
//! - `llm`: model gateway trait and the Ollama client

pub mod agents;
pub mod config;
pub mod llm;
pub mod security;
pub mod task;
pub mod tools;
pub mod util;

pub use agents::{Orchestrator, TaskEvent};
pub use config::Config;
pub use security::{PolicyConfig, PolicyEngine, PolicyViolation};
pub use task::{TaskId, TaskManager, TaskRecord, TaskStatus};
pub use tools::{Tool, ToolError, ToolRegistry};
