//! Task record: one user request tracked from creation to a terminal state.
//!
//! # State Machine
//! ```text
//! Pending -> Running -> Completed
//!                   \-> Failed
//! ```
//! Transitions never go backwards; illegal ones return `TaskError::InvalidTransition`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::llm::ProposedAction;

/// Unique identifier for a task.
///
/// Caller-supplied ids are kept verbatim; generated ids are UUID v4 strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    /// Create a new unique task ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a task in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Created, not yet executed
    Pending,
    /// An orchestration loop holds the task
    Running,
    /// Finished through the terminal action
    Completed,
    /// Aborted; see the record's `error`
    Failed,
}

impl TaskStatus {
    /// `true` if the task is Completed or Failed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Outcome of one dispatched (or rejected) action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionOutcome {
    pub tool: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
}

impl ActionOutcome {
    pub fn success(tool: impl Into<String>, result: Value) -> Self {
        Self {
            tool: tool.into(),
            success: true,
            result: Some(result),
            error: None,
            error_type: None,
        }
    }

    pub fn failure(
        tool: impl Into<String>,
        error: impl Into<String>,
        error_type: impl Into<String>,
    ) -> Self {
        Self {
            tool: tool.into(),
            success: false,
            result: None,
            error: Some(error.into()),
            error_type: Some(error_type.into()),
        }
    }
}

/// Audit entry for one loop iteration. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub index: usize,
    pub reasoning: Option<String>,
    pub actions: Vec<ProposedAction>,
    pub results: Vec<ActionOutcome>,
    pub timestamp: DateTime<Utc>,
}

impl IterationRecord {
    pub fn new(
        index: usize,
        reasoning: Option<String>,
        actions: Vec<ProposedAction>,
        results: Vec<ActionOutcome>,
    ) -> Self {
        Self {
            index,
            reasoning,
            actions,
            results,
            timestamp: Utc::now(),
        }
    }
}

/// Snapshot of a record, attached to terminal events and returned by listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub task_id: TaskId,
    pub user_request: String,
    pub workspace_path: PathBuf,
    pub status: TaskStatus,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub iterations: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
}

/// A task to be executed by the orchestrator.
///
/// # Invariants
/// - `result.is_some()` only when `status == Completed`
/// - `error.is_some()` only when `status == Failed`
/// - `history` is append-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    id: TaskId,
    request: String,
    workspace: PathBuf,
    status: TaskStatus,
    result: Option<Value>,
    error: Option<String>,
    history: Vec<IterationRecord>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TaskRecord {
    /// Create a pending task.
    ///
    /// # Errors
    /// Returns `TaskError::EmptyRequest` if `request` is blank.
    pub fn new(id: TaskId, request: String, workspace: PathBuf) -> Result<Self, TaskError> {
        if request.trim().is_empty() {
            return Err(TaskError::EmptyRequest);
        }

        Ok(Self {
            id,
            request,
            workspace,
            status: TaskStatus::Pending,
            result: None,
            error: None,
            history: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        })
    }

    pub fn id(&self) -> &TaskId {
        &self.id
    }

    pub fn request(&self) -> &str {
        &self.request
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn transition(&mut self, expected: TaskStatus, to: TaskStatus) -> Result<(), TaskError> {
        if self.status != expected {
            return Err(TaskError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Pending -> Running.
    pub fn start(&mut self) -> Result<(), TaskError> {
        self.transition(TaskStatus::Pending, TaskStatus::Running)?;
        self.started_at = Some(Utc::now());
        tracing::info!("Task {} started", self.id);
        Ok(())
    }

    /// Running -> Completed with the terminal action's payload.
    pub fn complete(&mut self, result: Value) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running, TaskStatus::Completed)?;
        self.result = Some(result);
        self.completed_at = Some(Utc::now());
        tracing::info!("Task {} completed", self.id);
        Ok(())
    }

    /// Running -> Failed with a human-readable cause.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), TaskError> {
        self.transition(TaskStatus::Running, TaskStatus::Failed)?;
        let error = error.into();
        tracing::error!("Task {} failed: {}", self.id, error);
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Append an iteration to the audit history. Only allowed while running.
    pub fn add_iteration(&mut self, record: IterationRecord) -> Result<(), TaskError> {
        if self.status != TaskStatus::Running {
            return Err(TaskError::NotRunning(self.status));
        }
        self.history.push(record);
        Ok(())
    }

    /// Seconds since start, up to completion (or now while running).
    pub fn duration(&self) -> Option<f64> {
        let started = self.started_at?;
        let end = self.completed_at.unwrap_or_else(Utc::now);
        Some((end - started).num_milliseconds() as f64 / 1000.0)
    }

    pub fn iteration_count(&self) -> usize {
        self.history.len()
    }

    pub fn summary(&self) -> TaskSummary {
        TaskSummary {
            task_id: self.id.clone(),
            user_request: self.request.clone(),
            workspace_path: self.workspace.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
            iterations: self.iteration_count(),
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration_seconds: self.duration(),
        }
    }
}

/// Errors that can occur during task operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TaskError {
    #[error("Task request cannot be empty")]
    EmptyRequest,

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: TaskStatus, to: TaskStatus },

    #[error("Task is {0}, not running")]
    NotRunning(TaskStatus),
}
