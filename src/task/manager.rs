//! Concurrency-safe registry of task records with serialized execution.
//!
//! Each task carries its own execution lock. `execute_task` takes it without waiting
//! and hands it to a spawned worker, so the loop runs to completion even if the caller
//! stops reading events.

use std::collections::HashMap;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::Stream;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex, RwLock};

use super::task::{TaskError, TaskId, TaskRecord, TaskStatus};
use crate::agents::{EventSink, Orchestrator, TaskEvent};

#[derive(Debug, Error)]
pub enum TaskManagerError {
    #[error("Task not found: {0}")]
    NotFound(TaskId),

    #[error("Task already exists: {0}")]
    DuplicateId(TaskId),

    #[error("Task {0} is already running")]
    AlreadyRunning(TaskId),

    #[error("Task {id} already finished ({status})")]
    AlreadyFinished { id: TaskId, status: TaskStatus },

    #[error("Cannot delete running task: {0}")]
    StillRunning(TaskId),

    #[error(transparent)]
    InvalidTask(#[from] TaskError),
}

/// Task counts by status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TaskStats {
    pub total: usize,
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
}

#[derive(Clone)]
struct TaskEntry {
    record: Arc<RwLock<TaskRecord>>,
    exec_lock: Arc<Mutex<()>>,
}

/// Live events of one execution, ending after the terminal event.
#[derive(Debug)]
pub struct TaskEventStream {
    task_id: TaskId,
    rx: mpsc::Receiver<TaskEvent>,
}

impl TaskEventStream {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Next event, or `None` once the execution has finished.
    pub async fn recv(&mut self) -> Option<TaskEvent> {
        self.rx.recv().await
    }
}

impl Stream for TaskEventStream {
    type Item = TaskEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Owns every task record and drives executions through the orchestrator.
#[derive(Clone)]
pub struct TaskManager {
    tasks: Arc<RwLock<HashMap<TaskId, TaskEntry>>>,
    orchestrator: Orchestrator,
    event_buffer: usize,
}

impl TaskManager {
    pub fn new(orchestrator: Orchestrator) -> Self {
        let event_buffer = orchestrator.limits().event_buffer.max(1);
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            orchestrator,
            event_buffer,
        }
    }

    /// Register a new pending task. An id is generated when none is given.
    pub async fn create_task(
        &self,
        id: Option<TaskId>,
        request: impl Into<String>,
        workspace: PathBuf,
    ) -> Result<TaskRecord, TaskManagerError> {
        let id = id.unwrap_or_default();
        let record = TaskRecord::new(id.clone(), request.into(), workspace)?;

        let mut tasks = self.tasks.write().await;
        if tasks.contains_key(&id) {
            return Err(TaskManagerError::DuplicateId(id));
        }
        tasks.insert(
            id.clone(),
            TaskEntry {
                record: Arc::new(RwLock::new(record.clone())),
                exec_lock: Arc::new(Mutex::new(())),
            },
        );

        tracing::info!("Created task {} in {}", id, record.workspace().display());
        Ok(record)
    }

    /// Snapshot of a task.
    pub async fn get_task(&self, id: &TaskId) -> Option<TaskRecord> {
        let entry = self.tasks.read().await.get(id).cloned()?;
        let record = entry.record.read().await.clone();
        Some(record)
    }

    /// Snapshots of all tasks, oldest first, optionally filtered by status.
    pub async fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        let entries: Vec<TaskEntry> = self.tasks.read().await.values().cloned().collect();

        let mut records = Vec::with_capacity(entries.len());
        for entry in entries {
            let record = entry.record.read().await;
            if status.map_or(true, |s| record.status() == s) {
                records.push(record.clone());
            }
        }
        records.sort_by(|a, b| {
            a.created_at()
                .cmp(&b.created_at())
                .then_with(|| a.id().cmp(b.id()))
        });
        records
    }

    /// Remove a task that is not running.
    ///
    /// Returns `Ok(false)` if there was no such task.
    pub async fn delete_task(&self, id: &TaskId) -> Result<bool, TaskManagerError> {
        let mut tasks = self.tasks.write().await;
        let Some(entry) = tasks.get(id) else {
            return Ok(false);
        };

        let running = entry.exec_lock.try_lock().is_err()
            || entry.record.read().await.status() == TaskStatus::Running;
        if running {
            tracing::warn!("Refusing to delete running task {}", id);
            return Err(TaskManagerError::StillRunning(id.clone()));
        }

        tasks.remove(id);
        tracing::info!("Deleted task {}", id);
        Ok(true)
    }

    /// Start executing a pending task and return its live event stream.
    ///
    /// Never waits for another execution: if the task is already held the call fails
    /// with `AlreadyRunning` straight away.
    pub async fn execute_task(&self, id: &TaskId) -> Result<TaskEventStream, TaskManagerError> {
        let (record, guard) = {
            // The registry read lock is held until the execution lock is taken, so a
            // concurrent delete either sees the lock held or runs before we start.
            let tasks = self.tasks.read().await;
            let entry = tasks
                .get(id)
                .ok_or_else(|| TaskManagerError::NotFound(id.clone()))?;

            let guard = entry
                .exec_lock
                .clone()
                .try_lock_owned()
                .map_err(|_| TaskManagerError::AlreadyRunning(id.clone()))?;

            match entry.record.read().await.status() {
                TaskStatus::Pending => {}
                TaskStatus::Running => return Err(TaskManagerError::AlreadyRunning(id.clone())),
                status => {
                    return Err(TaskManagerError::AlreadyFinished {
                        id: id.clone(),
                        status,
                    })
                }
            }

            (entry.record.clone(), guard)
        };

        let (tx, rx) = mpsc::channel(self.event_buffer);
        let sink = EventSink::new(id.clone(), tx);
        let orchestrator = self.orchestrator.clone();
        let task_id = id.clone();

        tokio::spawn(async move {
            let _guard = guard;
            match orchestrator.run(&record, &sink).await {
                Ok(status) => tracing::info!("Task {} finished: {}", task_id, status),
                Err(e) => tracing::error!("Task {} could not run: {}", task_id, e),
            }
        });

        Ok(TaskEventStream {
            task_id: id.clone(),
            rx,
        })
    }

    /// Task counts by status.
    pub async fn stats(&self) -> TaskStats {
        let mut stats = TaskStats::default();
        for record in self.list_tasks(None).await {
            stats.total += 1;
            match record.status() {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Running => stats.running += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}
