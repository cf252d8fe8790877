//! Progress events streamed while a task executes.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::task::{TaskId, TaskSummary};

/// A structured event emitted by the orchestration loop.
///
/// Serialises as a flat object tagged by `type`, one event per transport frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskEvent {
    IterationStart {
        iteration: usize,
        message: String,
    },
    /// Model reasoning, diagnostic only
    Reasoning {
        content: String,
    },
    ActionStart {
        tool: String,
        params: Value,
    },
    ActionSuccess {
        tool: String,
        result: Value,
    },
    ActionFailed {
        tool: String,
        error: String,
        error_type: String,
    },
    SecurityViolation {
        tool: String,
        error: String,
    },
    TaskCompleted {
        success: bool,
        message: String,
        result: Value,
        summary: TaskSummary,
    },
    TaskFailed {
        error: String,
        summary: TaskSummary,
    },
    /// Recoverable problem, e.g. a failed model call
    Error {
        message: String,
    },
}

impl TaskEvent {
    pub fn event_name(&self) -> &'static str {
        match self {
            TaskEvent::IterationStart { .. } => "iteration_start",
            TaskEvent::Reasoning { .. } => "reasoning",
            TaskEvent::ActionStart { .. } => "action_start",
            TaskEvent::ActionSuccess { .. } => "action_success",
            TaskEvent::ActionFailed { .. } => "action_failed",
            TaskEvent::SecurityViolation { .. } => "security_violation",
            TaskEvent::TaskCompleted { .. } => "task_completed",
            TaskEvent::TaskFailed { .. } => "task_failed",
            TaskEvent::Error { .. } => "error",
        }
    }

    /// `true` for `task_completed` and `task_failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskEvent::TaskCompleted { .. } | TaskEvent::TaskFailed { .. }
        )
    }
}

/// Non-blocking handoff of events to whoever consumes the execution.
///
/// Progress events are best effort: when the buffer is full or the receiver is gone
/// they are dropped and the loop carries on. One slot is reserved at construction for
/// the terminal event, so `task_completed`/`task_failed` always reaches a connected
/// consumer.
#[derive(Debug, Clone)]
pub struct EventSink {
    task_id: TaskId,
    tx: Option<mpsc::Sender<TaskEvent>>,
    terminal_slot: Arc<Mutex<Option<mpsc::OwnedPermit<TaskEvent>>>>,
}

impl EventSink {
    pub fn new(task_id: TaskId, tx: mpsc::Sender<TaskEvent>) -> Self {
        let permit = match tx.clone().try_reserve_owned() {
            Ok(permit) => Some(permit),
            Err(_) => {
                tracing::warn!("[Task {}] Could not reserve a slot for the terminal event", task_id);
                None
            }
        };
        Self {
            task_id,
            tx: Some(tx),
            terminal_slot: Arc::new(Mutex::new(permit)),
        }
    }

    /// A sink that discards everything.
    pub fn detached(task_id: TaskId) -> Self {
        Self {
            task_id,
            tx: None,
            terminal_slot: Arc::new(Mutex::new(None)),
        }
    }

    pub fn emit(&self, event: TaskEvent) {
        let Some(tx) = &self.tx else {
            return;
        };

        if event.is_terminal() {
            let permit = self.terminal_slot.lock().ok().and_then(|mut slot| slot.take());
            if let Some(permit) = permit {
                permit.send(event);
                return;
            }
        }

        match tx.try_send(event) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    "[Task {}] Event buffer full, dropping {} event",
                    self.task_id,
                    event.event_name()
                );
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(
                    "[Task {}] No consumer, dropping {} event",
                    self.task_id,
                    event.event_name()
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_type_tag_matches_event_name() {
        let events = vec![
            TaskEvent::IterationStart {
                iteration: 1,
                message: "Thinking...".to_string(),
            },
            TaskEvent::ActionStart {
                tool: "read_file".to_string(),
                params: json!({"path": "src/a.py"}),
            },
            TaskEvent::SecurityViolation {
                tool: "read_file".to_string(),
                error: "Path traversal detected".to_string(),
            },
            TaskEvent::Error {
                message: "LLM request failed".to_string(),
            },
        ];

        for event in events {
            let value = serde_json::to_value(&event).unwrap();
            assert_eq!(value["type"], event.event_name());
            assert!(!event.is_terminal());
        }
    }

    #[test]
    fn test_flat_shape() {
        let value = serde_json::to_value(TaskEvent::ActionSuccess {
            tool: "finish".to_string(),
            result: json!({"finished": true}),
        })
        .unwrap();
        assert_eq!(
            value,
            json!({"type": "action_success", "tool": "finish", "result": {"finished": true}})
        );
    }

    #[test]
    fn test_sink_never_blocks() {
        let (tx, mut rx) = mpsc::channel(2);
        let sink = EventSink::new(TaskId::from("t"), tx);
        for i in 0..3 {
            sink.emit(TaskEvent::Error {
                message: format!("e{}", i),
            });
        }
        assert!(matches!(rx.try_recv(), Ok(TaskEvent::Error { message }) if message == "e0"));
        assert!(rx.try_recv().is_err());

        drop(rx);
        sink.emit(TaskEvent::Error {
            message: "after close".to_string(),
        });
    }

    #[test]
    fn test_terminal_event_survives_full_buffer() {
        let (tx, mut rx) = mpsc::channel(2);
        let sink = EventSink::new(TaskId::from("t"), tx);
        for i in 0..5 {
            sink.emit(TaskEvent::IterationStart {
                iteration: i,
                message: "Thinking...".to_string(),
            });
        }

        let record = crate::task::TaskRecord::new(
            TaskId::from("t"),
            "request".to_string(),
            std::path::PathBuf::from("/ws"),
        )
        .unwrap();
        sink.emit(TaskEvent::TaskFailed {
            error: "Max iterations (5) reached without completion".to_string(),
            summary: record.summary(),
        });
        drop(sink);

        let mut names = Vec::new();
        while let Ok(event) = rx.try_recv() {
            names.push(event.event_name());
        }
        assert_eq!(names, vec!["iteration_start", "task_failed"]);
    }
}
