//! Agents module - the orchestration loop that executes a task.
//!
//! # Components
//! - **Orchestrator**: drives one task through model calls, policy checks and tool dispatch
//! - **ConversationWindow**: bounded message history for one execution
//! - **TaskEvent**: progress events streamed to the caller
//!
//! # Design Principles
//! - One worker per execution; the loop itself is single-threaded
//! - Policy rejections end the task, tool and model failures are fed back to the model
//! - Event delivery never blocks the loop

mod conversation;
mod events;
mod orchestrator;

pub use conversation::ConversationWindow;
pub use events::{EventSink, TaskEvent};
pub use orchestrator::{format_results, Orchestrator};
