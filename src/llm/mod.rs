//! Model gateway: asks a language model for the next batch of actions.
//!
//! The orchestrator only sees the `ModelGateway` trait and the structured
//! `AgentResponse`; extracting actions from noisy model output happens here.

mod error;
mod ollama;
mod parse;

pub use error::{classify_http_status, LlmError, LlmErrorKind, RetryConfig};
pub use ollama::{default_system_prompt, OllamaGateway};
pub use parse::parse_agent_response;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role in a chat conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A message in a chat conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// One action proposed by the model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProposedAction {
    pub tool: String,
    #[serde(default)]
    pub params: Value,
}

impl ProposedAction {
    pub fn new(tool: impl Into<String>, params: Value) -> Self {
        Self {
            tool: tool.into(),
            params,
        }
    }
}

/// Structured model output for one iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct AgentResponse {
    /// Free-text reasoning, diagnostic only
    pub reasoning: Option<String>,
    /// Actions in the order they should run
    pub actions: Vec<ProposedAction>,
    /// Unparsed model text, kept for the conversation window
    pub raw: String,
}

/// Source of the next actions for a task.
#[async_trait]
pub trait ModelGateway: Send + Sync {
    /// Ask the model what to do next given the conversation so far.
    async fn next_actions(
        &self,
        messages: &[ChatMessage],
        workspace: &Path,
    ) -> Result<AgentResponse, LlmError>;
}
