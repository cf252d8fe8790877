//! Tool system for the agent.
//!
//! Tools are the agent's only way to act on its workspace: read and edit files, search
//! code, run tests and allowed commands, and signal completion.
//!
//! ## Confinement
//!
//! Tools resolve relative paths against the workspace they are handed but never check
//! confinement themselves. Every call is validated by the policy engine
//! (`crate::security::PolicyEngine`) before it reaches a tool.

mod directory;
mod file_ops;
mod interaction;
mod search;
mod terminal;

pub use directory::ListFiles;
pub use file_ops::{CreateFile, DeleteFile, EditFile, ReadFile};
pub use interaction::{AskUser, Finish, ReportError};
pub use search::SearchCode;
pub use terminal::{RunCommand, RunTests};

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// Name of the action that ends a task's execution loop.
pub const TERMINAL_ACTION: &str = "finish";

/// Failure of a single tool dispatch.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Unknown tool: '{name}'. Available tools: {}", .available.join(", "))]
    Unknown { name: String, available: Vec<String> },

    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    #[error("{0}")]
    ExecutionFailed(String),
}

impl ToolError {
    /// Short machine-readable tag, reported alongside the message.
    pub fn kind(&self) -> &'static str {
        match self {
            ToolError::Unknown { .. } => "unknown_action",
            ToolError::InvalidParameters(_) => "invalid_parameters",
            ToolError::NotFound(_) => "not_found",
            ToolError::AlreadyExists(_) => "already_exists",
            ToolError::PermissionDenied(_) => "permission_denied",
            ToolError::Io(_) => "io_error",
            ToolError::Timeout(_) => "timeout",
            ToolError::ExecutionFailed(_) => "execution_failed",
        }
    }

    /// Map an I/O error on `path` to the closest tool error.
    pub(crate) fn from_io(path: &str, err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => ToolError::NotFound(path.to_string()),
            std::io::ErrorKind::PermissionDenied => {
                ToolError::PermissionDenied(format!("{}: {}", path, err))
            }
            std::io::ErrorKind::AlreadyExists => ToolError::AlreadyExists(path.to_string()),
            _ => ToolError::Io(err),
        }
    }
}

/// Join a relative path onto the workspace; absolute paths pass through.
pub fn resolve_path(path: &str, workspace: &Path) -> PathBuf {
    let path = Path::new(path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        workspace.join(path)
    }
}

pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", key)))
}

/// Glob matching on a single name: `*` matches any run, `?` any one character.
pub(crate) fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '*')
}

/// Information about a tool for display and prompting.
#[derive(Debug, Clone, Serialize)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// Trait for implementing tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// The unique name of this tool.
    fn name(&self) -> &str;

    /// A description of what this tool does.
    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether a successful call ends the task.
    fn is_terminal(&self) -> bool {
        false
    }

    /// Execute the tool with the given arguments.
    ///
    /// Relative paths resolve from `workspace`; confinement has already been checked.
    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError>;
}

/// Registry of available tools, keyed by action name.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    /// Create a registry with every built-in tool.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();

        // File operations
        registry.register(Arc::new(ReadFile));
        registry.register(Arc::new(EditFile));
        registry.register(Arc::new(CreateFile));
        registry.register(Arc::new(DeleteFile));

        // Search
        registry.register(Arc::new(ListFiles));
        registry.register(Arc::new(SearchCode));

        // Processes
        registry.register(Arc::new(RunTests));
        registry.register(Arc::new(RunCommand));

        // Interaction and task control
        registry.register(Arc::new(Finish));
        registry.register(Arc::new(AskUser));
        registry.register(Arc::new(ReportError));

        tracing::debug!("ToolRegistry created with {} tools", registry.tools.len());
        registry
    }

    /// Create an empty registry (no built-in tools).
    pub fn empty() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool under its own name, returning any tool it replaced.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Option<Arc<dyn Tool>> {
        self.tools.insert(tool.name().to_string(), tool)
    }

    /// List all available tools, sorted by name.
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut tools: Vec<ToolInfo> = self
            .tools
            .values()
            .map(|t| ToolInfo {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Registered action names, sorted.
    pub fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tools.keys().cloned().collect();
        names.sort();
        names
    }

    /// Check if a tool exists by name.
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Whether `name` is registered and ends the task on success.
    pub fn is_terminal(&self, name: &str) -> bool {
        self.tools.get(name).map(|t| t.is_terminal()).unwrap_or(false)
    }

    /// Render the tool list for model instructions.
    pub fn system_prompt_section(&self) -> String {
        let mut section = String::from("Available tools:\n");
        for tool in self.list_tools() {
            section.push_str(&format!("- {}: {}\n", tool.name, tool.description));
            if let Some(props) = tool.parameters["properties"].as_object() {
                let params: Vec<&str> = props.keys().map(String::as_str).collect();
                if !params.is_empty() {
                    section.push_str(&format!("  params: {}\n", params.join(", ")));
                }
            }
        }
        section
    }

    /// Execute a tool by name.
    pub async fn execute(
        &self,
        name: &str,
        args: Value,
        workspace: &Path,
    ) -> Result<Value, ToolError> {
        let tool = self.tools.get(name).ok_or_else(|| ToolError::Unknown {
            name: name.to_string(),
            available: self.tool_names(),
        })?;

        tracing::debug!("Executing tool {} with {}", name, args);
        tool.execute(args, workspace).await
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
