//! Task control tools: finish, ask the user, report an error.
//!
//! None of these touch the workspace.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, Tool, ToolError, TERMINAL_ACTION};

/// Signal that the task is done.
pub struct Finish;

#[async_trait]
impl Tool for Finish {
    fn name(&self) -> &str {
        TERMINAL_ACTION
    }

    fn description(&self) -> &str {
        "Call this when the requested work is complete. Provide a short summary message."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "success": {
                    "type": "boolean",
                    "description": "Whether the task succeeded (default: true)"
                },
                "message": {
                    "type": "string",
                    "description": "Summary of what was done"
                },
                "result": {
                    "type": "object",
                    "description": "Optional structured result"
                }
            }
        })
    }

    fn is_terminal(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, _workspace: &Path) -> Result<Value, ToolError> {
        let success = args["success"].as_bool().unwrap_or(true);
        let message = args["message"].as_str().unwrap_or("Task completed");
        let result = match &args["result"] {
            Value::Null => json!({}),
            other => other.clone(),
        };

        tracing::info!("Task finished: success={}, message={}", success, message);

        Ok(json!({
            "finished": true,
            "success": success,
            "message": message,
            "result": result,
        }))
    }
}

/// Record a question for the user. Does not wait for an answer.
pub struct AskUser;

#[async_trait]
impl Tool for AskUser {
    fn name(&self) -> &str {
        "ask_user"
    }

    fn description(&self) -> &str {
        "Ask the user a question when the request is ambiguous."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string"},
                "options": {"type": "array", "items": {"type": "string"}},
                "default": {"type": "string"}
            },
            "required": ["question"]
        })
    }

    async fn execute(&self, args: Value, _workspace: &Path) -> Result<Value, ToolError> {
        let question = required_str(&args, "question")?;
        tracing::info!("Asking user: {}", question);

        Ok(json!({
            "asked": true,
            "question": question,
            "options": args["options"],
            "default": args["default"],
            "awaiting_response": true,
        }))
    }
}

/// Report a problem the agent cannot work around.
pub struct ReportError;

#[async_trait]
impl Tool for ReportError {
    fn name(&self) -> &str {
        "report_error"
    }

    fn description(&self) -> &str {
        "Report a blocking error with optional details."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "error": {"type": "string"},
                "details": {"type": "string"},
                "recoverable": {"type": "boolean"}
            },
            "required": ["error"]
        })
    }

    async fn execute(&self, args: Value, _workspace: &Path) -> Result<Value, ToolError> {
        let error = required_str(&args, "error")?;
        let details = args["details"].as_str().unwrap_or("");
        let recoverable = args["recoverable"].as_bool().unwrap_or(false);

        tracing::error!("Agent reported error: {}", error);
        if !details.is_empty() {
            tracing::error!("Error details: {}", details);
        }

        Ok(json!({
            "error_reported": true,
            "error": error,
            "details": details,
            "recoverable": recoverable,
        }))
    }
}
