//! Process execution tools: allowed commands and the test runner.
//!
//! Commands are split on whitespace and spawned directly, never through a shell, so
//! metacharacters that slip past the policy engine have no effect.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use serde_json::{json, Value};
use tokio::process::Command;

use super::{required_str, resolve_path, Tool, ToolError};
use crate::util::sanitize_output;

/// Cap on each captured stream.
const MAX_OUTPUT_CHARS: usize = 10_000;

struct ProcessOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
}

fn truncate_output(mut text: String) -> String {
    if text.chars().count() > MAX_OUTPUT_CHARS {
        text = text.chars().take(MAX_OUTPUT_CHARS).collect();
        text.push_str("\n... [output truncated]");
    }
    text
}

async fn run_process(
    program: &str,
    args: &[String],
    cwd: &Path,
    timeout: Duration,
) -> Result<ProcessOutput, ToolError> {
    tracing::info!("Executing in {:?}: {} {}", cwd, program, args.join(" "));

    let child = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ToolError::ExecutionFailed(format!(
                "Command not found: {}. Make sure it's installed and in PATH.",
                program
            )),
            _ => ToolError::ExecutionFailed(format!("Failed to run {}: {}", program, e)),
        })?;

    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            tracing::error!("Process {} failed: {}", program, e);
            return Err(ToolError::ExecutionFailed(format!(
                "Failed to run {}: {}",
                program, e
            )));
        }
        Err(_) => {
            tracing::error!("{} timed out after {} seconds", program, timeout.as_secs());
            return Err(ToolError::Timeout(timeout));
        }
    };

    let result = ProcessOutput {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: truncate_output(sanitize_output(&output.stdout)),
        stderr: truncate_output(sanitize_output(&output.stderr)),
    };

    tracing::debug!(
        "{} completed: exit={}, stdout_len={}, stderr_len={}",
        program,
        result.exit_code,
        result.stdout.len(),
        result.stderr.len()
    );

    Ok(result)
}

fn timeout_param(args: &Value, default_secs: u64) -> Duration {
    Duration::from_secs(args["timeout"].as_u64().unwrap_or(default_secs).max(1))
}

/// Run an allowed program in the workspace.
pub struct RunCommand;

#[async_trait]
impl Tool for RunCommand {
    fn name(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        "Run an allowed program (e.g. 'python -m mypy src') in the workspace. No shell: pipes, redirection and chaining are not available."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Program and arguments separated by spaces"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 30)"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let command = required_str(&args, "command")?;
        let timeout = timeout_param(&args, 30);

        let mut parts = command.split_whitespace().map(String::from);
        let program = parts
            .next()
            .ok_or_else(|| ToolError::InvalidParameters("command cannot be empty".to_string()))?;
        let rest: Vec<String> = parts.collect();

        let output = run_process(&program, &rest, workspace, timeout).await?;
        if output.exit_code != 0 {
            tracing::warn!("{} exited with code {}", program, output.exit_code);
        }

        Ok(json!({
            "success": output.exit_code == 0,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
        }))
    }
}

/// Run the project's pytest suite, or part of it.
pub struct RunTests;

/// Pull `N passed` / `N failed` / `N error(s)` counts out of pytest's summary line.
fn parse_pytest_summary(output: &str) -> Value {
    let count = |label: &str| -> u64 {
        Regex::new(&format!(r"(\d+)\s+{}", label))
            .ok()
            .and_then(|re| re.captures(output))
            .and_then(|caps| caps.get(1))
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    json!({
        "passed": count("passed"),
        "failed": count("failed"),
        "errors": count("error"),
    })
}

#[async_trait]
impl Tool for RunTests {
    fn name(&self) -> &str {
        "run_tests"
    }

    fn description(&self) -> &str {
        "Run pytest in the workspace. scope: 'all' (tests/), 'directory' or 'file' (requires path), 'filter' (requires filter, passed to -k)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "scope": {
                    "type": "string",
                    "enum": ["all", "directory", "file", "filter"],
                    "description": "Which tests to run (default: 'all')"
                },
                "path": {
                    "type": "string",
                    "description": "Test directory or file for scope 'directory' / 'file'"
                },
                "filter": {
                    "type": "string",
                    "description": "pytest -k expression for scope 'filter'"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Timeout in seconds (default: 60)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let scope = args["scope"].as_str().unwrap_or("all");
        let timeout = timeout_param(&args, 60);
        let tests_dir = workspace.join("tests").display().to_string();

        let mut pytest_args: Vec<String> = vec!["-v".to_string(), "--tb=short".to_string()];
        match scope {
            "all" => pytest_args.push(tests_dir),
            "directory" | "file" => {
                let path = args["path"].as_str().ok_or_else(|| {
                    ToolError::InvalidParameters(format!(
                        "'path' parameter is required for scope={}",
                        scope
                    ))
                })?;
                let resolved = resolve_path(path, workspace);
                if !resolved.exists() {
                    return Err(ToolError::NotFound(format!("Test path not found: {}", path)));
                }
                pytest_args.push(resolved.display().to_string());
            }
            "filter" => {
                let filter = args["filter"].as_str().ok_or_else(|| {
                    ToolError::InvalidParameters(
                        "'filter' parameter is required for scope=filter".to_string(),
                    )
                })?;
                pytest_args.push("-k".to_string());
                pytest_args.push(filter.to_string());
                pytest_args.push(tests_dir);
            }
            other => {
                return Err(ToolError::InvalidParameters(format!(
                    "Invalid scope: {}. Must be 'all', 'directory', 'file', or 'filter'",
                    other
                )))
            }
        }

        let output = run_process("pytest", &pytest_args, workspace, timeout).await?;
        let summary = parse_pytest_summary(&output.stdout);

        tracing::info!(
            "Tests completed: passed={}, failed={}, errors={}",
            summary["passed"],
            summary["failed"],
            summary["errors"]
        );

        Ok(json!({
            "success": output.exit_code == 0,
            "exit_code": output.exit_code,
            "stdout": output.stdout,
            "stderr": output.stderr,
            "summary": summary,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_pytest_summary() {
        let summary =
            parse_pytest_summary("===== 5 passed, 2 failed, 1 error in 0.12s =====");
        assert_eq!(summary, json!({"passed": 5, "failed": 2, "errors": 1}));

        let empty = parse_pytest_summary("no tests ran");
        assert_eq!(empty, json!({"passed": 0, "failed": 0, "errors": 0}));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_captures_output() {
        let ws = TempDir::new().unwrap();
        let out = RunCommand
            .execute(json!({"command": "echo hello world"}), ws.path())
            .await
            .unwrap();
        assert_eq!(out["success"], true);
        assert_eq!(out["exit_code"], 0);
        assert_eq!(out["stdout"], "hello world\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_does_not_use_a_shell() {
        let ws = TempDir::new().unwrap();
        let out = RunCommand
            .execute(json!({"command": "echo a && echo b"}), ws.path())
            .await
            .unwrap();
        assert_eq!(out["stdout"], "a && echo b\n");
    }

    #[tokio::test]
    async fn test_run_command_missing_program() {
        let ws = TempDir::new().unwrap();
        let err = RunCommand
            .execute(
                json!({"command": "definitely-not-a-real-program-xyz --flag"}),
                ws.path(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Command not found"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_command_timeout() {
        let ws = TempDir::new().unwrap();
        let err = RunCommand
            .execute(json!({"command": "sleep 5", "timeout": 1}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout");
    }

    #[tokio::test]
    async fn test_run_tests_validates_scope() {
        let ws = TempDir::new().unwrap();
        let err = RunTests
            .execute(json!({"scope": "file"}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameters");

        let err = RunTests
            .execute(json!({"scope": "everything"}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameters");

        let err = RunTests
            .execute(json!({"scope": "file", "path": "tests/test_x.py"}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }
}
