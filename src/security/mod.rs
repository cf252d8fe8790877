//! Policy engine: decides whether a proposed action may touch the filesystem or spawn a
//! process.
//!
//! Every check is a pure function of the engine's `PolicyConfig` and the call arguments,
//! so one engine can be shared across concurrently running tasks.
//!
//! Path-bearing actions are resolved against the workspace root and checked in order:
//! traversal, deny list, allow list (strict mode only), then size ceilings. Commands are
//! scanned for dangerous substrings before the leading program is looked up in the
//! command allow list.

mod config;
mod paths;

pub use config::{PolicyConfig, DEFAULT_MAX_READ_BYTES, DEFAULT_MAX_WRITE_BYTES};
pub use paths::{normalize_lexically, resolve_lenient};

use std::path::{Path, PathBuf};

use serde_json::Value;
use thiserror::Error;

/// Which ceiling a size check is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeLimit {
    Read,
    Write,
}

impl std::fmt::Display for SizeLimit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SizeLimit::Read => write!(f, "read"),
            SizeLimit::Write => write!(f, "write"),
        }
    }
}

/// A typed rejection from the policy engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyViolation {
    #[error("{tool}: '{param}' parameter is required")]
    MissingParameter { tool: String, param: String },

    #[error("Path cannot be empty")]
    EmptyPath,

    #[error("Path traversal detected: '{path}' resolves outside the workspace")]
    PathTraversal { path: String },

    #[error("Access denied to blocked path: '{path}' (matches '{pattern}')")]
    BlockedPath { path: String, pattern: String },

    #[error("Path not in allowed directories ({allowed}): '{path}'")]
    NotAllowed { path: String, allowed: String },

    #[error("File too large for {limit}: {size} bytes (max {max} bytes)")]
    SizeLimitExceeded { size: u64, max: u64, limit: SizeLimit },

    #[error("Command cannot be empty")]
    EmptyCommand,

    #[error("Dangerous pattern detected in command: '{pattern}'")]
    DangerousCommand { pattern: String },

    #[error("Command not allowed: '{command}'. Allowed: {allowed}")]
    CommandNotAllowed { command: String, allowed: String },

    #[error("Invalid workspace '{}': {reason}", .path.display())]
    InvalidWorkspace { path: PathBuf, reason: String },
}

impl PolicyViolation {
    /// Short machine-readable tag, used in events and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            PolicyViolation::MissingParameter { .. } => "missing_parameter",
            PolicyViolation::EmptyPath => "empty_path",
            PolicyViolation::PathTraversal { .. } => "path_traversal",
            PolicyViolation::BlockedPath { .. } => "blocked_path",
            PolicyViolation::NotAllowed { .. } => "not_allowed",
            PolicyViolation::SizeLimitExceeded { .. } => "size_limit_exceeded",
            PolicyViolation::EmptyCommand => "empty_command",
            PolicyViolation::DangerousCommand { .. } => "dangerous_command",
            PolicyViolation::CommandNotAllowed { .. } => "command_not_allowed",
            PolicyViolation::InvalidWorkspace { .. } => "invalid_workspace",
        }
    }
}

/// How an action's parameters are validated.
enum ActionClass {
    /// `path` is required; `payload` names the parameter carrying new content, if any
    RequiredPath {
        size: Option<SizeLimit>,
        payload: Option<&'static str>,
    },
    /// `path` defaults to the workspace root
    ScopedPath,
    /// `path` is checked only when present
    OptionalPath,
    Command,
    Unchecked,
}

fn classify(tool: &str) -> ActionClass {
    match tool {
        "read_file" => ActionClass::RequiredPath {
            size: Some(SizeLimit::Read),
            payload: None,
        },
        "edit_file" => ActionClass::RequiredPath {
            size: Some(SizeLimit::Write),
            payload: Some("new_string"),
        },
        "create_file" => ActionClass::RequiredPath {
            size: Some(SizeLimit::Write),
            payload: Some("content"),
        },
        "delete_file" => ActionClass::RequiredPath {
            size: None,
            payload: None,
        },
        "list_files" | "search_code" => ActionClass::ScopedPath,
        "run_tests" => ActionClass::OptionalPath,
        "run_command" => ActionClass::Command,
        _ => ActionClass::Unchecked,
    }
}

/// Validates proposed actions against a fixed policy.
#[derive(Debug, Clone, Default)]
pub struct PolicyEngine {
    config: PolicyConfig,
}

impl PolicyEngine {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PolicyConfig {
        &self.config
    }

    /// Accept or reject one proposed action.
    pub fn validate_action(
        &self,
        tool: &str,
        params: &Value,
        workspace: &Path,
    ) -> Result<(), PolicyViolation> {
        let result = self.check_action(tool, params, workspace);
        if let Err(violation) = &result {
            tracing::warn!("Policy rejected {}: {}", tool, violation);
        }
        result
    }

    fn check_action(
        &self,
        tool: &str,
        params: &Value,
        workspace: &Path,
    ) -> Result<(), PolicyViolation> {
        match classify(tool) {
            ActionClass::RequiredPath { size, payload } => {
                let path = required_str(tool, params, "path")?;
                let target = self.validate_file_path(path, workspace)?;
                if let Some(limit) = size {
                    self.validate_file_size(&target, limit)?;
                    if let Some(content) = payload.and_then(|key| params[key].as_str()) {
                        self.check_size(content.len() as u64, limit)?;
                    }
                }
                Ok(())
            }
            ActionClass::ScopedPath => {
                let path = params["path"].as_str().unwrap_or(".");
                self.validate_file_path(path, workspace).map(|_| ())
            }
            ActionClass::OptionalPath => match params["path"].as_str() {
                Some(path) => self.validate_file_path(path, workspace).map(|_| ()),
                None => Ok(()),
            },
            ActionClass::Command => {
                let command = required_str(tool, params, "command")?;
                self.validate_command(command)
            }
            ActionClass::Unchecked => Ok(()),
        }
    }

    /// Resolve `path` against `workspace` and confine it.
    ///
    /// Returns the canonical target on success.
    pub fn validate_file_path(
        &self,
        path: &str,
        workspace: &Path,
    ) -> Result<PathBuf, PolicyViolation> {
        if path.trim().is_empty() {
            return Err(PolicyViolation::EmptyPath);
        }

        let root = canonical_workspace(workspace)?;
        let candidate = Path::new(path);
        let joined = if candidate.is_absolute() {
            candidate.to_path_buf()
        } else {
            root.join(candidate)
        };
        let target = resolve_lenient(&joined);

        let relative = target
            .strip_prefix(&root)
            .map_err(|_| PolicyViolation::PathTraversal {
                path: path.to_string(),
            })?;

        if let Some(pattern) = self.blocked_pattern(relative) {
            return Err(PolicyViolation::BlockedPath {
                path: path.to_string(),
                pattern: pattern.to_string(),
            });
        }

        if self.config.strict_mode && !relative.as_os_str().is_empty() {
            let inside_allowed = self
                .config
                .allowed_paths
                .iter()
                .any(|allowed| target.starts_with(resolve_lenient(&root.join(allowed))));
            if !inside_allowed {
                return Err(PolicyViolation::NotAllowed {
                    path: path.to_string(),
                    allowed: self.config.allowed_paths.join(", "),
                });
            }
        }

        Ok(target)
    }

    fn blocked_pattern(&self, relative: &Path) -> Option<&str> {
        let relative_str = relative.to_string_lossy();
        self.config
            .blocked_paths
            .iter()
            .find(|entry| match entry.strip_prefix('*') {
                Some(suffix) => relative_str.ends_with(suffix),
                None if entry.contains('/') => relative_str.starts_with(entry.as_str()),
                None => relative
                    .components()
                    .any(|c| c.as_os_str().to_string_lossy().starts_with(entry.as_str())),
            })
            .map(String::as_str)
    }

    /// Check a command line against the dangerous substrings, then the allow list.
    pub fn validate_command(&self, command: &str) -> Result<(), PolicyViolation> {
        if command.trim().is_empty() {
            return Err(PolicyViolation::EmptyCommand);
        }

        if let Some(pattern) = self
            .config
            .dangerous_patterns
            .iter()
            .find(|pattern| command.contains(pattern.as_str()))
        {
            return Err(PolicyViolation::DangerousCommand {
                pattern: pattern.clone(),
            });
        }

        let program = command.split_whitespace().next().unwrap_or_default();
        if !self.config.allowed_commands.iter().any(|c| c == program) {
            return Err(PolicyViolation::CommandNotAllowed {
                command: program.to_string(),
                allowed: self.config.allowed_commands.join(", "),
            });
        }

        Ok(())
    }

    /// Compare an existing file's size against a ceiling. Missing files always pass.
    pub fn validate_file_size(&self, path: &Path, limit: SizeLimit) -> Result<(), PolicyViolation> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.is_file() => self.check_size(meta.len(), limit),
            _ => Ok(()),
        }
    }

    fn check_size(&self, size: u64, limit: SizeLimit) -> Result<(), PolicyViolation> {
        let max = match limit {
            SizeLimit::Read => self.config.max_read_bytes,
            SizeLimit::Write => self.config.max_write_bytes,
        };
        if size > max {
            return Err(PolicyViolation::SizeLimitExceeded { size, max, limit });
        }
        Ok(())
    }

    pub fn is_safe_path(&self, path: &str, workspace: &Path) -> bool {
        self.validate_file_path(path, workspace).is_ok()
    }

    pub fn is_safe_command(&self, command: &str) -> bool {
        self.validate_command(command).is_ok()
    }
}

fn required_str<'a>(tool: &str, params: &'a Value, key: &str) -> Result<&'a str, PolicyViolation> {
    params[key]
        .as_str()
        .ok_or_else(|| PolicyViolation::MissingParameter {
            tool: tool.to_string(),
            param: key.to_string(),
        })
}

fn canonical_workspace(workspace: &Path) -> Result<PathBuf, PolicyViolation> {
    let root = workspace
        .canonicalize()
        .map_err(|e| PolicyViolation::InvalidWorkspace {
            path: workspace.to_path_buf(),
            reason: e.to_string(),
        })?;
    if !root.is_dir() {
        return Err(PolicyViolation::InvalidWorkspace {
            path: workspace.to_path_buf(),
            reason: "not a directory".to_string(),
        });
    }
    Ok(root)
}
