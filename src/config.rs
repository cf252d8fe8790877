//! Configuration management for the workspace agent.
//!
//! Configuration can be set via environment variables:
//! - `OLLAMA_HOST` - Optional. Model gateway base URL. Defaults to `http://localhost:11434`.
//! - `AGENT_MODEL` - Optional. Model name. Defaults to `qwen2.5-coder:7b`.
//! - `AGENT_TEMPERATURE` - Optional. Sampling temperature. Defaults to `0.1`.
//! - `WORKSPACE_PATH` - Optional. The workspace directory. Defaults to current directory.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `20`.
//! - `MAX_CONSECUTIVE_FAILURES` - Optional. Failure streak that aborts a task. Defaults to `3`.
//! - `MAX_HISTORY` - Optional. Conversation window size. Defaults to `20`.
//! - `MODEL_TIMEOUT_SECS` - Optional. Per-call model timeout. Defaults to `120`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per-call tool timeout. Defaults to `90`.
//! - `EVENT_BUFFER` - Optional. Bound of the per-execution event channel. Defaults to `256`.
//! - `SECURITY_STRICT_MODE` - Optional. Require paths under the allow list. Defaults to `true`.
//! - `SECURITY_POLICY_FILE` - Optional. YAML/JSON file overriding the policy lists.
//! - `SYSTEM_PROMPT_PATH` - Optional. File replacing the default system prompt.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

use crate::security::PolicyConfig;
use crate::util::env_var_bool;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read {path}: {message}")]
    Unreadable { path: PathBuf, message: String },
}

/// Model gateway configuration.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Base URL of the Ollama server
    pub host: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Optional file whose contents replace the default system prompt
    pub system_prompt_path: Option<PathBuf>,

    /// Timeout for a single model call
    pub timeout: Duration,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            host: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:7b".to_string(),
            temperature: 0.1,
            system_prompt_path: None,
            timeout: Duration::from_secs(120),
        }
    }
}

/// Limits applied to one task execution.
#[derive(Debug, Clone)]
pub struct LoopLimits {
    /// Hard cap on iterations per execution
    pub max_iterations: usize,

    /// Consecutive non-security failures that abort the task
    pub max_consecutive_failures: usize,

    /// Maximum number of messages kept in the conversation window
    pub max_history: usize,

    /// Timeout for a single tool dispatch (terminal action excluded)
    pub tool_timeout: Duration,

    /// Bound of the event channel handed to the caller
    pub event_buffer: usize,
}

impl Default for LoopLimits {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            max_consecutive_failures: 3,
            max_history: 20,
            tool_timeout: Duration::from_secs(90),
            event_buffer: 256,
        }
    }
}

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Model gateway settings
    pub model: ModelConfig,

    /// Default workspace for tasks started from the CLI
    pub workspace_path: PathBuf,

    /// Iteration, failure and timeout limits
    pub limits: LoopLimits,

    /// Allow/deny lists for the policy engine
    pub policy: PolicyConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if a numeric variable does not parse or
    /// `OLLAMA_HOST` is not a URL, and `ConfigError::Unreadable` if the policy file
    /// cannot be loaded.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = ModelConfig::default();

        let host = std::env::var("OLLAMA_HOST").unwrap_or(defaults.host);
        url::Url::parse(&host)
            .map_err(|e| ConfigError::InvalidValue("OLLAMA_HOST".to_string(), e.to_string()))?;

        let model = ModelConfig {
            host,
            model: std::env::var("AGENT_MODEL").unwrap_or(defaults.model),
            temperature: parse_env("AGENT_TEMPERATURE", defaults.temperature)?,
            system_prompt_path: std::env::var("SYSTEM_PROMPT_PATH").ok().map(PathBuf::from),
            timeout: Duration::from_secs(parse_env(
                "MODEL_TIMEOUT_SECS",
                defaults.timeout.as_secs(),
            )?),
        };

        let workspace_path = std::env::var("WORKSPACE_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        let default_limits = LoopLimits::default();
        let limits = LoopLimits {
            max_iterations: parse_env("MAX_ITERATIONS", default_limits.max_iterations)?,
            max_consecutive_failures: parse_env(
                "MAX_CONSECUTIVE_FAILURES",
                default_limits.max_consecutive_failures,
            )?,
            max_history: parse_env("MAX_HISTORY", default_limits.max_history)?,
            tool_timeout: Duration::from_secs(parse_env(
                "TOOL_TIMEOUT_SECS",
                default_limits.tool_timeout.as_secs(),
            )?),
            event_buffer: parse_env("EVENT_BUFFER", default_limits.event_buffer)?,
        };

        if limits.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if limits.max_consecutive_failures == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_CONSECUTIVE_FAILURES".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let mut policy = match std::env::var("SECURITY_POLICY_FILE") {
            Ok(path) => PolicyConfig::from_file(Path::new(&path))?,
            Err(_) => PolicyConfig::default(),
        };
        policy.strict_mode = env_var_bool("SECURITY_STRICT_MODE", policy.strict_mode);

        Ok(Self {
            model,
            workspace_path,
            limits,
            policy,
        })
    }

    /// Create a config with default values (useful for testing).
    pub fn new(workspace_path: PathBuf) -> Self {
        Self {
            model: ModelConfig::default(),
            workspace_path,
            limits: LoopLimits::default(),
            policy: PolicyConfig::default(),
        }
    }
}

fn parse_env<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|e: T::Err| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}
