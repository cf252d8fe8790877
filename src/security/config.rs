//! Allow/deny configuration for the policy engine.
//!
//! A `PolicyConfig` is built once (defaults, or a YAML/JSON override file) and handed to
//! `PolicyEngine::new`. It is never mutated afterwards, so engines with different
//! policies can coexist.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Default read ceiling (1 MiB).
pub const DEFAULT_MAX_READ_BYTES: u64 = 1024 * 1024;

/// Default write ceiling (500 KiB).
pub const DEFAULT_MAX_WRITE_BYTES: u64 = 500 * 1024;

const ALLOWED_PATHS: &[&str] = &["src", "tests", "prompts", "scripts"];

const BLOCKED_PATHS: &[&str] = &[
    ".env",
    ".env.local",
    ".env.production",
    ".git",
    ".gitignore",
    "node_modules",
    "__pycache__",
    ".venv",
    "venv",
    ".pytest_cache",
    ".mypy_cache",
    "*.pyc",
    "*.pyo",
    "*.key",
    "*.pem",
    "*.secret",
    "credentials",
    "secrets",
];

const ALLOWED_COMMANDS: &[&str] = &[
    "pytest", "python", "python3", "pip", "pip3", "black", "ruff", "mypy", "pylint", "flake8",
    "isort",
];

/// Substrings rejected anywhere in a command line.
const DANGEROUS_PATTERNS: &[&str] = &[
    "rm -rf", "sudo", "chmod", "chown", "mv /", "dd if=", ">", ">>", "|", "&&", "||", ";", "`",
    "$(", "\n", "curl", "wget", "nc ", "netcat",
];

/// Policy lists and limits.
///
/// Missing keys in an override file fall back to the built-in defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// When true, paths must live under `allowed_paths` (or be the workspace root)
    pub strict_mode: bool,

    /// Top-level directories (relative to the workspace) agents may touch
    pub allowed_paths: Vec<String>,

    /// Literal name prefixes, or `*suffix` globs, that are never accessible
    pub blocked_paths: Vec<String>,

    /// Programs `run_command` may start (first whitespace token)
    pub allowed_commands: Vec<String>,

    /// Substrings that reject a command outright
    pub dangerous_patterns: Vec<String>,

    /// Largest existing file `read_file` may open
    pub max_read_bytes: u64,

    /// Largest file (existing or incoming payload) a write may touch
    pub max_write_bytes: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        fn owned(items: &[&str]) -> Vec<String> {
            items.iter().map(|s| s.to_string()).collect()
        }

        Self {
            strict_mode: true,
            allowed_paths: owned(ALLOWED_PATHS),
            blocked_paths: owned(BLOCKED_PATHS),
            allowed_commands: owned(ALLOWED_COMMANDS),
            dangerous_patterns: owned(DANGEROUS_PATTERNS),
            max_read_bytes: DEFAULT_MAX_READ_BYTES,
            max_write_bytes: DEFAULT_MAX_WRITE_BYTES,
        }
    }
}

impl PolicyConfig {
    /// A permissive variant of the defaults: same deny lists, no allow-list requirement.
    pub fn permissive() -> Self {
        Self {
            strict_mode: false,
            ..Self::default()
        }
    }

    /// Parse a policy from YAML (JSON is accepted as a YAML subset).
    pub fn from_yaml(raw: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(raw)
    }

    /// Load a policy override file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: PathBuf::from(path),
            message: e.to_string(),
        })?;
        Self::from_yaml(&raw).map_err(|e| {
            ConfigError::InvalidValue("SECURITY_POLICY_FILE".to_string(), e.to_string())
        })
    }
}
