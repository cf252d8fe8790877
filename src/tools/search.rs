//! Code search tool: literal or regex search over file contents.

use std::path::Path;

use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{glob_match, required_str, resolve_path, Tool, ToolError};

const MAX_RESULTS: usize = 100;

/// Search file contents line by line.
pub struct SearchCode;

#[async_trait]
impl Tool for SearchCode {
    fn name(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        "Search file contents for a string or regex. Returns file, line number, line content and the matched text (max 100 results)."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "Text (or regex when regex=true) to search for"
                },
                "path": {
                    "type": "string",
                    "description": "File or directory to search (default: '.')"
                },
                "regex": {
                    "type": "boolean",
                    "description": "Treat pattern as a regular expression (default: false)"
                },
                "file_pattern": {
                    "type": "string",
                    "description": "Only search files whose name matches this glob (default: '*')"
                },
                "ignore_case": {
                    "type": "boolean",
                    "description": "Case-insensitive search (default: false)"
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let pattern = required_str(&args, "pattern")?;
        let path = args["path"].as_str().unwrap_or(".");
        let use_regex = args["regex"].as_bool().unwrap_or(false);
        let file_pattern = args["file_pattern"].as_str().unwrap_or("*");
        let ignore_case = args["ignore_case"].as_bool().unwrap_or(false);

        let source = if use_regex {
            pattern.to_string()
        } else {
            regex::escape(pattern)
        };
        let matcher = RegexBuilder::new(&source)
            .case_insensitive(ignore_case)
            .build()
            .map_err(|e| ToolError::InvalidParameters(format!("Invalid regex pattern: {}", e)))?;

        let search_path = resolve_path(path, workspace);
        let meta = std::fs::metadata(&search_path).map_err(|e| ToolError::from_io(path, e))?;

        let files: Vec<std::path::PathBuf> = if meta.is_file() {
            vec![search_path.clone()]
        } else {
            WalkDir::new(&search_path)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
                .filter(|e| glob_match(file_pattern, &e.file_name().to_string_lossy()))
                .map(|e| e.into_path())
                .collect()
        };

        let mut results = Vec::new();
        'files: for file in &files {
            // Unreadable files are skipped
            let Ok(bytes) = tokio::fs::read(file).await else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            let display = file.strip_prefix(workspace).unwrap_or(file);

            for (index, line) in text.lines().enumerate() {
                if let Some(found) = matcher.find(line) {
                    results.push(json!({
                        "file": display.display().to_string(),
                        "line": index + 1,
                        "content": line,
                        "match": found.as_str(),
                    }));
                    if results.len() >= MAX_RESULTS {
                        tracing::warn!("Search results limited to {}", MAX_RESULTS);
                        break 'files;
                    }
                }
            }
        }

        tracing::info!("Found {} matches for '{}'", results.len(), pattern);
        Ok(Value::Array(results))
    }
}
