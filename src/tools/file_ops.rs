//! File operation tools: read, edit, create, delete files.
//!
//! Edits and deletions keep a copy next to the original (`.backup` / `.deleted`) so
//! an agent mistake can be undone by hand.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::{required_str, resolve_path, Tool, ToolError};
use crate::util::preview;

/// Append a suffix to the full file name (`a.py` -> `a.py.backup`).
fn with_appended_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(suffix);
    PathBuf::from(name)
}

async fn ensure_file(resolved: &Path, path: &str) -> Result<(), ToolError> {
    let meta = tokio::fs::metadata(resolved)
        .await
        .map_err(|e| ToolError::from_io(path, e))?;
    if !meta.is_file() {
        return Err(ToolError::InvalidParameters(format!("Not a file: {}", path)));
    }
    Ok(())
}

async fn read_text(resolved: &Path, path: &str) -> Result<String, ToolError> {
    let bytes = tokio::fs::read(resolved)
        .await
        .map_err(|e| ToolError::from_io(path, e))?;
    String::from_utf8(bytes).map_err(|_| {
        ToolError::ExecutionFailed(format!(
            "Cannot read binary file: {} is not valid UTF-8 text",
            path
        ))
    })
}

/// Read the contents of a file.
pub struct ReadFile;

#[async_trait]
impl Tool for ReadFile {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read a text file's contents. Use paths relative to the workspace like 'src/main.py'."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace (e.g., 'src/app.py')"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let resolved = resolve_path(path, workspace);

        ensure_file(&resolved, path).await?;
        let content = read_text(&resolved, path).await?;

        tracing::info!("Read {} ({} chars)", resolved.display(), content.len());
        Ok(Value::String(content))
    }
}

/// Replace one exact occurrence of a string in a file.
pub struct EditFile;

#[async_trait]
impl Tool for EditFile {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing one exact occurrence of old_string with new_string. old_string must appear exactly once; include surrounding lines to make it unique."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "old_string": {
                    "type": "string",
                    "description": "Exact text to replace, including whitespace and indentation"
                },
                "new_string": {
                    "type": "string",
                    "description": "Replacement text"
                }
            },
            "required": ["path", "old_string", "new_string"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let old_string = required_str(&args, "old_string")?;
        let new_string = required_str(&args, "new_string")?;
        let resolved = resolve_path(path, workspace);

        ensure_file(&resolved, path).await?;

        if old_string == new_string {
            return Err(ToolError::InvalidParameters(
                "old_string and new_string are identical. No changes needed.".to_string(),
            ));
        }
        if old_string.is_empty() {
            return Err(ToolError::InvalidParameters(
                "old_string cannot be empty".to_string(),
            ));
        }

        let content = read_text(&resolved, path).await?;

        match content.matches(old_string).count() {
            0 => {
                return Err(ToolError::InvalidParameters(format!(
                    "String not found in file. Make sure old_string matches exactly (including whitespace, indentation, and line breaks).\n\nFile: {}\nOld string:\n{}",
                    path,
                    preview(old_string, 200)
                )))
            }
            1 => {}
            count => {
                return Err(ToolError::InvalidParameters(format!(
                    "String appears {} times in file. Add more context to make it unique.\n\nFile: {}\nOld string:\n{}",
                    count,
                    path,
                    preview(old_string, 200)
                )))
            }
        }

        let backup = with_appended_suffix(&resolved, ".backup");
        tokio::fs::write(&backup, &content)
            .await
            .map_err(|e| ToolError::from_io(path, e))?;

        let new_content = content.replacen(old_string, new_string, 1);
        tokio::fs::write(&resolved, &new_content)
            .await
            .map_err(|e| ToolError::from_io(path, e))?;

        tracing::info!(
            "Edited {} (backup: {})",
            resolved.display(),
            backup.display()
        );

        Ok(json!({
            "success": true,
            "changes": 1,
            "backup": backup.display().to_string(),
            "old_size": content.len(),
            "new_size": new_content.len(),
        }))
    }
}

/// Create a new file; never overwrites.
pub struct CreateFile;

#[async_trait]
impl Tool for CreateFile {
    fn name(&self) -> &str {
        "create_file"
    }

    fn description(&self) -> &str {
        "Create a new file with the given content. Fails if the file already exists (use edit_file instead). Creates parent directories as needed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace (e.g., 'src/utils/helpers.py')"
                },
                "content": {
                    "type": "string",
                    "description": "The content of the new file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        let content = required_str(&args, "content")?;
        let resolved = resolve_path(path, workspace);

        if tokio::fs::symlink_metadata(&resolved).await.is_ok() {
            return Err(ToolError::AlreadyExists(format!(
                "{}. Use edit_file to modify it.",
                path
            )));
        }

        if let Some(parent) = resolved.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ToolError::from_io(path, e))?;
        }

        tokio::fs::write(&resolved, content)
            .await
            .map_err(|e| ToolError::from_io(path, e))?;

        let size = tokio::fs::metadata(&resolved)
            .await
            .map(|m| m.len())
            .unwrap_or(content.len() as u64);

        tracing::info!("Created {} ({} bytes)", resolved.display(), size);

        Ok(json!({
            "success": true,
            "path": resolved.display().to_string(),
            "size": size,
        }))
    }
}

/// Delete a file by moving it aside.
pub struct DeleteFile;

#[async_trait]
impl Tool for DeleteFile {
    fn name(&self) -> &str {
        "delete_file"
    }

    fn description(&self) -> &str {
        "Delete a file. Requires confirm=true. The file is moved to '<name>.deleted' rather than destroyed."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "File path relative to the workspace"
                },
                "confirm": {
                    "type": "boolean",
                    "description": "Must be true to delete"
                }
            },
            "required": ["path", "confirm"]
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let path = required_str(&args, "path")?;
        if !args["confirm"].as_bool().unwrap_or(false) {
            return Err(ToolError::InvalidParameters(
                "Must set confirm=true to delete file.".to_string(),
            ));
        }

        let resolved = resolve_path(path, workspace);
        ensure_file(&resolved, path).await?;

        let mut backup = with_appended_suffix(&resolved, ".deleted");
        if tokio::fs::symlink_metadata(&backup).await.is_ok() {
            let stamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
            backup = with_appended_suffix(&resolved, &format!(".deleted.{}", stamp));
        }

        tokio::fs::rename(&resolved, &backup)
            .await
            .map_err(|e| ToolError::from_io(path, e))?;

        tracing::warn!(
            "Deleted {} (backup: {})",
            resolved.display(),
            backup.display()
        );

        Ok(json!({
            "success": true,
            "deleted": resolved.display().to_string(),
            "backup": backup.display().to_string(),
        }))
    }
}
