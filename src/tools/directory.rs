//! Directory listing tool.

use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use walkdir::WalkDir;

use super::{glob_match, resolve_path, Tool, ToolError};

/// List the entries of a directory, optionally recursive and filtered by name.
pub struct ListFiles;

fn entry_info(path: &Path, base: &Path) -> Value {
    let relative = path.strip_prefix(base).unwrap_or(path);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();

    if path.is_dir() {
        json!({
            "name": name,
            "path": relative.display().to_string(),
            "type": "directory",
        })
    } else {
        json!({
            "name": name,
            "path": relative.display().to_string(),
            "type": "file",
            "size": path.metadata().map(|m| m.len()).unwrap_or(0),
        })
    }
}

#[async_trait]
impl Tool for ListFiles {
    fn name(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        "List files and directories. Use '.' for the workspace root or a relative path like 'src'. Optionally filter names with a glob pattern and recurse."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory path relative to the workspace (default: '.')"
                },
                "pattern": {
                    "type": "string",
                    "description": "Optional glob on entry names (e.g., '*.py')"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories (default: false)"
                }
            }
        })
    }

    async fn execute(&self, args: Value, workspace: &Path) -> Result<Value, ToolError> {
        let path = args["path"].as_str().unwrap_or(".");
        let pattern = args["pattern"].as_str();
        let recursive = args["recursive"].as_bool().unwrap_or(false);

        let dir = resolve_path(path, workspace);
        let meta = std::fs::metadata(&dir).map_err(|e| ToolError::from_io(path, e))?;
        if !meta.is_dir() {
            return Err(ToolError::InvalidParameters(format!(
                "Not a directory: {}",
                path
            )));
        }

        let walker = WalkDir::new(&dir)
            .min_depth(1)
            .max_depth(if recursive { usize::MAX } else { 1 });

        let mut entries: Vec<Value> = walker
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                pattern
                    .map(|p| glob_match(p, &e.file_name().to_string_lossy()))
                    .unwrap_or(true)
            })
            .map(|e| entry_info(e.path(), &dir))
            .collect();

        // Directories first, then by name
        entries.sort_by(|a, b| {
            let a_key = (a["type"] != "directory", a["name"].as_str().unwrap_or(""));
            let b_key = (b["type"] != "directory", b["name"].as_str().unwrap_or(""));
            a_key.cmp(&b_key)
        });

        tracing::info!("Listed {} entries in {}", entries.len(), dir.display());
        Ok(Value::Array(entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/pkg")).unwrap();
        std::fs::write(dir.path().join("src/main.py"), "main\n").unwrap();
        std::fs::write(dir.path().join("src/pkg/util.py"), "util\n").unwrap();
        std::fs::write(dir.path().join("src/notes.txt"), "notes\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn test_lists_directories_first() {
        let ws = workspace();
        let out = ListFiles
            .execute(json!({"path": "src"}), ws.path())
            .await
            .unwrap();
        let names: Vec<&str> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["pkg", "main.py", "notes.txt"]);
        assert_eq!(out[1]["size"], 5);
        assert!(out[0].get("size").is_none());
    }

    #[tokio::test]
    async fn test_recursive_with_pattern() {
        let ws = workspace();
        let out = ListFiles
            .execute(json!({"path": ".", "pattern": "*.py", "recursive": true}), ws.path())
            .await
            .unwrap();
        let mut paths: Vec<String> = out
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["path"].as_str().unwrap().to_string())
            .collect();
        paths.sort();
        assert_eq!(paths, vec!["src/main.py", "src/pkg/util.py"]);
    }

    #[tokio::test]
    async fn test_missing_directory() {
        let ws = workspace();
        let err = ListFiles
            .execute(json!({"path": "nope"}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let err = ListFiles
            .execute(json!({"path": "src/main.py"}), ws.path())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid_parameters");
    }
}
