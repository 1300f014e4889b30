//! File tools: `read_file`, `write_file`, `edit_file`.
//!
//! Mutating tools pre-snapshot the target into file history and log a
//! `file.write` event with the content hash. Paths are resolved against the
//! workspace root when relative; event payloads carry workspace-relative
//! paths.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::history::FileHistory;
use crate::store::EventStore;

use super::traits::{Tool, ToolResult};

fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Workspace-relative form for event payloads.
fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| path.display().to_string())
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() > limit {
        let mut end = limit;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &text[..end])
    } else {
        text.to_string()
    }
}

// ─── ReadFileTool ────────────────────────────────────────────────────────────

pub struct ReadFileTool {
    root: PathBuf,
}

impl ReadFileTool {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Read file contents. Use head/tail for large files."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to read (workspace-relative or absolute)"
                },
                "head": {
                    "type": "integer",
                    "description": "Optional: return only the first N lines"
                },
                "tail": {
                    "type": "integer",
                    "description": "Optional: return only the last N lines"
                }
            },
            "required": ["path"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'path'")?;
        let head = args.get("head").and_then(Value::as_u64).map(|n| n as usize);
        let tail = args.get("tail").and_then(Value::as_u64).map(|n| n as usize);

        let file_path = resolve_path(&self.root, path);
        if !file_path.exists() {
            return Ok(ToolResult::err(format!("File not found: {path}")));
        }
        if !file_path.is_file() {
            return Ok(ToolResult::err(format!("Not a file: {path}")));
        }

        let content = match tokio::fs::read_to_string(&file_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::err(e.to_string())),
        };
        let all_lines: Vec<&str> = content.lines().collect();
        let total_lines = all_lines.len();
        let selected: Vec<&str> = match (head, tail) {
            (Some(n), _) => all_lines.iter().take(n).copied().collect(),
            (None, Some(n)) => {
                let skip = total_lines.saturating_sub(n);
                all_lines.iter().skip(skip).copied().collect()
            }
            (None, None) => all_lines,
        };

        Ok(ToolResult::ok(json!({
            "content": selected.join("\n"),
            "total_lines": total_lines,
            "returned_lines": selected.len(),
        })))
    }
}

// ─── WriteFileTool ───────────────────────────────────────────────────────────

pub struct WriteFileTool {
    root: PathBuf,
    store: Arc<EventStore>,
    history: Arc<FileHistory>,
}

impl WriteFileTool {
    pub fn new(root: PathBuf, store: Arc<EventStore>, history: Arc<FileHistory>) -> Self {
        Self {
            root,
            store,
            history,
        }
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Create or overwrite file with content."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to write (workspace-relative or absolute)"
                },
                "content": {
                    "type": "string",
                    "description": "Content to write to the file"
                }
            },
            "required": ["path", "content"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'path'")?;
        let content = args
            .get("content")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'content'")?;

        let file_path = resolve_path(&self.root, path);

        // Snapshot before mutation so undo can restore.
        if let Err(e) = self.history.save_state(&file_path.display().to_string()).await {
            return Ok(ToolResult::err(e.to_string()));
        }
        if let Some(parent) = file_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::err(e.to_string()));
            }
        }
        if let Err(e) = tokio::fs::write(&file_path, content).await {
            return Ok(ToolResult::err(e.to_string()));
        }

        if let Err(e) = self
            .store
            .log_file_write(&display_path(&self.root, &file_path), content.as_bytes())
        {
            return Ok(ToolResult::err(e.to_string()));
        }

        Ok(ToolResult::ok(json!({
            "success": true,
            "path": file_path.display().to_string(),
            "bytes_written": content.len(),
        })))
    }
}

// ─── EditFileTool ────────────────────────────────────────────────────────────

pub struct EditFileTool {
    root: PathBuf,
    store: Arc<EventStore>,
    history: Arc<FileHistory>,
}

impl EditFileTool {
    pub fn new(root: PathBuf, store: Arc<EventStore>, history: Arc<FileHistory>) -> Self {
        Self {
            root,
            store,
            history,
        }
    }
}

#[async_trait]
impl Tool for EditFileTool {
    fn name(&self) -> &str {
        "edit_file"
    }

    fn description(&self) -> &str {
        "Replace exact text matches in a file. Returns the applied changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path to the file to edit"
                },
                "edits": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old_text": {"type": "string"},
                            "new_text": {"type": "string"}
                        },
                        "required": ["old_text", "new_text"]
                    },
                    "description": "List of text replacements to make"
                },
                "dry_run": {
                    "type": "boolean",
                    "description": "If true, show what would change without making changes",
                    "default": false
                }
            },
            "required": ["path", "edits"]
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let path = args
            .get("path")
            .and_then(Value::as_str)
            .ok_or("missing required argument 'path'")?;
        let edits = args
            .get("edits")
            .and_then(Value::as_array)
            .ok_or("missing required argument 'edits'")?;
        let dry_run = args
            .get("dry_run")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let file_path = resolve_path(&self.root, path);
        if !file_path.exists() {
            return Ok(ToolResult::err(format!("File not found: {path}")));
        }
        let original = match tokio::fs::read_to_string(&file_path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::err(e.to_string())),
        };

        let mut content = original.clone();
        let mut changes = Vec::new();
        for edit in edits {
            let old_text = edit
                .get("old_text")
                .and_then(Value::as_str)
                .ok_or("edit entry missing 'old_text'")?;
            let new_text = edit
                .get("new_text")
                .and_then(Value::as_str)
                .ok_or("edit entry missing 'new_text'")?;

            if !content.contains(old_text) {
                changes.push(json!({
                    "old_text": truncate(old_text, 50),
                    "status": "not_found",
                }));
                continue;
            }
            // Replace every occurrence, document order.
            let occurrences = content.matches(old_text).count();
            content = content.replace(old_text, new_text);
            changes.push(json!({
                "old_text": truncate(old_text, 50),
                "new_text": truncate(new_text, 50),
                "occurrences": occurrences,
                "status": "replaced",
            }));
        }

        let modified = content != original;
        if dry_run {
            return Ok(ToolResult::ok(json!({
                "dry_run": true,
                "changes": changes,
                "would_modify": modified,
            })));
        }

        if modified {
            if let Err(e) = self.history.save_state(&file_path.display().to_string()).await {
                return Ok(ToolResult::err(e.to_string()));
            }
            if let Err(e) = tokio::fs::write(&file_path, &content).await {
                return Ok(ToolResult::err(e.to_string()));
            }
            if let Err(e) = self
                .store
                .log_file_write(&display_path(&self.root, &file_path), content.as_bytes())
            {
                return Ok(ToolResult::err(e.to_string()));
            }
        }

        Ok(ToolResult::ok(json!({
            "success": true,
            "path": file_path.display().to_string(),
            "changes": changes,
            "modified": modified,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixtures() -> (Arc<EventStore>, Arc<FileHistory>) {
        (
            Arc::new(EventStore::in_memory("local").unwrap()),
            Arc::new(FileHistory::new()),
        )
    }

    #[tokio::test]
    async fn read_file_head_and_tail() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "1\n2\n3\n4\n5\n").unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());

        let r = tool
            .execute(json!({"path": "a.txt", "head": 2}))
            .await
            .unwrap();
        assert_eq!(r.value["content"], "1\n2");
        assert_eq!(r.value["total_lines"], 5);
        assert_eq!(r.value["returned_lines"], 2);

        let r = tool
            .execute(json!({"path": "a.txt", "tail": 2}))
            .await
            .unwrap();
        assert_eq!(r.value["content"], "4\n5");
    }

    #[tokio::test]
    async fn read_missing_file_is_structured_error() {
        let dir = TempDir::new().unwrap();
        let tool = ReadFileTool::new(dir.path().to_path_buf());
        let r = tool.execute(json!({"path": "nope.txt"})).await.unwrap();
        assert!(!r.success);
        assert!(r.value["error"].as_str().unwrap().contains("File not found"));
    }

    #[tokio::test]
    async fn write_file_creates_parents_and_logs_event() {
        let dir = TempDir::new().unwrap();
        let (store, history) = fixtures();
        let tool = WriteFileTool::new(dir.path().to_path_buf(), store.clone(), history);

        let r = tool
            .execute(json!({"path": "deep/nested/f.txt", "content": "hello"}))
            .await
            .unwrap();
        assert!(r.success);
        assert_eq!(r.value["bytes_written"], 5);
        assert!(dir.path().join("deep/nested/f.txt").is_file());

        let events = store.events(0, Some("file.write"), 10).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].payload["path"], "deep/nested/f.txt");
        assert_eq!(events[0].payload["size_bytes"], 5);
    }

    #[tokio::test]
    async fn edit_file_replaces_all_occurrences() {
        let dir = TempDir::new().unwrap();
        let (store, history) = fixtures();
        std::fs::write(dir.path().join("a.txt"), "foo bar foo").unwrap();
        let tool = EditFileTool::new(dir.path().to_path_buf(), store.clone(), history);

        let r = tool
            .execute(json!({
                "path": "a.txt",
                "edits": [{"old_text": "foo", "new_text": "baz"}]
            }))
            .await
            .unwrap();
        assert!(r.success);
        assert_eq!(r.value["modified"], true);
        assert_eq!(r.value["changes"][0]["occurrences"], 2);
        assert_eq!(r.value["changes"][0]["status"], "replaced");
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "baz bar baz"
        );
        assert_eq!(store.events(0, Some("file.write"), 10).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn edit_file_dry_run_changes_nothing() {
        let dir = TempDir::new().unwrap();
        let (store, history) = fixtures();
        std::fs::write(dir.path().join("a.txt"), "foo").unwrap();
        let tool = EditFileTool::new(dir.path().to_path_buf(), store.clone(), history);

        let r = tool
            .execute(json!({
                "path": "a.txt",
                "edits": [{"old_text": "foo", "new_text": "bar"}],
                "dry_run": true
            }))
            .await
            .unwrap();
        assert_eq!(r.value["dry_run"], true);
        assert_eq!(r.value["would_modify"], true);
        // No bytes changed, no file.write event.
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.txt")).unwrap(),
            "foo"
        );
        assert!(store.events(0, Some("file.write"), 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn edit_file_not_found_text_reported() {
        let dir = TempDir::new().unwrap();
        let (store, history) = fixtures();
        std::fs::write(dir.path().join("a.txt"), "foo").unwrap();
        let tool = EditFileTool::new(dir.path().to_path_buf(), store.clone(), history);

        let r = tool
            .execute(json!({
                "path": "a.txt",
                "edits": [{"old_text": "missing", "new_text": "x"}]
            }))
            .await
            .unwrap();
        assert_eq!(r.value["changes"][0]["status"], "not_found");
        assert_eq!(r.value["modified"], false);
        // Unchanged content emits no event.
        assert!(store.events(0, Some("file.write"), 10).unwrap().is_empty());
    }
}
