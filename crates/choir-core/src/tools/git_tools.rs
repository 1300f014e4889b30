//! Git tools: `git_checkpoint` and `git_status`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::git::GitOps;
use crate::store::EventStore;

use super::traits::{Tool, ToolResult};

pub struct GitCheckpointTool {
    git: Arc<GitOps>,
    store: Arc<EventStore>,
}

impl GitCheckpointTool {
    pub fn new(git: Arc<GitOps>, store: Arc<EventStore>) -> Self {
        Self { git, store }
    }
}

#[async_trait]
impl Tool for GitCheckpointTool {
    fn name(&self) -> &str {
        "git_checkpoint"
    }

    fn description(&self) -> &str {
        "Create a git commit as a save point. Use before making risky changes."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "message": {
                    "type": "string",
                    "description": "Commit message describing the checkpoint"
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let message = args
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned);
        match self.git.checkpoint(message, &self.store).await {
            Ok(outcome) => {
                let success = outcome.success;
                let value = serde_json::to_value(outcome).map_err(|e| e.to_string())?;
                Ok(ToolResult { value, success })
            }
            Err(e) => Ok(ToolResult::err(e.to_string())),
        }
    }
}

pub struct GitStatusTool {
    git: Arc<GitOps>,
}

impl GitStatusTool {
    pub fn new(git: Arc<GitOps>) -> Self {
        Self { git }
    }
}

#[async_trait]
impl Tool for GitStatusTool {
    fn name(&self) -> &str {
        "git_status"
    }

    fn description(&self) -> &str {
        "Get git status and recent commit history."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "log_count": {
                    "type": "integer",
                    "description": "Number of recent commits to show (default 5)",
                    "default": 5
                }
            },
            "required": []
        })
    }

    async fn execute(&self, args: Value) -> Result<ToolResult, String> {
        let log_count = args
            .get("log_count")
            .and_then(Value::as_u64)
            .unwrap_or(5) as usize;

        let status = match self.git.status().await {
            Ok(s) => s,
            Err(e) => return Ok(ToolResult::err(e.to_string())),
        };
        let commits = self.git.log(log_count).await.unwrap_or_default();
        let head = self.git.head_sha().await.ok().flatten();

        Ok(ToolResult::ok(json!({
            "head": head.as_deref().map(|h| &h[..h.len().min(8)]),
            "status": status,
            "recent_commits": commits
                .iter()
                .map(|c| json!({
                    "sha": &c.sha[..c.sha.len().min(8)],
                    "message": c.message,
                }))
                .collect::<Vec<_>>(),
        })))
    }
}
