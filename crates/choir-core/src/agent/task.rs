//! Task contract for delegated runs.
//!
//! A task pins down what the agent may do (allowed tools, egress profile)
//! and what it must return. The loop extends the tool catalog with a
//! distinguished `submit_result` channel whose arguments validate into
//! [`TaskResult`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    EditRepo,
    Run,
    Git,
    Inspect,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EgressProfile {
    pub mode: String,
    pub allowlist: Vec<String>,
}

impl Default for EgressProfile {
    fn default() -> Self {
        Self {
            mode: "git+pkg".to_string(),
            allowlist: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerifyProfile {
    pub mode: String,
    pub commands: Vec<String>,
}

impl Default for VerifyProfile {
    fn default() -> Self {
        Self {
            mode: "smoke".to_string(),
            commands: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_id: String,
    pub kind: TaskKind,
    pub instruction: String,
    #[serde(default)]
    pub acceptance_criteria: Vec<String>,
    pub base_ref: Option<String>,
    /// When set, tool calls outside this list are rejected
    /// (`submit_result` is always allowed).
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default)]
    pub egress_profile: EgressProfile,
    #[serde(default)]
    pub verify_profile: VerifyProfile,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default = "default_time_budget")]
    pub time_budget_s: u64,
}

fn default_time_budget() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Ok,
    NeedsInput,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandRun {
    pub command: String,
    pub exit_code: i32,
    pub stdout_path: Option<String>,
    pub stderr_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskVerification {
    pub mode: String,
    pub status: String,
    #[serde(default)]
    pub commands: Vec<String>,
    pub logs_path: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: String,
    pub status: TaskStatus,
    pub summary: String,
    #[serde(default)]
    pub files_changed: Vec<String>,
    #[serde(default)]
    pub commands_run: Vec<CommandRun>,
    pub verify: Option<TaskVerification>,
    #[serde(default)]
    pub questions: Vec<String>,
    pub suggested_next: Option<String>,
}

impl TaskResult {
    pub fn failed(task_id: &str, summary: &str) -> Self {
        Self {
            task_id: task_id.to_string(),
            status: TaskStatus::Failed,
            summary: summary.to_string(),
            files_changed: Vec::new(),
            commands_run: Vec::new(),
            verify: None,
            questions: Vec::new(),
            suggested_next: None,
        }
    }
}

/// Schema for the `submit_result` tool exposed to the model in task mode.
pub fn submit_result_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "task_id": {"type": "string"},
            "status": {"type": "string", "enum": ["ok", "needs_input", "failed"]},
            "summary": {"type": "string"},
            "files_changed": {"type": "array", "items": {"type": "string"}},
            "commands_run": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "command": {"type": "string"},
                        "exit_code": {"type": "integer"},
                        "stdout_path": {"type": "string"},
                        "stderr_path": {"type": "string"}
                    },
                    "required": ["command", "exit_code"]
                }
            },
            "verify": {
                "type": "object",
                "properties": {
                    "mode": {"type": "string"},
                    "status": {"type": "string", "enum": ["pass", "fail", "unknown"]},
                    "commands": {"type": "array", "items": {"type": "string"}},
                    "logs_path": {"type": "string"}
                },
                "required": ["mode", "status"]
            },
            "questions": {"type": "array", "items": {"type": "string"}},
            "suggested_next": {"type": "string"}
        },
        "required": ["task_id", "status", "summary"]
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_spec_deserializes_with_defaults() {
        let spec: TaskSpec = serde_json::from_value(json!({
            "task_id": "t-1",
            "kind": "edit_repo",
            "instruction": "rename the helper",
            "allowed_tools": ["read_file", "edit_file"]
        }))
        .unwrap();
        assert_eq!(spec.kind, TaskKind::EditRepo);
        assert_eq!(spec.time_budget_s, 300);
        assert_eq!(spec.egress_profile.mode, "git+pkg");
        assert_eq!(spec.verify_profile.mode, "smoke");
    }

    #[test]
    fn task_result_round_trips() {
        let result: TaskResult = serde_json::from_value(json!({
            "task_id": "t-1",
            "status": "ok",
            "summary": "done",
            "files_changed": ["src/a.rs"]
        }))
        .unwrap();
        assert_eq!(result.status, TaskStatus::Ok);
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["status"], "ok");
    }

    #[test]
    fn invalid_status_rejected() {
        let result: Result<TaskResult, _> = serde_json::from_value(json!({
            "task_id": "t-1",
            "status": "sideways",
            "summary": "?"
        }));
        assert!(result.is_err());
    }
}
