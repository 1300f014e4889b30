//! The tool-using agent: framed event stream, task contract and the Ralph
//! loop itself.

pub mod ralph;
pub mod task;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Framed events streamed to clients while the agent works.
///
/// Serialized as `{"type": …, "content": …}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum AgentEvent {
    Thinking(String),
    Text(String),
    /// `{"tool": name, "input": args}`
    ToolUse(Value),
    /// `{"tool": name, "result": value}`
    ToolResult(Value),
    Error(String),
    Done(Option<Value>),
    /// `{"run": …, "verifier_plan": …, "results": [{"id", "status"}]}`
    Verification(Value),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frames_serialize_with_type_and_content() {
        let frame = AgentEvent::Text("hello".to_string());
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value, json!({"type": "text", "content": "hello"}));

        let frame = AgentEvent::Done(None);
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "done");
        assert!(value["content"].is_null());

        let frame = AgentEvent::ToolUse(json!({"tool": "bash", "input": {"command": "ls"}}));
        let value = serde_json::to_value(&frame).unwrap();
        assert_eq!(value["type"], "tool_use");
        assert_eq!(value["content"]["tool"], "bash");
    }
}
