use async_trait::async_trait;
use serde_json::Value;

use crate::ai::types::ToolDefinition;

/// The result of executing a [`Tool`]: a structured value handed back to the
/// model, plus a success flag.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub value: Value,
    pub success: bool,
}

impl ToolResult {
    pub fn ok(value: Value) -> Self {
        Self {
            value,
            success: true,
        }
    }

    /// Errors are structured `{"error": …}` values so the model can recover.
    pub fn err(message: impl Into<String>) -> Self {
        Self {
            value: serde_json::json!({"error": message.into()}),
            success: false,
        }
    }
}

/// A capability the agent loop can invoke.
///
/// Implementations must be `Send + Sync` so they can be held in a shared
/// `Arc<dyn Tool>` registry.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable machine identifier (snake_case), e.g. `"read_file"`.
    fn name(&self) -> &str;

    /// Human-readable description used in model tool definitions.
    fn description(&self) -> &str;

    /// JSON Schema object describing the tool's accepted parameters.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Recoverable problems come back as
    /// [`ToolResult::err`]; an `Err` is reserved for malformed arguments and
    /// is also fed back to the model as an error result.
    async fn execute(&self, args: Value) -> Result<ToolResult, String>;

    /// The definition advertised to the model.
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}
