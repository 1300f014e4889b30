pub mod provider;
pub mod types;

pub use provider::{LlmProvider, ProviderError};
pub use types::{
    ChatMessage, ChatRequest, ChatResponse, ContentBlock, MessageRole, StopReason, ToolDefinition,
};
