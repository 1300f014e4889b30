//! LLM provider seam.
//!
//! Providers (Anthropic, Bedrock, OpenAI, …) live outside this crate; the
//! core talks to whatever implements [`LlmProvider`]. The scripted
//! [`mock::MockProvider`] is the in-tree implementation used by tests.

use async_trait::async_trait;

use super::types::{ChatRequest, ChatResponse};

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("provider returned malformed response: {0}")]
    Malformed(String),
}

/// A chat-completion provider with native tool use.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Run one model turn.
    async fn chat(&self, request: ChatRequest) -> Result<ChatResponse>;

    /// Provider name for logs and health reporting.
    fn provider_name(&self) -> &str;
}

/// Placeholder used when no provider adapter has been wired in; every call
/// fails with a clear message. Real adapters implement [`LlmProvider`]
/// outside this crate and are injected at startup.
pub struct UnconfiguredProvider;

#[async_trait]
impl LlmProvider for UnconfiguredProvider {
    async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
        Err(ProviderError::Request(
            "no LLM provider configured".to_string(),
        ))
    }

    fn provider_name(&self) -> &str {
        "unconfigured"
    }
}

pub mod mock {
    //! Scripted provider for tests: returns canned responses in order.

    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::ai::types::{ContentBlock, StopReason};

    pub struct MockProvider {
        responses: std::sync::Mutex<Vec<ChatResponse>>,
        index: AtomicUsize,
        pub requests_seen: AtomicUsize,
    }

    impl MockProvider {
        pub fn new(responses: Vec<ChatResponse>) -> Self {
            Self {
                responses: std::sync::Mutex::new(responses),
                index: AtomicUsize::new(0),
                requests_seen: AtomicUsize::new(0),
            }
        }

        /// A response that is just text, ending the turn.
        pub fn text_response(text: &str) -> ChatResponse {
            ChatResponse {
                content: vec![ContentBlock::Text {
                    text: text.to_string(),
                }],
                stop_reason: StopReason::EndTurn,
            }
        }

        /// A response requesting one tool invocation.
        pub fn tool_use_response(id: &str, name: &str, input: serde_json::Value) -> ChatResponse {
            ChatResponse {
                content: vec![ContentBlock::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                }],
                stop_reason: StopReason::ToolUse,
            }
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        async fn chat(&self, _request: ChatRequest) -> Result<ChatResponse> {
            self.requests_seen.fetch_add(1, Ordering::SeqCst);
            let i = self.index.fetch_add(1, Ordering::SeqCst);
            let responses = self
                .responses
                .lock()
                .map_err(|_| ProviderError::Request("mock lock poisoned".into()))?;
            responses
                .get(i)
                .cloned()
                .ok_or_else(|| ProviderError::Request("mock out of responses".into()))
        }

        fn provider_name(&self) -> &str {
            "mock"
        }
    }
}
