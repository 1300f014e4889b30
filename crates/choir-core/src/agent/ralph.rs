//! The Ralph loop: prompt → model → tools → model, until the model stops
//! asking for tools or the turn budget runs out.
//!
//! Every user prompt, assistant reply and tool call is persisted to the
//! event store; progress streams to the caller as framed [`AgentEvent`]s.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};

use serde_json::{Value, json};
use tokio::sync::mpsc;

use crate::ai::provider::{LlmProvider, ProviderError};
use crate::ai::types::{ChatMessage, ChatRequest, ContentBlock, StopReason, ToolDefinition};
use crate::store::{EventStore, StoreError};
use crate::tools::ToolRegistry;

use super::AgentEvent;
use super::task::{TaskResult, TaskSpec, submit_result_schema};

const DEFAULT_SYSTEM_PROMPT: &str = "You are the workspace agent. You can read, write and edit \
files, run shell commands, and manage git checkpoints. Be concise. Focus on taking action.";

/// The distinguished result channel in task mode.
pub const SUBMIT_RESULT_TOOL: &str = "submit_result";

#[derive(Debug, thiserror::Error)]
pub enum RalphError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("turn budget exceeded after {turns} turns")]
    TurnBudgetExceeded { turns: usize },

    #[error("cancelled")]
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct RalphConfig {
    pub model: String,
    pub system_prompt: String,
    pub max_tokens: u32,
    pub max_turns: usize,
}

impl Default for RalphConfig {
    fn default() -> Self {
        Self {
            model: "claude-sonnet-4-5".to_string(),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_tokens: 4096,
            max_turns: 20,
        }
    }
}

/// A generic agent loop that processes prompts using an LLM and tools.
pub struct RalphLoop {
    provider: Arc<dyn LlmProvider>,
    registry: Arc<ToolRegistry>,
    store: Arc<EventStore>,
    config: RalphConfig,
    cancel_flag: Option<Arc<AtomicBool>>,
    /// When set, tool calls outside this set are rejected
    /// (`submit_result` is always allowed).
    allowed_tools: Option<HashSet<String>>,
}

impl RalphLoop {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        store: Arc<EventStore>,
        config: RalphConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            store,
            config,
            cancel_flag: None,
            allowed_tools: None,
        }
    }

    /// Attach a cancellation flag. When set, the loop aborts at the next
    /// turn boundary with [`RalphError::Cancelled`].
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel_flag = Some(flag);
        self
    }

    pub fn with_allowed_tools(mut self, allowed: HashSet<String>) -> Self {
        self.allowed_tools = Some(allowed);
        self
    }

    fn cancelled(&self) -> bool {
        self.cancel_flag
            .as_ref()
            .is_some_and(|f| f.load(AtomicOrdering::SeqCst))
    }

    fn emit(events: &mpsc::Sender<AgentEvent>, event: AgentEvent) {
        // A dropped receiver means the client went away; the cancel flag is
        // the authoritative stop signal.
        let _ = events.try_send(event);
    }

    /// Execute one tool call, enforcing the allowlist, and persist the
    /// `tool.call` event with its result.
    async fn execute_tool_call(
        &self,
        conversation_id: i64,
        name: &str,
        input: &Value,
    ) -> Result<(Value, bool), StoreError> {
        let allowed = match &self.allowed_tools {
            Some(set) => set.contains(name) || name == SUBMIT_RESULT_TOOL,
            None => true,
        };

        let (result, success) = if !allowed {
            (
                json!({"error": format!("Tool '{name}' is not allowed for this task")}),
                false,
            )
        } else {
            match self.registry.get(name) {
                None => (json!({"error": format!("Unknown tool: {name}")}), false),
                Some(tool) => match tool.execute(input.clone()).await {
                    Ok(result) => (result.value, result.success),
                    Err(e) => (json!({"error": e}), false),
                },
            }
        };

        self.store
            .log_tool_call(conversation_id, name, input.clone(), result.clone())?;
        Ok((result, success))
    }

    /// Process a user prompt, streaming framed events. Returns the final
    /// assistant text.
    #[tracing::instrument(name = "ralph.process", skip_all, fields(model = %self.config.model))]
    pub async fn process(
        &self,
        prompt: &str,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<String, RalphError> {
        let conversation_id = self.store.current_conversation_id()?;
        self.store.add_message(conversation_id, "user", prompt)?;

        let mut messages = vec![ChatMessage::user_text(prompt)];
        Self::emit(events, AgentEvent::Thinking("Processing your request...".to_string()));

        let tools = self.registry.definitions();
        let mut turns = 0usize;

        loop {
            if self.cancelled() {
                return Err(RalphError::Cancelled);
            }

            let request = ChatRequest::new(self.config.model.clone(), messages.clone())
                .with_system(self.config.system_prompt.clone())
                .with_tools(tools.clone())
                .with_max_tokens(self.config.max_tokens);

            let response = match self.provider.chat(request).await {
                Ok(r) => r,
                Err(e) => {
                    Self::emit(events, AgentEvent::Error(e.to_string()));
                    return Err(e.into());
                }
            };

            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            let mut text_parts: Vec<String> = Vec::new();
            let mut has_tool_use = false;

            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => {
                        Self::emit(events, AgentEvent::Text(text.clone()));
                        text_parts.push(text.clone());
                        assistant_blocks.push(block.clone());
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        has_tool_use = true;
                        Self::emit(
                            events,
                            AgentEvent::ToolUse(json!({"tool": name, "input": input})),
                        );
                        assistant_blocks.push(block.clone());

                        let (result, success) = self
                            .execute_tool_call(conversation_id, name, input)
                            .await?;
                        Self::emit(
                            events,
                            AgentEvent::ToolResult(json!({"tool": name, "result": result})),
                        );

                        messages.push(ChatMessage::assistant(std::mem::take(
                            &mut assistant_blocks,
                        )));
                        messages.push(ChatMessage::tool_result(
                            id.clone(),
                            result.to_string(),
                            !success,
                        ));
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }

            let finished = !has_tool_use || response.stop_reason == StopReason::EndTurn;
            if finished {
                let full_response = text_parts.join("\n");
                if !full_response.is_empty() {
                    self.store
                        .add_message(conversation_id, "assistant", &full_response)?;
                }
                Self::emit(events, AgentEvent::Done(None));
                return Ok(full_response);
            }

            turns += 1;
            if turns >= self.config.max_turns {
                Self::emit(
                    events,
                    AgentEvent::Error(format!(
                        "turn budget exceeded after {} turns",
                        self.config.max_turns
                    )),
                );
                return Err(RalphError::TurnBudgetExceeded { turns });
            }
        }
    }

    /// Run the loop in task mode: the tool catalog gains `submit_result`,
    /// and the loop ends when the model submits a valid [`TaskResult`].
    #[tracing::instrument(name = "ralph.run_task", skip_all, fields(task = %task.task_id))]
    pub async fn run_task(
        &self,
        task: &TaskSpec,
        events: &mpsc::Sender<AgentEvent>,
    ) -> Result<TaskResult, RalphError> {
        let conversation_id = self.store.current_conversation_id()?;

        let mut tools = self.registry.definitions();
        tools.push(ToolDefinition {
            name: SUBMIT_RESULT_TOOL.to_string(),
            description: "Submit the final result of the task execution.".to_string(),
            input_schema: submit_result_schema(),
        });

        let prompt = format!(
            "Task ID: {}\nKind: {:?}\nInstruction: {}\nAcceptance Criteria:\n{}\n\nAllowed Tools: {:?}\nCommands: {:?}\n",
            task.task_id,
            task.kind,
            task.instruction,
            serde_json::to_string_pretty(&task.acceptance_criteria).unwrap_or_default(),
            task.allowed_tools,
            task.commands,
        );
        let mut messages = vec![ChatMessage::user_text(prompt)];

        let allowed: Option<HashSet<String>> = task
            .allowed_tools
            .as_ref()
            .map(|tools| tools.iter().cloned().collect());

        for _turn in 0..self.config.max_turns {
            if self.cancelled() {
                return Err(RalphError::Cancelled);
            }

            let request = ChatRequest::new(self.config.model.clone(), messages.clone())
                .with_system(self.config.system_prompt.clone())
                .with_tools(tools.clone())
                .with_max_tokens(self.config.max_tokens);
            let response = self.provider.chat(request).await?;

            let mut assistant_blocks: Vec<ContentBlock> = Vec::new();
            for block in &response.content {
                match block {
                    ContentBlock::Text { text } => {
                        Self::emit(events, AgentEvent::Text(text.clone()));
                        assistant_blocks.push(block.clone());
                    }
                    ContentBlock::ToolUse { id, name, input } => {
                        assistant_blocks.push(block.clone());

                        if name == SUBMIT_RESULT_TOOL {
                            match serde_json::from_value::<TaskResult>(input.clone()) {
                                Ok(result) => return Ok(result),
                                Err(e) => {
                                    // Feed validation failures back so the
                                    // model can correct its submission.
                                    messages.push(ChatMessage::assistant(std::mem::take(
                                        &mut assistant_blocks,
                                    )));
                                    messages.push(ChatMessage::tool_result(
                                        id.clone(),
                                        format!("Invalid result format: {e}"),
                                        true,
                                    ));
                                    continue;
                                }
                            }
                        }

                        let task_allowed = match &allowed {
                            Some(set) => set.contains(name),
                            None => true,
                        };
                        let (result, success) = if !task_allowed {
                            let result = json!({
                                "error": format!(
                                    "Tool {name} is not allowed for this task. Allowed: {:?}",
                                    task.allowed_tools
                                )
                            });
                            self.store.log_tool_call(
                                conversation_id,
                                name,
                                input.clone(),
                                result.clone(),
                            )?;
                            (result, false)
                        } else {
                            self.execute_tool_call(conversation_id, name, input).await?
                        };
                        Self::emit(
                            events,
                            AgentEvent::ToolResult(json!({"tool": name, "result": result})),
                        );

                        messages.push(ChatMessage::assistant(std::mem::take(
                            &mut assistant_blocks,
                        )));
                        messages.push(ChatMessage::tool_result(
                            id.clone(),
                            result.to_string(),
                            !success,
                        ));
                    }
                    ContentBlock::ToolResult { .. } => {}
                }
            }
        }

        Ok(TaskResult::failed(&task.task_id, "Agent ran out of turns."))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::task::{TaskKind, TaskStatus};
    use crate::ai::provider::mock::MockProvider;
    use crate::ai::types::ChatResponse;
    use crate::tools::traits::{Tool, ToolResult};
    use async_trait::async_trait;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its input"
        }
        fn input_schema(&self) -> Value {
            json!({"type": "object"})
        }
        async fn execute(&self, args: Value) -> Result<ToolResult, String> {
            let message = args
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("(empty)");
            Ok(ToolResult::ok(json!({"echo": message})))
        }
    }

    fn fixtures(responses: Vec<ChatResponse>) -> (RalphLoop, mpsc::Sender<AgentEvent>, mpsc::Receiver<AgentEvent>) {
        let provider = Arc::new(MockProvider::new(responses));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let ralph = RalphLoop::new(
            provider,
            Arc::new(registry),
            store,
            RalphConfig::default(),
        );
        let (tx, rx) = mpsc::channel(256);
        (ralph, tx, rx)
    }

    fn drain(rx: &mut mpsc::Receiver<AgentEvent>) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[tokio::test]
    async fn single_turn_no_tool_use() {
        let (ralph, tx, mut rx) = fixtures(vec![MockProvider::text_response("All done.")]);
        let result = ralph.process("hello", &tx).await.unwrap();
        assert_eq!(result, "All done.");
        let events = drain(&mut rx);
        assert!(matches!(events.first(), Some(AgentEvent::Thinking(_))));
        assert!(matches!(events.last(), Some(AgentEvent::Done(None))));
    }

    #[tokio::test]
    async fn tool_use_executes_then_continues() {
        let (ralph, tx, mut rx) = fixtures(vec![
            MockProvider::tool_use_response("tu_1", "echo", json!({"message": "ping"})),
            MockProvider::text_response("The echo said ping."),
        ]);
        let result = ralph.process("use echo", &tx).await.unwrap();
        assert_eq!(result, "The echo said ping.");
        let events = drain(&mut rx);
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolUse(_))));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ToolResult(_))));
    }

    #[tokio::test]
    async fn tool_calls_are_persisted_to_the_log() {
        let provider = Arc::new(MockProvider::new(vec![
            MockProvider::tool_use_response("tu_1", "echo", json!({"message": "ping"})),
            MockProvider::text_response("done"),
        ]));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let ralph = RalphLoop::new(
            provider,
            Arc::new(registry),
            store.clone(),
            RalphConfig::default(),
        );
        let (tx, _rx) = mpsc::channel(256);
        ralph.process("go", &tx).await.unwrap();

        let tool_calls = store.events(0, Some("tool.call"), 10).unwrap();
        assert_eq!(tool_calls.len(), 1);
        assert_eq!(tool_calls[0].payload["tool_name"], "echo");
        assert_eq!(tool_calls[0].payload["tool_result"]["echo"], "ping");
        // The prompt and the final assistant text are messages.
        let messages = store.events(0, Some("message"), 10).unwrap();
        assert_eq!(messages.len(), 2);
    }

    #[tokio::test]
    async fn unknown_tool_feeds_error_back_and_continues() {
        let (ralph, tx, _rx) = fixtures(vec![
            MockProvider::tool_use_response("tu_1", "nonexistent", json!({})),
            MockProvider::text_response("Could not find that tool."),
        ]);
        let result = ralph.process("go", &tx).await.unwrap();
        assert_eq!(result, "Could not find that tool.");
    }

    #[tokio::test]
    async fn turn_budget_exceeded_fails() {
        let responses: Vec<ChatResponse> = (0..30)
            .map(|i| MockProvider::tool_use_response(&format!("tu_{i}"), "echo", json!({"message": "again"})))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let ralph = RalphLoop::new(
            provider,
            Arc::new(registry),
            store,
            RalphConfig {
                max_turns: 3,
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::channel(256);
        let err = ralph.process("loop forever", &tx).await.unwrap_err();
        assert!(matches!(err, RalphError::TurnBudgetExceeded { turns: 3 }));
    }

    #[tokio::test]
    async fn cancel_flag_aborts_loop() {
        let (ralph, tx, _rx) = fixtures(vec![MockProvider::text_response("never seen")]);
        let flag = Arc::new(AtomicBool::new(true));
        let ralph = ralph.with_cancel_flag(flag);
        let err = ralph.process("go", &tx).await.unwrap_err();
        assert!(matches!(err, RalphError::Cancelled));
    }

    #[tokio::test]
    async fn allowlist_rejects_tools_outside_set() {
        let (ralph, tx, _rx) = fixtures(vec![
            MockProvider::tool_use_response("tu_1", "echo", json!({"message": "hi"})),
            MockProvider::text_response("denied, moving on"),
        ]);
        let ralph = ralph.with_allowed_tools(["read_file".to_string()].into_iter().collect());
        let result = ralph.process("go", &tx).await.unwrap();
        assert_eq!(result, "denied, moving on");
    }

    fn task() -> TaskSpec {
        TaskSpec {
            task_id: "t-1".to_string(),
            kind: TaskKind::EditRepo,
            instruction: "do the thing".to_string(),
            acceptance_criteria: vec!["thing is done".to_string()],
            base_ref: None,
            allowed_tools: Some(vec!["echo".to_string()]),
            egress_profile: Default::default(),
            verify_profile: Default::default(),
            commands: vec![],
            time_budget_s: 60,
        }
    }

    #[tokio::test]
    async fn task_mode_submit_result_ends_loop() {
        let (ralph, tx, _rx) = fixtures(vec![MockProvider::tool_use_response(
            "tu_1",
            SUBMIT_RESULT_TOOL,
            json!({"task_id": "t-1", "status": "ok", "summary": "all good"}),
        )]);
        let result = ralph.run_task(&task(), &tx).await.unwrap();
        assert_eq!(result.status, TaskStatus::Ok);
        assert_eq!(result.summary, "all good");
    }

    #[tokio::test]
    async fn task_mode_invalid_submission_is_retried() {
        let (ralph, tx, _rx) = fixtures(vec![
            MockProvider::tool_use_response(
                "tu_1",
                SUBMIT_RESULT_TOOL,
                json!({"task_id": "t-1", "status": "sideways", "summary": "?"}),
            ),
            MockProvider::tool_use_response(
                "tu_2",
                SUBMIT_RESULT_TOOL,
                json!({"task_id": "t-1", "status": "ok", "summary": "fixed"}),
            ),
        ]);
        let result = ralph.run_task(&task(), &tx).await.unwrap();
        assert_eq!(result.summary, "fixed");
    }

    #[tokio::test]
    async fn task_mode_out_of_turns_is_failed() {
        let responses: Vec<ChatResponse> = (0..30)
            .map(|i| MockProvider::tool_use_response(&format!("tu_{i}"), "echo", json!({"message": "again"})))
            .collect();
        let provider = Arc::new(MockProvider::new(responses));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool));
        let store = Arc::new(EventStore::in_memory("local").unwrap());
        let ralph = RalphLoop::new(
            provider,
            Arc::new(registry),
            store,
            RalphConfig {
                max_turns: 2,
                ..Default::default()
            },
        );
        let (tx, _rx) = mpsc::channel(256);
        let result = ralph.run_task(&task(), &tx).await.unwrap();
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.summary.contains("out of turns"));
    }
}
