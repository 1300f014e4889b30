//! `WS /agent`: prompts in, framed agent events out.
//!
//! Prompts are processed strictly serially per session. Oversized or
//! over-rate prompts get an error frame, not a disconnect. A disconnect
//! mid-run flips the cancel flag; the loop aborts at its next turn boundary
//! and the orchestrator still cleans up.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use crate::agent::AgentEvent;
use crate::agent::ralph::{RalphConfig, RalphLoop};
use crate::orchestrator::{Executor, ExecutorOutcome};
use crate::store::NewWorkItem;

use super::SharedState;

/// WebSocket upgrade handler at `GET /agent`.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WsCommand {
    /// Submit a prompt for a supervised run.
    Prompt { content: String },
    /// Keep-alive; answered with a pong frame.
    Ping,
}

/// Sliding-window prompt rate limiter.
struct RateWindow {
    window: Duration,
    max: usize,
    hits: VecDeque<Instant>,
}

impl RateWindow {
    fn new(window: Duration, max: usize) -> Self {
        Self {
            window,
            max,
            hits: VecDeque::new(),
        }
    }

    fn admit(&mut self, now: Instant) -> bool {
        while let Some(front) = self.hits.front() {
            if now.duration_since(*front) > self.window {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if self.hits.len() >= self.max {
            return false;
        }
        self.hits.push_back(now);
        true
    }
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (mut sink, mut stream) = socket.split();

    // One writer task owns the sink; everything else sends through the
    // channel.
    let (out_tx, mut out_rx) = mpsc::channel::<String>(256);
    let writer = tokio::spawn(async move {
        while let Some(text) = out_rx.recv().await {
            if sink.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    let mut rate = RateWindow::new(
        Duration::from_secs(state.config.gateway.rate_window_secs),
        state.config.gateway.max_prompts_per_window,
    );
    let max_prompt_chars = state.config.gateway.max_prompt_chars;
    let mut pending: VecDeque<String> = VecDeque::new();
    let cancel = Arc::new(AtomicBool::new(false));

    'session: loop {
        // Admitted prompts run one at a time; more may queue while one runs.
        if let Some(prompt) = pending.pop_front() {
            let run_fut = run_prompt(&state, prompt, &out_tx, cancel.clone());
            tokio::pin!(run_fut);
            loop {
                tokio::select! {
                    _ = &mut run_fut => break,
                    msg = stream.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                handle_incoming(
                                    &text,
                                    &mut pending,
                                    &mut rate,
                                    max_prompt_chars,
                                    &out_tx,
                                );
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                // Abort at the next suspension point, but let
                                // the run settle so cleanup happens.
                                cancel.store(true, Ordering::SeqCst);
                                (&mut run_fut).await;
                                break 'session;
                            }
                            _ => {}
                        }
                    }
                }
            }
            continue;
        }

        match stream.next().await {
            Some(Ok(Message::Text(text))) => {
                handle_incoming(&text, &mut pending, &mut rate, max_prompt_chars, &out_tx);
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Err(_)) => break,
            _ => {}
        }
    }

    drop(out_tx);
    let _ = writer.await;
}

fn handle_incoming(
    raw: &str,
    pending: &mut VecDeque<String>,
    rate: &mut RateWindow,
    max_prompt_chars: usize,
    out_tx: &mpsc::Sender<String>,
) {
    let send_frame = |frame: serde_json::Value| {
        let _ = out_tx.try_send(frame.to_string());
    };

    let command: WsCommand = match serde_json::from_str(raw) {
        Ok(c) => c,
        Err(e) => {
            send_frame(json!({"type": "error", "content": format!("invalid frame: {e}")}));
            return;
        }
    };

    match command {
        WsCommand::Ping => send_frame(json!({"type": "pong"})),
        WsCommand::Prompt { content } => {
            if content.chars().count() > max_prompt_chars {
                send_frame(json!({
                    "type": "error",
                    "content": format!("prompt exceeds {max_prompt_chars} characters"),
                }));
                return;
            }
            if !rate.admit(Instant::now()) {
                send_frame(json!({
                    "type": "error",
                    "content": "prompt rate limit exceeded; try again shortly",
                }));
                return;
            }
            pending.push_back(content);
        }
    }
}

/// Run one prompt through the orchestrator, streaming frames out.
async fn run_prompt(
    state: &SharedState,
    prompt: String,
    out_tx: &mpsc::Sender<String>,
    cancel: Arc<AtomicBool>,
) {
    // A prompt becomes a work item; its run carries the initial mood.
    let work_item = match state.store.create_work_item(NewWorkItem {
        description: prompt.clone(),
        ..Default::default()
    }) {
        Ok(item) => item,
        Err(e) => {
            let _ = out_tx
                .send(json!({"type": "error", "content": e.to_string()}).to_string())
                .await;
            return;
        }
    };
    let mood = crate::mood::select_initial_mood(&crate::mood::MoodSignals::default());

    let (event_tx, mut event_rx) = mpsc::channel::<AgentEvent>(256);
    let forward_tx = out_tx.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else {
                continue;
            };
            if forward_tx.send(text).await.is_err() {
                break;
            }
        }
    });

    let provider = state.provider.clone();
    let registry = state.registry.clone();
    let store = state.store.clone();
    let agent_settings = state.config.agent.clone();
    let executor_cancel = cancel.clone();
    let executor: Executor = Box::new(move |_run| {
        Box::pin(async move {
            let mut config = RalphConfig {
                model: agent_settings.model,
                max_tokens: agent_settings.max_tokens,
                max_turns: agent_settings.max_turns,
                ..Default::default()
            };
            if let Some(system_prompt) = agent_settings.system_prompt {
                config.system_prompt = system_prompt;
            }
            let ralph = RalphLoop::new(provider, registry, store, config)
                .with_cancel_flag(executor_cancel);
            match ralph.process(&prompt, &event_tx).await {
                Ok(_) => ExecutorOutcome::Ok,
                Err(e) => ExecutorOutcome::Failed {
                    reason: e.to_string(),
                },
            }
        })
    });

    match state.orchestrator.run(&work_item.id, executor, mood).await {
        Ok(outcome) => {
            let frame = json!({
                "type": "verification",
                "content": outcome.verification_frame(),
            });
            let _ = out_tx.send(frame.to_string()).await;
        }
        Err(e) => {
            tracing::error!(%e, "orchestrated run failed fatally");
            let _ = out_tx
                .send(json!({"type": "error", "content": e.to_string()}).to_string())
                .await;
        }
    }
    let _ = forwarder.await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_window_admits_up_to_max() {
        let mut rate = RateWindow::new(Duration::from_secs(10), 2);
        let now = Instant::now();
        assert!(rate.admit(now));
        assert!(rate.admit(now));
        assert!(!rate.admit(now));
    }

    #[test]
    fn rate_window_slides() {
        let mut rate = RateWindow::new(Duration::from_secs(10), 1);
        let start = Instant::now();
        assert!(rate.admit(start));
        assert!(!rate.admit(start + Duration::from_secs(5)));
        assert!(rate.admit(start + Duration::from_secs(11)));
    }

    #[test]
    fn oversized_prompt_is_rejected_with_error_frame() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pending = VecDeque::new();
        let mut rate = RateWindow::new(Duration::from_secs(10), 5);
        let raw = json!({"type": "prompt", "content": "x".repeat(100)}).to_string();
        handle_incoming(&raw, &mut pending, &mut rate, 10, &tx);
        assert!(pending.is_empty());
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
    }

    #[test]
    fn valid_prompt_is_queued() {
        let (tx, _rx) = mpsc::channel(8);
        let mut pending = VecDeque::new();
        let mut rate = RateWindow::new(Duration::from_secs(10), 5);
        let raw = json!({"type": "prompt", "content": "make it blue"}).to_string();
        handle_incoming(&raw, &mut pending, &mut rate, 1000, &tx);
        assert_eq!(pending.len(), 1);
    }

    #[test]
    fn malformed_frame_gets_error_not_disconnect() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut pending = VecDeque::new();
        let mut rate = RateWindow::new(Duration::from_secs(10), 5);
        handle_incoming("not json", &mut pending, &mut rate, 1000, &tx);
        let frame: serde_json::Value =
            serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["type"], "error");
    }
}
