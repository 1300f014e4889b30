//! Control surface: work items, runs, AHDB state, git and sandbox
//! operations, health and undo.
//!
//! Handlers are thin: validate, call into the core, serialize. Input
//! validation failures are rejected here and never promoted to events.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::events::EventSource;
use crate::sandbox::{SandboxCommand, provider::build_sandbox_config};
use crate::store::{
    NewWorkItem, RunStatus, RunUpdate, StoreError, WorkItemStatus, WorkItemUpdate,
};

use super::SharedState;

// ─── Error mapping ───────────────────────────────────────────────────────────

pub struct ApiError(StatusCode, String);

impl ApiError {
    fn bad_request(msg: impl Into<String>) -> Self {
        Self(StatusCode::BAD_REQUEST, msg.into())
    }

    fn not_found(msg: impl Into<String>) -> Self {
        Self(StatusCode::NOT_FOUND, msg.into())
    }

    fn internal(msg: impl Into<String>) -> Self {
        Self(StatusCode::INTERNAL_SERVER_ERROR, msg.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(json!({"error": self.1}))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(msg) => ApiError::not_found(msg),
            StoreError::InvalidData(msg) => ApiError::bad_request(msg),
            other => ApiError::internal(other.to_string()),
        }
    }
}

impl From<crate::git::GitError> for ApiError {
    fn from(err: crate::git::GitError) -> Self {
        ApiError::internal(err.to_string())
    }
}

impl From<crate::sandbox::SandboxError> for ApiError {
    fn from(err: crate::sandbox::SandboxError) -> Self {
        match err {
            crate::sandbox::SandboxError::UnknownSandbox(_)
            | crate::sandbox::SandboxError::UnknownCheckpoint(_)
            | crate::sandbox::SandboxError::UnknownProcess(_) => {
                ApiError::not_found(err.to_string())
            }
            other => ApiError::internal(other.to_string()),
        }
    }
}

type ApiResult = Result<Json<Value>, ApiError>;

// ─── Health ──────────────────────────────────────────────────────────────────

pub async fn health(State(state): State<SharedState>) -> ApiResult {
    Ok(Json(json!({
        "status": "ok",
        "stream": if state.config.stream.enabled { "enabled" } else { "disabled" },
        "sandbox_provider": state.config.sandbox.provider,
        "event_seq": state.store.latest_seq()?,
        "file_history_size": state.history.size().await,
    })))
}

// ─── Work items ──────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct WorkItemPayload {
    pub id: Option<String>,
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub required_verifiers: Option<Vec<String>>,
    pub risk_tier: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub status: Option<WorkItemStatus>,
    pub parent_id: Option<String>,
}

pub async fn upsert_work_item(
    State(state): State<SharedState>,
    Json(payload): Json<WorkItemPayload>,
) -> ApiResult {
    let existing = match &payload.id {
        Some(id) => state.store.get_work_item(id)?,
        None => None,
    };
    let item = if existing.is_some() {
        let id = payload.id.clone().unwrap_or_default();
        state.store.update_work_item(
            &id,
            WorkItemUpdate {
                description: payload.description,
                acceptance_criteria: payload.acceptance_criteria,
                required_verifiers: payload.required_verifiers,
                risk_tier: payload.risk_tier,
                dependencies: payload.dependencies,
                status: payload.status,
                parent_id: payload.parent_id,
            },
        )?
    } else {
        let description = payload
            .description
            .ok_or_else(|| ApiError::bad_request("description is required"))?;
        let new = NewWorkItem {
            description,
            acceptance_criteria: payload.acceptance_criteria,
            required_verifiers: payload.required_verifiers.unwrap_or_default(),
            risk_tier: payload.risk_tier,
            dependencies: payload.dependencies.unwrap_or_default(),
            status: payload.status,
            parent_id: payload.parent_id,
        };
        match payload.id {
            Some(id) => state.store.create_work_item_with_id(id, new)?,
            None => state.store.create_work_item(new)?,
        }
    };
    Ok(Json(serde_json::to_value(item).map_err(|e| ApiError::internal(e.to_string()))?))
}

pub async fn get_work_item(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> ApiResult {
    let item = state
        .store
        .get_work_item(&id)?
        .ok_or_else(|| ApiError::not_found(format!("work item {id}")))?;
    Ok(Json(serde_json::to_value(item).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

pub async fn list_work_items(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = match query.status.as_deref() {
        Some(s) => Some(
            s.parse::<WorkItemStatus>()
                .map_err(ApiError::bad_request)?,
        ),
        None => None,
    };
    let items = state.store.list_work_items(status, query.limit.unwrap_or(50))?;
    Ok(Json(json!({"work_items": items})))
}

// ─── Runs ────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RunCreatePayload {
    pub work_item_id: String,
    pub mood: Option<crate::mood::Mood>,
    pub status: Option<RunStatus>,
}

pub async fn create_run(
    State(state): State<SharedState>,
    Json(payload): Json<RunCreatePayload>,
) -> ApiResult {
    let run = state.store.create_run(
        &payload.work_item_id,
        payload.mood,
        payload.status.unwrap_or(RunStatus::Created),
    )?;
    Ok(Json(serde_json::to_value(run).map_err(|e| ApiError::internal(e.to_string()))?))
}

pub async fn update_run(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(update): Json<RunUpdate>,
) -> ApiResult {
    let run = state.store.update_run(&id, update)?;
    Ok(Json(serde_json::to_value(run).map_err(|e| ApiError::internal(e.to_string()))?))
}

pub async fn get_run(State(state): State<SharedState>, Path(id): Path<String>) -> ApiResult {
    let run = state
        .store
        .get_run(&id)?
        .ok_or_else(|| ApiError::not_found(format!("run {id}")))?;
    let notes = state.store.run_notes(&id)?;
    let verifications = state.store.run_verifications(&id)?;
    let commit_requests = state.store.commit_requests(&id)?;
    Ok(Json(json!({
        "run": run,
        "notes": notes,
        "verifications": verifications,
        "commit_requests": commit_requests,
    })))
}

pub async fn list_runs(
    State(state): State<SharedState>,
    Query(query): Query<ListQuery>,
) -> ApiResult {
    let status = match query.status.as_deref() {
        Some(s) => Some(s.parse::<RunStatus>().map_err(ApiError::bad_request)?),
        None => None,
    };
    let runs = state.store.list_runs(status, query.limit.unwrap_or(50))?;
    Ok(Json(json!({"runs": runs})))
}

#[derive(Debug, Deserialize)]
pub struct RunNotePayload {
    pub note_type: String,
    pub body: Value,
}

pub async fn add_run_note(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RunNotePayload>,
) -> ApiResult {
    if !payload.note_type.starts_with("note.") {
        return Err(ApiError::bad_request("note_type must be a note.* event type"));
    }
    let seq = state.store.add_run_note(&id, &payload.note_type, payload.body)?;
    Ok(Json(json!({"event_seq": seq})))
}

#[derive(Debug, Deserialize)]
pub struct RunVerificationPayload {
    pub attestation: Value,
}

pub async fn add_run_verification(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RunVerificationPayload>,
) -> ApiResult {
    let seq = state.store.add_run_verification(&id, payload.attestation)?;
    Ok(Json(json!({"event_seq": seq})))
}

#[derive(Debug, Deserialize)]
pub struct RunCommitRequestPayload {
    pub payload: Value,
}

pub async fn add_commit_request(
    State(state): State<SharedState>,
    Path(id): Path<String>,
    Json(payload): Json<RunCommitRequestPayload>,
) -> ApiResult {
    let seq = state.store.add_commit_request(&id, payload.payload)?;
    Ok(Json(json!({"event_seq": seq})))
}

// ─── AHDB state ──────────────────────────────────────────────────────────────

pub async fn ahdb_state(State(state): State<SharedState>) -> ApiResult {
    Ok(Json(Value::Object(state.store.ahdb_state()?)))
}

// ─── Git ─────────────────────────────────────────────────────────────────────

pub async fn git_status(State(state): State<SharedState>) -> ApiResult {
    let status = state.git.status().await?;
    let head = state.git.head_sha().await?;
    Ok(Json(json!({"head": head, "status": status})))
}

#[derive(Debug, Deserialize)]
pub struct GitLogQuery {
    pub count: Option<usize>,
}

pub async fn git_log(
    State(state): State<SharedState>,
    Query(query): Query<GitLogQuery>,
) -> ApiResult {
    let commits = state.git.log(query.count.unwrap_or(10)).await?;
    Ok(Json(json!({"commits": commits})))
}

#[derive(Debug, Deserialize)]
pub struct GitCheckpointPayload {
    pub message: Option<String>,
}

pub async fn git_checkpoint(
    State(state): State<SharedState>,
    Json(payload): Json<GitCheckpointPayload>,
) -> ApiResult {
    let outcome = state.git.checkpoint(payload.message, &state.store).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct GitRevertQuery {
    pub sha: String,
    #[serde(default)]
    pub dry_run: bool,
}

pub async fn git_revert(
    State(state): State<SharedState>,
    Query(query): Query<GitRevertQuery>,
) -> ApiResult {
    let outcome = state.git.revert(&query.sha, query.dry_run).await?;
    Ok(Json(serde_json::to_value(outcome).map_err(|e| ApiError::internal(e.to_string()))?))
}

pub async fn git_last_good(State(state): State<SharedState>) -> ApiResult {
    Ok(Json(json!({"last_good": state.store.get_last_good_checkpoint()?})))
}

#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    #[serde(default)]
    pub dry_run: bool,
}

/// Roll the repository back to the last-good checkpoint.
pub async fn git_rollback(
    State(state): State<SharedState>,
    Query(query): Query<RollbackQuery>,
) -> ApiResult {
    let last_good = state
        .store
        .get_last_good_checkpoint()?
        .ok_or_else(|| ApiError::not_found("no last-good checkpoint recorded"))?;
    let outcome = state.git.revert(&last_good, query.dry_run).await?;
    Ok(Json(json!({"last_good": last_good, "result": outcome})))
}

// ─── Sandbox ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct SandboxCreatePayload {
    pub workspace_id: Option<String>,
}

pub async fn sandbox_create(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxCreatePayload>,
) -> ApiResult {
    let workspace_id = payload
        .workspace_id
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let config = build_sandbox_config(
        state.store.user_id(),
        &workspace_id,
        &state.config.sandbox,
        &state.git.repo_root().display().to_string(),
    );
    let handle = state.sandbox_runner.create(config).await?;
    state
        .sandboxes
        .insert(handle.sandbox_id.clone(), handle.clone());
    Ok(Json(serde_json::to_value(handle).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct SandboxIdPayload {
    pub sandbox_id: String,
}

fn lookup_sandbox(
    state: &SharedState,
    sandbox_id: &str,
) -> Result<crate::sandbox::SandboxHandle, ApiError> {
    state
        .sandboxes
        .get(sandbox_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| ApiError::not_found(format!("unknown sandbox '{sandbox_id}'")))
}

pub async fn sandbox_destroy(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxIdPayload>,
) -> ApiResult {
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    state.sandbox_runner.destroy(&handle).await?;
    state.sandboxes.remove(&payload.sandbox_id);
    Ok(Json(json!({"success": true})))
}

#[derive(Debug, Deserialize)]
pub struct SandboxExecPayload {
    pub sandbox_id: String,
    pub command: Vec<String>,
    pub cwd: Option<String>,
    pub env: Option<std::collections::HashMap<String, String>>,
    pub timeout_seconds: Option<u64>,
}

pub async fn sandbox_exec(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxExecPayload>,
) -> ApiResult {
    if payload.command.is_empty() {
        return Err(ApiError::bad_request("command must not be empty"));
    }
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    let mut command = SandboxCommand::new(payload.command).with_sandbox(handle);
    if let Some(timeout) = payload.timeout_seconds {
        command = command.with_timeout(timeout);
    }
    if let Some(cwd) = payload.cwd {
        command = command.with_cwd(cwd.into());
    }
    if let Some(env) = payload.env {
        command = command.with_env(env);
    }
    let exec = state.sandbox_runner.run(command).await?;
    Ok(Json(serde_json::to_value(exec).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct SandboxCheckpointPayload {
    pub sandbox_id: String,
    pub label: Option<String>,
}

pub async fn sandbox_checkpoint(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxCheckpointPayload>,
) -> ApiResult {
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    let checkpoint = state
        .sandbox_runner
        .checkpoint(&handle, payload.label.as_deref())
        .await?;
    Ok(Json(serde_json::to_value(checkpoint).map_err(|e| ApiError::internal(e.to_string()))?))
}

#[derive(Debug, Deserialize)]
pub struct SandboxRestorePayload {
    pub sandbox_id: String,
    pub checkpoint_id: String,
}

pub async fn sandbox_restore(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxRestorePayload>,
) -> ApiResult {
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    state
        .sandbox_runner
        .restore(&handle, &payload.checkpoint_id)
        .await?;
    Ok(Json(json!({"success": true, "checkpoint_id": payload.checkpoint_id})))
}

#[derive(Debug, Deserialize)]
pub struct SandboxProxyPayload {
    pub sandbox_id: String,
    pub port: u16,
}

pub async fn sandbox_proxy(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxProxyPayload>,
) -> ApiResult {
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    let url = state.sandbox_runner.open_proxy(&handle, payload.port).await?;
    Ok(Json(json!({"url": url})))
}

#[derive(Debug, Deserialize)]
pub struct SandboxProcessStopPayload {
    pub sandbox_id: String,
    pub process_id: String,
}

pub async fn sandbox_process_stop(
    State(state): State<SharedState>,
    Json(payload): Json<SandboxProcessStopPayload>,
) -> ApiResult {
    let handle = lookup_sandbox(&state, &payload.sandbox_id)?;
    state
        .sandbox_runner
        .stop_process(&handle, &payload.process_id)
        .await?;
    Ok(Json(json!({"success": true})))
}

// ─── Undo and projections ────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UndoQuery {
    pub count: Option<usize>,
}

pub async fn undo(
    State(state): State<SharedState>,
    Query(query): Query<UndoQuery>,
) -> ApiResult {
    let restored = state
        .history
        .undo(query.count.unwrap_or(1))
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    if !restored.is_empty() {
        state.store.append(
            "undo",
            json!({"restored_files": restored}),
            EventSource::User,
        )?;
    }
    Ok(Json(json!({
        "restored_files": restored,
        "count": restored.len(),
    })))
}

/// Rebuild every projection from the log, then record the replay as a
/// receipt event.
pub async fn rebuild_projections(State(state): State<SharedState>) -> ApiResult {
    let replayed = state.store.rebuild_projections()?;
    state.store.append(
        "receipt.projection.rebuild",
        json!({"replayed": replayed}),
        EventSource::System,
    )?;
    Ok(Json(json!({"replayed": replayed})))
}
