//! SQLite-backed event store.
//!
//! Event-sourced: the `events` table is the append-only source of truth and
//! every projection table is derived from it by the materializer. Work items,
//! runs, checkpoints and `sync_state` are orchestrator-owned tables and are
//! *not* projections; `rebuild_projections` purges only derived state.
//!
//! A [`rusqlite::Connection`] wrapped in an `Arc<Mutex<…>>` keeps the store
//! `Send + Sync` while honouring SQLite's single-writer requirement; the
//! mutex also serializes appends so `seq` stays monotonic.

pub mod materializer;

use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::events::contract::normalize_event_type;
use crate::events::mirror::{EventMirror, subject_for};
use crate::events::{Event, EventSource};
use crate::mood::Mood;
use crate::util;

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("store lock poisoned")]
    Lock,

    #[error("invalid data: {0}")]
    InvalidData(String),

    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

// ─── Schema ──────────────────────────────────────────────────────────────────

/// DDL executed idempotently when the store is opened.
const SCHEMA_SQL: &str = r#"
-- Core event log (append-only source of truth)
CREATE TABLE IF NOT EXISTS events (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    external_seq INTEGER,
    timestamp TEXT NOT NULL,
    type TEXT NOT NULL,
    source TEXT NOT NULL DEFAULT 'system',
    payload TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
CREATE INDEX IF NOT EXISTS idx_events_external_seq ON events(external_seq);

-- Materialized: file state
CREATE TABLE IF NOT EXISTS files (
    path TEXT PRIMARY KEY,
    content_hash TEXT,
    updated_at TEXT NOT NULL
);

-- Materialized: conversations
CREATE TABLE IF NOT EXISTS conversations (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    title TEXT,
    last_seq INTEGER
);

-- Materialized: messages (denormalized for query convenience)
CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER REFERENCES conversations(id),
    event_seq INTEGER REFERENCES events(seq),
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id);

-- Materialized: tool calls
CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_seq INTEGER REFERENCES events(seq),
    conversation_id INTEGER REFERENCES conversations(id),
    tool_name TEXT NOT NULL,
    tool_input TEXT NOT NULL,
    tool_result TEXT,
    timestamp TEXT NOT NULL
);

-- Materialized: AHDB state vector
CREATE TABLE IF NOT EXISTS ahdb_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Materialized: AHDB deltas
CREATE TABLE IF NOT EXISTS ahdb_deltas (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    event_seq INTEGER REFERENCES events(seq),
    delta TEXT NOT NULL,
    timestamp TEXT NOT NULL
);

-- Work items (persisted work queue)
CREATE TABLE IF NOT EXISTS work_items (
    id TEXT PRIMARY KEY,
    description TEXT NOT NULL,
    acceptance_criteria TEXT,
    required_verifiers TEXT,
    risk_tier TEXT,
    dependencies TEXT,
    status TEXT NOT NULL,
    parent_id TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Runs (one work item per run)
CREATE TABLE IF NOT EXISTS runs (
    id TEXT PRIMARY KEY,
    work_item_id TEXT REFERENCES work_items(id),
    status TEXT NOT NULL,
    mood TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    started_at TEXT,
    finished_at TEXT
);

-- Materialized: run notes (typed)
CREATE TABLE IF NOT EXISTS run_notes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT REFERENCES runs(id),
    note_type TEXT NOT NULL,
    body TEXT NOT NULL,
    event_seq INTEGER REFERENCES events(seq),
    created_at TEXT NOT NULL
);

-- Materialized: verifier attestations (recorded per run)
CREATE TABLE IF NOT EXISTS run_verifications (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT REFERENCES runs(id),
    attestation TEXT NOT NULL,
    event_seq INTEGER REFERENCES events(seq),
    created_at TEXT NOT NULL
);

-- Materialized: commit requests (review gate)
CREATE TABLE IF NOT EXISTS run_commit_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_id TEXT REFERENCES runs(id),
    payload TEXT NOT NULL,
    event_seq INTEGER REFERENCES events(seq),
    created_at TEXT NOT NULL
);

-- Git checkpoints
CREATE TABLE IF NOT EXISTS checkpoints (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    commit_sha TEXT NOT NULL,
    last_event_seq INTEGER NOT NULL,
    last_external_seq INTEGER,
    created_at TEXT NOT NULL,
    message TEXT
);

-- Singleton pointers (last-good checkpoint, sandbox state, …)
CREATE TABLE IF NOT EXISTS sync_state (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Projection tables purged and rebuilt by `rebuild_projections`.
const PROJECTION_TABLES: &[&str] = &[
    "files",
    "messages",
    "tool_calls",
    "conversations",
    "ahdb_state",
    "ahdb_deltas",
    "run_notes",
    "run_verifications",
    "run_commit_requests",
];

const LAST_GOOD_CHECKPOINT_KEY: &str = "last_good_checkpoint";

// ─── Row types ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkItemStatus {
    Pending,
    Queued,
    InProgress,
    Done,
    Failed,
}

impl WorkItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkItemStatus::Pending => "pending",
            WorkItemStatus::Queued => "queued",
            WorkItemStatus::InProgress => "in_progress",
            WorkItemStatus::Done => "done",
            WorkItemStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for WorkItemStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(WorkItemStatus::Pending),
            "queued" => Ok(WorkItemStatus::Queued),
            "in_progress" => Ok(WorkItemStatus::InProgress),
            "done" => Ok(WorkItemStatus::Done),
            "failed" => Ok(WorkItemStatus::Failed),
            other => Err(format!("unknown work item status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: String,
    pub description: String,
    pub acceptance_criteria: Option<String>,
    pub required_verifiers: Vec<String>,
    pub risk_tier: Option<String>,
    pub dependencies: Vec<String>,
    pub status: WorkItemStatus,
    pub parent_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields for creating a work item. Everything but the description has a
/// sensible default.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewWorkItem {
    pub description: String,
    pub acceptance_criteria: Option<String>,
    #[serde(default)]
    pub required_verifiers: Vec<String>,
    pub risk_tier: Option<String>,
    #[serde(default)]
    pub dependencies: Vec<String>,
    pub status: Option<WorkItemStatus>,
    pub parent_id: Option<String>,
}

/// Partial update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkItemUpdate {
    pub description: Option<String>,
    pub acceptance_criteria: Option<String>,
    pub required_verifiers: Option<Vec<String>>,
    pub risk_tier: Option<String>,
    pub dependencies: Option<Vec<String>>,
    pub status: Option<WorkItemStatus>,
    pub parent_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Created,
    Running,
    Verifying,
    Verified,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Created => "created",
            RunStatus::Running => "running",
            RunStatus::Verifying => "verifying",
            RunStatus::Verified => "verified",
            RunStatus::Failed => "failed",
        }
    }

    /// Terminal states never transition further.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Verified | RunStatus::Failed)
    }
}

impl std::str::FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "created" => Ok(RunStatus::Created),
            "running" => Ok(RunStatus::Running),
            "verifying" => Ok(RunStatus::Verifying),
            "verified" => Ok(RunStatus::Verified),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: String,
    pub work_item_id: String,
    pub status: RunStatus,
    pub mood: Option<Mood>,
    pub created_at: String,
    pub updated_at: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunUpdate {
    pub status: Option<RunStatus>,
    pub mood: Option<Mood>,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunNote {
    pub id: i64,
    pub run_id: String,
    pub note_type: String,
    pub body: Value,
    pub event_seq: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunVerification {
    pub id: i64,
    pub run_id: String,
    pub attestation: Value,
    pub event_seq: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommitRequest {
    pub id: i64,
    pub run_id: String,
    pub payload: Value,
    pub event_seq: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckpointRecord {
    pub id: i64,
    pub commit_sha: String,
    pub last_event_seq: i64,
    pub last_external_seq: Option<i64>,
    pub created_at: String,
    pub message: Option<String>,
}

// ─── EventStore ──────────────────────────────────────────────────────────────

/// Event-sourced storage: append-only log plus materialized projections.
pub struct EventStore {
    conn: Arc<Mutex<Connection>>,
    user_id: String,
    mirror: Option<Arc<dyn EventMirror>>,
}

impl EventStore {
    /// Open (or create) the database at `path` and initialize the schema.
    pub fn open(path: &Path, user_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open(path)?;
        // `PRAGMA journal_mode` returns a row, so query_row rather than
        // execute_batch.
        conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            user_id: user_id.into(),
            mirror: None,
        })
    }

    /// In-memory store for tests.
    pub fn in_memory(user_id: impl Into<String>) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            user_id: user_id.into(),
            mirror: None,
        })
    }

    /// Attach an external mirror; publishes are best-effort.
    pub fn with_mirror(mut self, mirror: Arc<dyn EventMirror>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }

    // ── Event log ────────────────────────────────────────────────────────────

    /// Append an event: normalize the type, assign the next `seq`, write the
    /// row and its projection updates atomically, then mirror best-effort.
    ///
    /// Only a storage failure escapes; a mirror failure is logged and the
    /// event keeps `external_seq = NULL`.
    pub fn append(&self, event_type: &str, payload: Value, source: EventSource) -> Result<i64> {
        let event_type = normalize_event_type(event_type);
        let timestamp = util::utc_now();
        let seq = {
            let mut conn = self.lock()?;
            let tx = conn.transaction()?;
            tx.execute(
                "INSERT INTO events (external_seq, timestamp, type, source, payload)
                 VALUES (NULL, ?1, ?2, ?3, ?4)",
                params![timestamp, event_type, source.as_str(), payload.to_string()],
            )?;
            let seq = tx.last_insert_rowid();
            materializer::materialize(&tx, &event_type, &payload, &timestamp, seq)?;
            tx.commit()?;
            seq
        };

        if let Some(mirror) = &self.mirror {
            let event = Event {
                seq,
                external_seq: None,
                timestamp,
                event_type,
                source,
                payload,
            };
            let subject = subject_for(&self.user_id, &event);
            match mirror.publish(&subject, &event) {
                Ok(Some(external_seq)) => {
                    let conn = self.lock()?;
                    conn.execute(
                        "UPDATE events SET external_seq = ?1 WHERE seq = ?2",
                        params![external_seq, seq],
                    )?;
                }
                Ok(None) => {}
                Err(err) => {
                    tracing::warn!(seq, %err, "event mirror publish failed");
                }
            }
        }

        Ok(seq)
    }

    /// Events after `since_seq`, ordered by `seq` ascending. Restartable by
    /// passing the last returned `seq`.
    pub fn events(
        &self,
        since_seq: i64,
        event_type: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let conn = self.lock()?;
        let mut out = Vec::new();
        let mut push = |row: &rusqlite::Row<'_>| -> rusqlite::Result<()> {
            let source: String = row.get("source")?;
            let payload: String = row.get("payload")?;
            out.push(Event {
                seq: row.get("seq")?,
                external_seq: row.get("external_seq")?,
                timestamp: row.get("timestamp")?,
                event_type: row.get("type")?,
                source: source.parse().unwrap_or(EventSource::System),
                payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
            });
            Ok(())
        };
        if let Some(t) = event_type {
            let mut stmt = conn.prepare(
                "SELECT seq, external_seq, timestamp, type, source, payload
                 FROM events WHERE seq > ?1 AND type = ?2 ORDER BY seq LIMIT ?3",
            )?;
            let mut rows = stmt.query(params![since_seq, t, limit as i64])?;
            while let Some(row) = rows.next()? {
                push(row)?;
            }
        } else {
            let mut stmt = conn.prepare(
                "SELECT seq, external_seq, timestamp, type, source, payload
                 FROM events WHERE seq > ?1 ORDER BY seq LIMIT ?2",
            )?;
            let mut rows = stmt.query(params![since_seq, limit as i64])?;
            while let Some(row) = rows.next()? {
                push(row)?;
            }
        }
        Ok(out)
    }

    /// Sorted unique file paths from `file.write`/`file.delete`/`file.move`
    /// payloads after `since_seq`.
    pub fn touched_paths(&self, since_seq: i64) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM events
             WHERE seq > ?1 AND type IN ('file.write', 'file.delete', 'file.move')",
        )?;
        let mut rows = stmt.query(params![since_seq])?;
        let mut paths = std::collections::BTreeSet::new();
        while let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            let payload: Value = serde_json::from_str(&raw).unwrap_or(Value::Null);
            for key in ["path", "from", "to"] {
                if let Some(p) = payload.get(key).and_then(Value::as_str) {
                    paths.insert(p.to_string());
                }
            }
        }
        Ok(paths.into_iter().collect())
    }

    pub fn latest_seq(&self) -> Result<i64> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn.query_row("SELECT MAX(seq) FROM events", [], |r| r.get(0))?;
        Ok(seq.unwrap_or(0))
    }

    pub fn latest_external_seq(&self) -> Result<Option<i64>> {
        let conn = self.lock()?;
        let seq: Option<i64> = conn.query_row(
            "SELECT MAX(external_seq) FROM events WHERE external_seq IS NOT NULL",
            [],
            |r| r.get(0),
        )?;
        Ok(seq)
    }

    /// Purge all projection tables and replay every event in `seq` order
    /// through the materializer. Returns the number of events replayed.
    pub fn rebuild_projections(&self) -> Result<usize> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        for table in PROJECTION_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        let rows: Vec<(i64, String, String, String)> = {
            let mut stmt =
                tx.prepare("SELECT seq, type, payload, timestamp FROM events ORDER BY seq")?;
            let mapped = stmt.query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
            })?;
            mapped.collect::<rusqlite::Result<Vec<_>>>()?
        };
        let count = rows.len();
        for (seq, event_type, payload, timestamp) in rows {
            let payload: Value = serde_json::from_str(&payload).unwrap_or(Value::Null);
            materializer::materialize_normalized(&tx, &event_type, &payload, &timestamp, seq)?;
        }
        tx.commit()?;
        Ok(count)
    }

    // ── Conversations and messages ───────────────────────────────────────────

    /// Id of the most recent conversation, or the id the next message will
    /// create. Conversation rows themselves are materialized from `message`
    /// events.
    pub fn current_conversation_id(&self) -> Result<i64> {
        let conn = self.lock()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM conversations ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.unwrap_or(1))
    }

    /// Allocate the id for a fresh conversation.
    pub fn new_conversation_id(&self) -> Result<i64> {
        let conn = self.lock()?;
        let id: Option<i64> = conn
            .query_row(
                "SELECT id FROM conversations ORDER BY id DESC LIMIT 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id.map_or(1, |i| i + 1))
    }

    /// Append a `message` event; materialization inserts the row and advances
    /// the conversation's `last_seq`.
    pub fn add_message(&self, conversation_id: i64, role: &str, content: &str) -> Result<i64> {
        let source = if role == "user" {
            EventSource::User
        } else {
            EventSource::Agent
        };
        self.append(
            "message",
            serde_json::json!({
                "conversation_id": conversation_id,
                "role": role,
                "content": content,
            }),
            source,
        )
    }

    pub fn conversation_messages(
        &self,
        conversation_id: i64,
        limit: usize,
    ) -> Result<Vec<(String, String, String)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT role, content, timestamp FROM messages
             WHERE conversation_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let mut rows: Vec<(String, String, String)> = stmt
            .query_map(params![conversation_id, limit as i64], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.reverse();
        Ok(rows)
    }

    // ── File tracking and tool calls ─────────────────────────────────────────

    pub fn log_file_write(&self, path: &str, content: &[u8]) -> Result<i64> {
        let content_hash = util::sha256_hex(content);
        self.append(
            "file.write",
            serde_json::json!({
                "path": path,
                "content_hash": content_hash,
                "size_bytes": content.len(),
            }),
            EventSource::Agent,
        )
    }

    pub fn log_file_delete(&self, path: &str) -> Result<i64> {
        self.append(
            "file.delete",
            serde_json::json!({"path": path}),
            EventSource::Agent,
        )
    }

    pub fn log_tool_call(
        &self,
        conversation_id: i64,
        tool_name: &str,
        tool_input: Value,
        tool_result: Value,
    ) -> Result<i64> {
        self.append(
            "tool.call",
            serde_json::json!({
                "conversation_id": conversation_id,
                "tool_name": tool_name,
                "tool_input": tool_input,
                "tool_result": tool_result,
            }),
            EventSource::Agent,
        )
    }

    // ── AHDB ─────────────────────────────────────────────────────────────────

    /// Append a `receipt.ahdb.delta` event; extra metadata keys ride along in
    /// the payload.
    pub fn log_ahdb_delta(&self, delta: Value, metadata: Option<Value>) -> Result<i64> {
        let mut payload = serde_json::Map::new();
        payload.insert("delta".to_string(), delta);
        if let Some(Value::Object(meta)) = metadata {
            for (k, v) in meta {
                payload.entry(k).or_insert(v);
            }
        }
        self.append(
            "receipt.ahdb.delta",
            Value::Object(payload),
            EventSource::System,
        )
    }

    /// Latest AHDB state vector, slot → value.
    pub fn ahdb_state(&self) -> Result<serde_json::Map<String, Value>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT key, value FROM ahdb_state")?;
        let mut rows = stmt.query([])?;
        let mut state = serde_json::Map::new();
        while let Some(row) = rows.next()? {
            let key: String = row.get(0)?;
            let value: String = row.get(1)?;
            state.insert(key, serde_json::from_str(&value).unwrap_or(Value::Null));
        }
        Ok(state)
    }

    /// Applied deltas in event order.
    pub fn ahdb_deltas(&self) -> Result<Vec<(i64, Value)>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT event_seq, delta FROM ahdb_deltas ORDER BY event_seq")?;
        let rows = stmt
            .query_map([], |row| {
                let seq: i64 = row.get(0)?;
                let delta: String = row.get(1)?;
                Ok((seq, delta))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows
            .into_iter()
            .map(|(seq, delta)| (seq, serde_json::from_str(&delta).unwrap_or(Value::Null)))
            .collect())
    }

    // ── Work items ───────────────────────────────────────────────────────────

    pub fn create_work_item(&self, new: NewWorkItem) -> Result<WorkItem> {
        self.create_work_item_with_id(uuid::Uuid::new_v4().to_string(), new)
    }

    pub fn create_work_item_with_id(&self, id: String, new: NewWorkItem) -> Result<WorkItem> {
        let now = util::utc_now();
        let status = new.status.unwrap_or(WorkItemStatus::Pending);
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO work_items
                 (id, description, acceptance_criteria, required_verifiers, risk_tier,
                  dependencies, status, parent_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id,
                    new.description,
                    new.acceptance_criteria,
                    serde_json::to_string(&new.required_verifiers)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                    new.risk_tier,
                    serde_json::to_string(&new.dependencies)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                    status.as_str(),
                    new.parent_id,
                    now,
                    now
                ],
            )?;
        }
        self.get_work_item(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("work item {id}")))
    }

    pub fn update_work_item(&self, id: &str, update: WorkItemUpdate) -> Result<WorkItem> {
        let existing = self
            .get_work_item(id)?
            .ok_or_else(|| StoreError::NotFound(format!("work item {id}")))?;
        let now = util::utc_now();
        let required = update
            .required_verifiers
            .unwrap_or(existing.required_verifiers);
        let dependencies = update.dependencies.unwrap_or(existing.dependencies);
        {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE work_items SET description = ?1, acceptance_criteria = ?2,
                 required_verifiers = ?3, risk_tier = ?4, dependencies = ?5,
                 status = ?6, parent_id = ?7, updated_at = ?8 WHERE id = ?9",
                params![
                    update.description.unwrap_or(existing.description),
                    update.acceptance_criteria.or(existing.acceptance_criteria),
                    serde_json::to_string(&required)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                    update.risk_tier.or(existing.risk_tier),
                    serde_json::to_string(&dependencies)
                        .map_err(|e| StoreError::InvalidData(e.to_string()))?,
                    update.status.unwrap_or(existing.status).as_str(),
                    update.parent_id.or(existing.parent_id),
                    now,
                    id
                ],
            )?;
        }
        self.get_work_item(id)?
            .ok_or_else(|| StoreError::NotFound(format!("work item {id}")))
    }

    pub fn get_work_item(&self, id: &str) -> Result<Option<WorkItem>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, description, acceptance_criteria, required_verifiers, risk_tier,
             dependencies, status, parent_id, created_at, updated_at
             FROM work_items WHERE id = ?1",
            params![id],
            work_item_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_work_items(
        &self,
        status: Option<WorkItemStatus>,
        limit: usize,
    ) -> Result<Vec<WorkItem>> {
        let conn = self.lock()?;
        let items = if let Some(status) = status {
            let mut stmt = conn.prepare(
                "SELECT id, description, acceptance_criteria, required_verifiers, risk_tier,
                 dependencies, status, parent_id, created_at, updated_at
                 FROM work_items WHERE status = ?1 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![status.as_str(), limit as i64], work_item_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, description, acceptance_criteria, required_verifiers, risk_tier,
                 dependencies, status, parent_id, created_at, updated_at
                 FROM work_items ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], work_item_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(items)
    }

    // ── Runs ─────────────────────────────────────────────────────────────────

    pub fn create_run(
        &self,
        work_item_id: &str,
        mood: Option<Mood>,
        status: RunStatus,
    ) -> Result<Run> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = util::utc_now();
        {
            let conn = self.lock()?;
            conn.execute(
                "INSERT INTO runs
                 (id, work_item_id, status, mood, created_at, updated_at, started_at, finished_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL)",
                params![
                    id,
                    work_item_id,
                    status.as_str(),
                    mood.map(|m| m.as_str()),
                    now,
                    now
                ],
            )?;
        }
        self.get_run(&id)?
            .ok_or_else(|| StoreError::NotFound(format!("run {id}")))
    }

    pub fn update_run(&self, id: &str, update: RunUpdate) -> Result<Run> {
        let existing = self
            .get_run(id)?
            .ok_or_else(|| StoreError::NotFound(format!("run {id}")))?;
        let now = util::utc_now();
        {
            let conn = self.lock()?;
            conn.execute(
                "UPDATE runs SET status = ?1, mood = ?2, started_at = ?3, finished_at = ?4,
                 updated_at = ?5 WHERE id = ?6",
                params![
                    update.status.unwrap_or(existing.status).as_str(),
                    update.mood.or(existing.mood).map(|m| m.as_str()),
                    update.started_at.or(existing.started_at),
                    update.finished_at.or(existing.finished_at),
                    now,
                    id
                ],
            )?;
        }
        self.get_run(id)?
            .ok_or_else(|| StoreError::NotFound(format!("run {id}")))
    }

    pub fn get_run(&self, id: &str) -> Result<Option<Run>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, work_item_id, status, mood, created_at, updated_at,
             started_at, finished_at FROM runs WHERE id = ?1",
            params![id],
            run_from_row,
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn list_runs(&self, status: Option<RunStatus>, limit: usize) -> Result<Vec<Run>> {
        let conn = self.lock()?;
        let runs = if let Some(status) = status {
            let mut stmt = conn.prepare(
                "SELECT id, work_item_id, status, mood, created_at, updated_at,
                 started_at, finished_at FROM runs WHERE status = ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![status.as_str(), limit as i64], run_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        } else {
            let mut stmt = conn.prepare(
                "SELECT id, work_item_id, status, mood, created_at, updated_at,
                 started_at, finished_at FROM runs ORDER BY created_at DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![limit as i64], run_from_row)?;
            rows.collect::<rusqlite::Result<Vec<_>>>()?
        };
        Ok(runs)
    }

    // ── Run notes, verifications, commit requests ────────────────────────────

    /// Append a typed note event for a run; projection rows come from
    /// materialization.
    pub fn add_run_note(&self, run_id: &str, note_type: &str, body: Value) -> Result<i64> {
        self.append(
            note_type,
            serde_json::json!({"run_id": run_id, "body": body}),
            EventSource::Agent,
        )
    }

    pub fn run_notes(&self, run_id: &str) -> Result<Vec<RunNote>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, note_type, body, event_seq, created_at
             FROM run_notes WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let body: String = row.get(3)?;
                Ok(RunNote {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    note_type: row.get(2)?,
                    body: serde_json::from_str(&body).unwrap_or(Value::Null),
                    event_seq: row.get(4)?,
                    created_at: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    pub fn add_run_verification(&self, run_id: &str, attestation: Value) -> Result<i64> {
        self.append(
            "receipt.verifier.attestations",
            serde_json::json!({"run_id": run_id, "attestation": attestation}),
            EventSource::System,
        )
    }

    pub fn run_verifications(&self, run_id: &str) -> Result<Vec<RunVerification>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, attestation, event_seq, created_at
             FROM run_verifications WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let attestation: String = row.get(2)?;
                Ok(RunVerification {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    attestation: serde_json::from_str(&attestation).unwrap_or(Value::Null),
                    event_seq: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Emit a commit request: a `note.request.verify` event whose body is the
    /// full plan + attestation payload.
    pub fn add_commit_request(&self, run_id: &str, payload: Value) -> Result<i64> {
        self.append(
            "note.request.verify",
            serde_json::json!({"run_id": run_id, "body": payload}),
            EventSource::Agent,
        )
    }

    pub fn commit_requests(&self, run_id: &str) -> Result<Vec<CommitRequest>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, run_id, payload, event_seq, created_at
             FROM run_commit_requests WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt
            .query_map(params![run_id], |row| {
                let payload: String = row.get(2)?;
                Ok(CommitRequest {
                    id: row.get(0)?,
                    run_id: row.get(1)?,
                    payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
                    event_seq: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Checkpoints and sync state ───────────────────────────────────────────

    /// Record a git checkpoint: a `checkpoint` event plus a checkpoints row
    /// pinned to the log position.
    pub fn record_checkpoint(&self, commit_sha: &str, message: Option<&str>) -> Result<i64> {
        let seq = self.append(
            "checkpoint",
            serde_json::json!({"commit_sha": commit_sha, "message": message}),
            EventSource::System,
        )?;
        let last_external_seq = self.latest_external_seq()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO checkpoints (commit_sha, last_event_seq, last_external_seq, created_at, message)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![commit_sha, seq, last_external_seq, util::utc_now(), message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn last_checkpoint(&self) -> Result<Option<CheckpointRecord>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT id, commit_sha, last_event_seq, last_external_seq, created_at, message
             FROM checkpoints ORDER BY id DESC LIMIT 1",
            [],
            |row| {
                Ok(CheckpointRecord {
                    id: row.get(0)?,
                    commit_sha: row.get(1)?,
                    last_event_seq: row.get(2)?,
                    last_external_seq: row.get(3)?,
                    created_at: row.get(4)?,
                    message: row.get(5)?,
                })
            },
        )
        .optional()
        .map_err(StoreError::from)
    }

    pub fn get_sync_state(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        conn.query_row(
            "SELECT value FROM sync_state WHERE key = ?1",
            params![key],
            |r| r.get(0),
        )
        .optional()
        .map_err(StoreError::from)
    }

    /// Last-writer-wins, idempotent.
    pub fn set_sync_state(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    pub fn get_last_good_checkpoint(&self) -> Result<Option<String>> {
        self.get_sync_state(LAST_GOOD_CHECKPOINT_KEY)
    }

    /// Updated only after a `verified` adjudication.
    pub fn set_last_good_checkpoint(&self, commit_sha: &str) -> Result<()> {
        self.set_sync_state(LAST_GOOD_CHECKPOINT_KEY, commit_sha)
    }
}

// ─── Row mappers ─────────────────────────────────────────────────────────────

fn work_item_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkItem> {
    let required: Option<String> = row.get(3)?;
    let dependencies: Option<String> = row.get(5)?;
    let status: String = row.get(6)?;
    Ok(WorkItem {
        id: row.get(0)?,
        description: row.get(1)?,
        acceptance_criteria: row.get(2)?,
        required_verifiers: required
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        risk_tier: row.get(4)?,
        dependencies: dependencies
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
        status: status.parse().unwrap_or(WorkItemStatus::Pending),
        parent_id: row.get(7)?,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

fn run_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Run> {
    let status: String = row.get(2)?;
    let mood: Option<String> = row.get(3)?;
    Ok(Run {
        id: row.get(0)?,
        work_item_id: row.get(1)?,
        status: status.parse().unwrap_or(RunStatus::Created),
        mood: mood.and_then(|m| m.parse().ok()),
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        started_at: row.get(6)?,
        finished_at: row.get(7)?,
    })
}
