//! Projection materializer.
//!
//! One dispatch function decides which projection tables an event updates.
//! This is the *only* writer of projection tables: the append path and the
//! rebuild path both route through [`materialize`], so replaying the log
//! reproduces projection state exactly. Timestamps written here come from the
//! event row, never from the wall clock.

use rusqlite::{Connection, params};
use serde_json::Value;

use crate::events::contract::normalize_event_type;

/// Apply one event to the projection tables.
pub fn materialize(
    conn: &Connection,
    event_type: &str,
    payload: &Value,
    timestamp: &str,
    event_seq: i64,
) -> rusqlite::Result<()> {
    match event_type {
        "file.write" => {
            conn.execute(
                "INSERT OR REPLACE INTO files (path, content_hash, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![
                    payload.get("path").and_then(Value::as_str),
                    payload.get("content_hash").and_then(Value::as_str),
                    timestamp
                ],
            )?;
        }
        "file.delete" => {
            conn.execute(
                "DELETE FROM files WHERE path = ?1",
                params![payload.get("path").and_then(Value::as_str)],
            )?;
        }
        "message" => {
            let conversation_id = payload.get("conversation_id").and_then(Value::as_i64);
            if let Some(cid) = conversation_id {
                ensure_conversation(conn, cid, timestamp)?;
            }
            conn.execute(
                "INSERT INTO messages (conversation_id, event_seq, role, content, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    conversation_id,
                    event_seq,
                    payload.get("role").and_then(Value::as_str),
                    payload.get("content").and_then(Value::as_str),
                    timestamp
                ],
            )?;
            if let Some(cid) = conversation_id {
                conn.execute(
                    "UPDATE conversations SET last_seq = ?1 WHERE id = ?2",
                    params![event_seq, cid],
                )?;
            }
        }
        "tool.call" => {
            let conversation_id = payload.get("conversation_id").and_then(Value::as_i64);
            if let Some(cid) = conversation_id {
                ensure_conversation(conn, cid, timestamp)?;
            }
            conn.execute(
                "INSERT INTO tool_calls
                 (event_seq, conversation_id, tool_name, tool_input, tool_result, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event_seq,
                    conversation_id,
                    payload.get("tool_name").and_then(Value::as_str),
                    payload
                        .get("tool_input")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "null".to_string()),
                    payload
                        .get("tool_result")
                        .map(|v| v.to_string())
                        .unwrap_or_else(|| "null".to_string()),
                    timestamp
                ],
            )?;
        }
        "receipt.ahdb.delta" => {
            if let Some(delta) = extract_ahdb_delta(payload) {
                apply_ahdb_delta(conn, &delta, timestamp, event_seq)?;
            }
        }
        "receipt.verifier.attestations" => {
            let run_id = payload.get("run_id").and_then(Value::as_str);
            let attestation = payload.get("attestation");
            if let (Some(run_id), Some(attestation)) = (run_id, attestation) {
                conn.execute(
                    "INSERT INTO run_verifications (run_id, attestation, event_seq, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![run_id, attestation.to_string(), event_seq, timestamp],
                )?;
            }
        }
        t if t.starts_with("note.") => {
            let run_id = payload.get("run_id").and_then(Value::as_str);
            let body = payload.get("body").unwrap_or(payload);
            if let Some(run_id) = run_id {
                conn.execute(
                    "INSERT INTO run_notes (run_id, note_type, body, event_seq, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![run_id, t, body.to_string(), event_seq, timestamp],
                )?;
                if t == "note.request.verify" {
                    conn.execute(
                        "INSERT INTO run_commit_requests (run_id, payload, event_seq, created_at)
                         VALUES (?1, ?2, ?3, ?4)",
                        params![run_id, body.to_string(), event_seq, timestamp],
                    )?;
                }
            }
        }
        _ => {}
    }
    Ok(())
}

/// Extract the AHDB delta from a `receipt.ahdb.delta` payload.
///
/// Accepts `delta`, `ahdb_delta` or `ahdb` wrapper keys, or bare top-level
/// slot keys for older emitters.
pub fn extract_ahdb_delta(payload: &Value) -> Option<Value> {
    let obj = payload.as_object()?;
    for key in ["delta", "ahdb_delta", "ahdb"] {
        if let Some(v) = obj.get(key) {
            if v.is_object() {
                return Some(v.clone());
            }
        }
    }
    let slots = ["assert", "hypothesize", "drive", "believe"];
    if slots.iter().any(|k| obj.contains_key(*k)) {
        let mut delta = serde_json::Map::new();
        for k in slots {
            if let Some(v) = obj.get(k) {
                delta.insert(k.to_string(), v.clone());
            }
        }
        return Some(Value::Object(delta));
    }
    None
}

fn apply_ahdb_delta(
    conn: &Connection,
    delta: &Value,
    timestamp: &str,
    event_seq: i64,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO ahdb_deltas (event_seq, delta, timestamp) VALUES (?1, ?2, ?3)",
        params![event_seq, delta.to_string(), timestamp],
    )?;
    if let Some(obj) = delta.as_object() {
        // Last writer wins per slot; replay order makes the rebuild converge.
        for (key, value) in obj {
            conn.execute(
                "INSERT OR REPLACE INTO ahdb_state (key, value, updated_at)
                 VALUES (?1, ?2, ?3)",
                params![key, value.to_string(), timestamp],
            )?;
        }
    }
    Ok(())
}

fn ensure_conversation(conn: &Connection, id: i64, started_at: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO conversations (id, started_at, last_seq) VALUES (?1, ?2, NULL)",
        params![id, started_at],
    )?;
    Ok(())
}

/// Normalize and materialize, used by the replay path where raw rows may
/// still carry legacy type names.
pub fn materialize_normalized(
    conn: &Connection,
    raw_type: &str,
    payload: &Value,
    timestamp: &str,
    event_seq: i64,
) -> rusqlite::Result<()> {
    let event_type = normalize_event_type(raw_type);
    materialize(conn, &event_type, payload, timestamp, event_seq)
}
