//! Event model: the append-only log's row type, its canonical vocabulary and
//! the best-effort external mirror.

pub mod contract;
pub mod mirror;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSource {
    User,
    Agent,
    System,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::User => "user",
            EventSource::Agent => "agent",
            EventSource::System => "system",
        }
    }
}

impl std::str::FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(EventSource::User),
            "agent" => Ok(EventSource::Agent),
            "system" => Ok(EventSource::System),
            other => Err(format!("unknown event source '{other}'")),
        }
    }
}

/// One row of the append-only log.
///
/// `seq` is the local monotonic sequence number; `external_seq` is set only
/// when an attached mirror acknowledged the publish.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub seq: i64,
    pub external_seq: Option<i64>,
    pub timestamp: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: EventSource,
    pub payload: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_round_trips_through_str() {
        for s in [EventSource::User, EventSource::Agent, EventSource::System] {
            let parsed: EventSource = s.as_str().parse().unwrap();
            assert_eq!(parsed, s);
        }
    }

    #[test]
    fn event_serializes_with_type_key() {
        let ev = Event {
            seq: 1,
            external_seq: None,
            timestamp: "2026-01-01T00:00:00.000000Z".to_string(),
            event_type: "file.write".to_string(),
            source: EventSource::Agent,
            payload: serde_json::json!({"path": "src/a.txt"}),
        };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["type"], "file.write");
        assert_eq!(json["source"], "agent");
    }
}
