//! Best-effort external mirror for appended events.
//!
//! The local append is the durability boundary; mirroring is advisory. A
//! failed publish is logged and recorded as `external_seq = None`, never
//! surfaced to the appender.

use tokio::sync::broadcast;

use super::Event;
use super::contract::build_subject;

/// Error from a mirror publish. Always recoverable.
#[derive(Debug, thiserror::Error)]
#[error("mirror publish failed: {0}")]
pub struct MirrorError(pub String);

/// Receives every appended event, best-effort.
///
/// Implementations must not block the appender for longer than a channel
/// send; a remote stream publisher should buffer internally and acknowledge
/// asynchronously (in which case it returns `None` for the external seq).
pub trait EventMirror: Send + Sync {
    /// Publish one event. Returns the external sequence number if the mirror
    /// assigns one synchronously.
    fn publish(&self, subject: &str, event: &Event) -> Result<Option<i64>, MirrorError>;
}

const DEFAULT_CAPACITY: usize = 1024;

/// A mirrored event paired with its subject, as delivered to subscribers.
#[derive(Debug, Clone)]
pub struct MirroredEvent {
    pub subject: String,
    pub event: Event,
}

/// In-process mirror backed by a `tokio::sync::broadcast` channel.
///
/// Feeds WebSocket subscribers and tests. Assigns no external sequence
/// numbers; a durable stream behind the same trait would.
pub struct BroadcastMirror {
    sender: broadcast::Sender<MirroredEvent>,
}

impl BroadcastMirror {
    /// Create with the default channel capacity (1024).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create with an explicit channel capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MirroredEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastMirror {
    fn default() -> Self {
        Self::new()
    }
}

impl EventMirror for BroadcastMirror {
    fn publish(&self, subject: &str, event: &Event) -> Result<Option<i64>, MirrorError> {
        // `send` fails only when no receiver exists, which is not an error
        // for a best-effort mirror.
        let _ = self.sender.send(MirroredEvent {
            subject: subject.to_string(),
            event: event.clone(),
        });
        Ok(None)
    }
}

/// Build the subject for an event on behalf of a mirror.
pub fn subject_for(user_id: &str, event: &Event) -> String {
    build_subject(user_id, event.source.as_str(), &event.event_type)
}
