//! Canonical event contract.
//!
//! Event types are dotted lower-case strings drawn from the v0 vocabulary
//! below. Legacy uppercase/underscored names still arrive from older clients
//! and are normalized on ingress; normalization is idempotent.

/// Stream name used by an external mirror.
pub const CHOIR_STREAM: &str = "CHOIR";

/// Subject root for mirrored events.
pub const CHOIR_SUBJECT_ROOT: &str = "choiros";

/// Canonical v0 event types (dot-delimited, lower-case).
pub const EVENT_TYPES_V0: &[&str] = &[
    // Core events
    "file.write",
    "file.delete",
    "file.move",
    "message",
    "tool.call",
    "tool.result",
    "window.open",
    "window.close",
    "checkpoint",
    "undo",
    // Notes (AHDB-typed telemetry)
    "note.observation",
    "note.hypothesis",
    "note.hyperthesis",
    "note.conjecture",
    "note.status",
    "note.request.help",
    "note.request.verify",
    // Receipts (capabilities + verification)
    "receipt.read",
    "receipt.patch",
    "receipt.verifier",
    "receipt.net",
    "receipt.db",
    "receipt.export",
    "receipt.publish",
    "receipt.context.footprint",
    "receipt.verifier.results",
    "receipt.verifier.attestations",
    "receipt.discrepancy.report",
    "receipt.commit",
    "receipt.ahdb.delta",
    "receipt.evidence.set.hash",
    "receipt.retrieval",
    "receipt.conjecture.set",
    "receipt.policy.decision.tokens",
    "receipt.security.attestations",
    "receipt.hyperthesis.delta",
    "receipt.expansion.plan",
    "receipt.projection.rebuild",
    "receipt.attack.report",
    "receipt.disclosure.objects",
    "receipt.mitigation.proposals",
    "receipt.preference.decision",
    "receipt.timeout",
];

/// Legacy names that map to a canonical type directly.
const LEGACY_EVENT_TYPE_MAP: &[(&str, &str)] = &[
    ("FILE_WRITE", "file.write"),
    ("FILE_DELETE", "file.delete"),
    ("FILE_MOVE", "file.move"),
    ("CONVERSATION_MESSAGE", "message"),
    ("TOOL_CALL", "tool.call"),
    ("TOOL_RESULT", "tool.result"),
    ("WINDOW_OPEN", "window.open"),
    ("WINDOW_CLOSE", "window.close"),
    ("CHECKPOINT", "checkpoint"),
    ("UNDO", "undo"),
];

fn normalize_segments(value: &str) -> String {
    value.trim().to_lowercase().replace(['/', '_'], ".")
}

/// Build the mirror subject for an event: `choiros.{user_id}.{source}.{type}`.
pub fn build_subject(user_id: &str, source: &str, event_type: &str) -> String {
    format!("{CHOIR_SUBJECT_ROOT}.{user_id}.{source}.{event_type}")
}

/// Normalize an event type to its canonical dotted lower-case form.
///
/// Handles the fixed legacy map, `RECEIPT/…` prefixes and `…_RECEIPT`
/// suffixes; everything else is lowercased with `/` and `_` folded to `.`.
pub fn normalize_event_type(event_type: &str) -> String {
    let raw = event_type.trim();
    if raw.is_empty() {
        return String::new();
    }
    let upper = raw.to_uppercase();
    for (legacy, canonical) in LEGACY_EVENT_TYPE_MAP {
        if upper == *legacy {
            return (*canonical).to_string();
        }
    }
    if upper.starts_with("RECEIPT/") {
        let suffix = raw.splitn(2, '/').nth(1).unwrap_or_default();
        return format!("receipt.{}", normalize_segments(suffix));
    }
    if upper.ends_with("_RECEIPT") && upper != "RECEIPT" {
        let suffix = &raw[..raw.len() - "_RECEIPT".len()];
        return format!("receipt.{}", normalize_segments(suffix));
    }
    normalize_segments(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_types_pass_through() {
        for t in EVENT_TYPES_V0 {
            assert_eq!(normalize_event_type(t), *t);
        }
    }

    #[test]
    fn legacy_names_map_to_canonical() {
        assert_eq!(normalize_event_type("FILE_WRITE"), "file.write");
        assert_eq!(normalize_event_type("CONVERSATION_MESSAGE"), "message");
        assert_eq!(normalize_event_type("TOOL_CALL"), "tool.call");
    }

    #[test]
    fn receipt_prefix_and_suffix_forms() {
        assert_eq!(normalize_event_type("RECEIPT/AHDB_DELTA"), "receipt.ahdb.delta");
        assert_eq!(normalize_event_type("VERIFIER_RECEIPT"), "receipt.verifier");
    }

    #[test]
    fn normalization_is_idempotent() {
        for raw in ["FILE_WRITE", "RECEIPT/AHDB_DELTA", "Note/Status", "tool.call"] {
            let once = normalize_event_type(raw);
            assert_eq!(normalize_event_type(&once), once);
        }
    }

    #[test]
    fn subject_format() {
        assert_eq!(
            build_subject("local", "agent", "file.write"),
            "choiros.local.agent.file.write"
        );
    }
}
