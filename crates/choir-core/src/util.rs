//! Small shared helpers: canonical JSON encoding and SHA-256 hashing.
//!
//! Plan ids, artifact hashes, report hashes and attestation hashes must all
//! be reproducible from their inputs, so every hash in the crate goes through
//! the same two functions.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Encode a JSON value canonically: object keys sorted, compact separators,
/// UTF-8.
///
/// `serde_json::Map` is backed by a `BTreeMap` (the `preserve_order` feature
/// is not enabled anywhere in this workspace), so key ordering is already
/// lexicographic; compact separators are serde_json's default.
pub fn canonical_json(value: &Value) -> String {
    value.to_string()
}

/// Hex-encoded SHA-256 of a byte slice.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Hex-encoded SHA-256 of the canonical encoding of a JSON value.
pub fn hash_json(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// UTC timestamp in RFC 3339 with microsecond precision and a `Z` suffix.
///
/// All persisted timestamps use this format so that projection rebuilds and
/// content-addressed reports compare byte-for-byte.
pub fn utc_now() -> String {
    chrono::Utc::now()
        .to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn canonical_json_sorts_keys() {
        let v = json!({"b": 1, "a": {"d": 2, "c": 3}});
        assert_eq!(canonical_json(&v), r#"{"a":{"c":3,"d":2},"b":1}"#);
    }

    #[test]
    fn sha256_matches_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn hash_json_is_stable_across_key_order() {
        let a = json!({"x": 1, "y": [2, 3]});
        let b = json!({"y": [2, 3], "x": 1});
        assert_eq!(hash_json(&a), hash_json(&b));
    }

    #[test]
    fn utc_now_has_z_suffix() {
        assert!(utc_now().ends_with('Z'));
    }
}
