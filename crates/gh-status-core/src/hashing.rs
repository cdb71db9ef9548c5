//! Dedupe-key hashing for raw events.
//!
//! The dedupe key is a SHA-256 digest over the canonical encoding of the
//! fields that identify an event as "the same occurrence", independent of
//! which ingestion run observed it or in what order its JSON keys arrived.

use crate::error::GhStatusError;
use crate::payload::PayloadValue;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Compute the dedupe key for a raw event.
///
/// `source_event_id` and `repo_external_id` are included when present so
/// that two payload-identical events from different repositories, or two
/// unrelated events that happen to share a payload, never collide.
pub fn dedupe_key(
    source_system: &str,
    event_type: &str,
    source_event_id: Option<&str>,
    repo_external_id: Option<&str>,
    occurred_at: DateTime<Utc>,
    payload: &PayloadValue,
) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(source_system.as_bytes());
    hasher.update(b"\0");
    hasher.update(event_type.as_bytes());
    hasher.update(b"\0");
    hasher.update(source_event_id.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(repo_external_id.unwrap_or("").as_bytes());
    hasher.update(b"\0");
    hasher.update(occurred_at.to_rfc3339().as_bytes());
    hasher.update(b"\0");
    hasher.update(payload.canonical_bytes());
    hasher.finalize().into()
}

/// Render a dedupe key as lowercase hex for storage in text columns.
pub fn dedupe_key_hex(key: &[u8; 32]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}

/// Reject naive timestamps (no offset information). Callers are expected to
/// have already parsed the timestamp into a `DateTime<Utc>`; this validates
/// that the source string carried explicit offset information rather than
/// silently assuming UTC, matching the `INVALID_TIMESTAMP` error category.
pub fn require_explicit_offset(raw: &str) -> Result<DateTime<Utc>, GhStatusError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| GhStatusError::InvalidTimestamp(format!("{raw}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_fields_produce_identical_keys() {
        let payload = PayloadValue::from_json(&json!({"a": 1})).unwrap();
        let occurred_at = Utc::now();
        let k1 = dedupe_key("github", "push", Some("e1"), Some("r1"), occurred_at, &payload);
        let k2 = dedupe_key("github", "push", Some("e1"), Some("r1"), occurred_at, &payload);
        assert_eq!(k1, k2);
    }

    #[test]
    fn different_repositories_produce_different_keys() {
        let payload = PayloadValue::from_json(&json!({"a": 1})).unwrap();
        let occurred_at = Utc::now();
        let k1 = dedupe_key("github", "push", Some("e1"), Some("r1"), occurred_at, &payload);
        let k2 = dedupe_key("github", "push", Some("e1"), Some("r2"), occurred_at, &payload);
        assert_ne!(k1, k2);
    }

    #[test]
    fn naive_timestamp_is_rejected() {
        let err = require_explicit_offset("2024-01-01T12:00:00").unwrap_err();
        assert!(matches!(err, GhStatusError::InvalidTimestamp(_)));
    }

    #[test]
    fn offset_timestamp_is_accepted() {
        require_explicit_offset("2024-01-01T12:00:00Z").unwrap();
    }
}
