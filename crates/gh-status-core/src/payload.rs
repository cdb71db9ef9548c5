//! Canonical payload representation.
//!
//! Source-system event payloads arrive as loosely typed JSON. Before a
//! payload can be hashed for dedup or stored it is normalised into
//! [`PayloadValue`], a closed set of kinds with a single canonical
//! ordering. Map keys live in a `BTreeMap`, so serialisation order is
//! always sorted, and date-like strings are parsed into `DateTime<Utc>`
//! so that two timezone-equivalent instants normalise to the same value.

use crate::error::GhStatusError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A normalised, hashable event payload value.
///
/// Variants mirror JSON's shape with one addition: [`PayloadValue::Timestamp`]
/// for strings that parse as RFC 3339, so that two equivalent instants in
/// different offsets produce identical canonical bytes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    /// JSON null.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// An integral JSON number.
    Integer(i64),
    /// A floating point JSON number.
    Float(f64),
    /// A plain string that did not parse as a timestamp.
    String(String),
    /// A string that parsed as an RFC 3339 timestamp, normalised to UTC.
    Timestamp(DateTime<Utc>),
    /// An ordered sequence of values.
    Array(Vec<PayloadValue>),
    /// A mapping, always serialised in sorted key order.
    Map(BTreeMap<String, PayloadValue>),
}

impl PayloadValue {
    /// Normalise an arbitrary `serde_json::Value` into a [`PayloadValue`].
    ///
    /// Fails with [`GhStatusError::UnsupportedPayloadType`] for JSON numbers
    /// that cannot be represented as either `i64` or `f64` (this can only
    /// happen for numbers exceeding `f64` precision when the `arbitrary_precision`
    /// feature is enabled upstream; guarded here defensively).
    pub fn from_json(value: &serde_json::Value) -> Result<Self, GhStatusError> {
        match value {
            serde_json::Value::Null => Ok(PayloadValue::Null),
            serde_json::Value::Bool(b) => Ok(PayloadValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(PayloadValue::Integer(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(PayloadValue::Float(f))
                } else {
                    Err(GhStatusError::UnsupportedPayloadType(format!(
                        "numeric value {n} has no i64/f64 representation"
                    )))
                }
            }
            serde_json::Value::String(s) => Ok(parse_string(s)),
            serde_json::Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(PayloadValue::from_json(item)?);
                }
                Ok(PayloadValue::Array(out))
            }
            serde_json::Value::Object(map) => {
                let mut out = BTreeMap::new();
                for (k, v) in map {
                    out.insert(k.clone(), PayloadValue::from_json(v)?);
                }
                Ok(PayloadValue::Map(out))
            }
        }
    }

    /// Canonical bytes suitable for hashing. Serialisation order of
    /// `PayloadValue::Map` is guaranteed sorted by the underlying `BTreeMap`.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        serde_json::to_vec(self).expect("PayloadValue always serialises")
    }

    /// Look up a field by name if this value is a `Map`.
    pub fn get(&self, key: &str) -> Option<&PayloadValue> {
        match self {
            PayloadValue::Map(map) => map.get(key),
            _ => None,
        }
    }

    /// Borrow as a plain string, if this value is a `String`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            PayloadValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Borrow as a timestamp, if this value is a `Timestamp`.
    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            PayloadValue::Timestamp(dt) => Some(*dt),
            _ => None,
        }
    }

    /// Read as an `i64`, if this value is numeric.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            PayloadValue::Integer(i) => Some(*i),
            PayloadValue::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    /// Borrow as a slice of values, if this value is an `Array`.
    pub fn as_array(&self) -> Option<&[PayloadValue]> {
        match self {
            PayloadValue::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

fn parse_string(s: &str) -> PayloadValue {
    match DateTime::parse_from_rfc3339(s) {
        Ok(dt) => PayloadValue::Timestamp(dt.with_timezone(&Utc)),
        Err(_) => PayloadValue::String(s.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn map_keys_canonicalise_in_sorted_order() {
        let a = PayloadValue::from_json(&json!({"b": 1, "a": 2})).unwrap();
        let b = PayloadValue::from_json(&json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn equivalent_timestamps_in_different_offsets_canonicalise_equal() {
        let a = PayloadValue::from_json(&json!("2024-01-01T12:00:00Z")).unwrap();
        let b = PayloadValue::from_json(&json!("2024-01-01T13:00:00+01:00")).unwrap();
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
    }

    #[test]
    fn plain_strings_are_not_mistaken_for_timestamps() {
        let v = PayloadValue::from_json(&json!("hello world")).unwrap();
        assert!(matches!(v, PayloadValue::String(_)));
    }
}
