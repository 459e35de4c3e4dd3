//! Canonical JSON: sorted keys, no insignificant whitespace.
//!
//! Every hash and signature in the ledger is computed over this exact
//! encoding. `serde_json::Value`'s default `Map` is insertion-ordered, so we
//! re-key through a `BTreeMap` before serializing to get a deterministic byte
//! string regardless of how the value was built.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

fn sort_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            serde_json::to_value(sorted).unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` with lexicographically sorted object keys and no
/// insignificant whitespace. This is the single source of truth for
/// "canonical JSON" referenced throughout the ledger.
pub fn to_canonical_json<T: Serialize>(value: &T) -> String {
    let raw = serde_json::to_value(value).unwrap_or(Value::Null);
    let sorted = sort_value(&raw);
    // serde_json's Value serializer never emits insignificant whitespace.
    serde_json::to_string(&sorted).unwrap_or_else(|_| "null".to_string())
}

/// SHA-256 of the canonical JSON encoding of `value`, hex-encoded.
pub fn canonical_hash<T: Serialize>(value: &T) -> String {
    let encoded = to_canonical_json(value);
    let mut hasher = Sha256::new();
    hasher.update(encoded.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 over a raw byte string (used for content fingerprints that are
/// not themselves JSON, e.g. `"<justification>|<evidence>"`).
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}
