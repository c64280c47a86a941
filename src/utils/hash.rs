//! Content hashing for snapshots.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonical JSON encoding: object keys sorted at every level.
///
/// An absent value encodes to no bytes, so it never collides with `null`.
pub fn canonical_bytes(value: &Option<Value>) -> Vec<u8> {
    match value {
        // Serializing a Value cannot fail.
        Some(value) => serde_json::to_vec(&canonicalize(value)).unwrap_or_default(),
        None => Vec::new(),
    }
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = serde_json::Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Lowercase hex SHA-256 of the canonical encoding.
pub fn checksum(value: &Option<Value>) -> String {
    sha256_hex(&canonical_bytes(value))
}

/// Lowercase hex SHA-256 of raw bytes.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
