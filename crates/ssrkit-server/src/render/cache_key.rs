//! Deterministic cache keys for rendered fragments.
//!
//! The payload is walked in a canonical order (object keys sorted) and
//! every token is fed to SHA-256 with a type tag and a length prefix, so
//! structurally different payloads cannot collide by concatenation
//! (`["ab"]` vs `["a", "b"]`) or by type (`"1"` vs `1`).

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use ssrkit_common::Result;

/// Hex SHA-256 key for `fragment` rendered with `payload`.
///
/// # Errors
///
/// `SsrError::JsonSerialization` when the payload has no JSON
/// representation (for example a map with non-string keys).
pub fn cache_key<T: Serialize + ?Sized>(fragment: &str, payload: &T) -> Result<String> {
    let value = serde_json::to_value(payload)?;
    let mut hasher = Sha256::new();
    feed(&mut hasher, b'f', fragment.as_bytes());
    fold_value(&mut hasher, &value);
    Ok(hex::encode(hasher.finalize()))
}

fn feed(hasher: &mut Sha256, tag: u8, bytes: &[u8]) {
    hasher.update([tag]);
    hasher.update((bytes.len() as u64).to_le_bytes());
    hasher.update(bytes);
}

fn fold_value(hasher: &mut Sha256, value: &Value) {
    match value {
        Value::Null => feed(hasher, b'n', b"nil"),
        Value::Bool(b) => feed(hasher, b'b', if *b { b"true" } else { b"false" }),
        Value::Number(n) => feed(hasher, b'd', n.to_string().as_bytes()),
        Value::String(s) => feed(hasher, b's', s.as_bytes()),
        Value::Array(items) => {
            feed(hasher, b'a', &(items.len() as u64).to_le_bytes());
            for item in items {
                fold_value(hasher, item);
            }
        }
        Value::Object(map) => {
            feed(hasher, b'o', &(map.len() as u64).to_le_bytes());
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                feed(hasher, b'k', key.as_bytes());
                fold_value(hasher, &map[key]);
            }
        }
    }
}
