//! Canonical JSON for artifact payloads
//!
//! Artifacts are written with recursively sorted object keys and no
//! whitespace so that identical fitted state always yields identical bytes
//! and therefore an identical BLAKE3 digest.

use crate::errors::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));

            let mut sorted = Map::with_capacity(entries.len());
            for (key, val) in entries {
                sorted.insert(key, canonicalize(val));
            }
            Value::Object(sorted)
        }
        Value::Array(elements) => Value::Array(elements.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// Serialize to canonical JSON (sorted keys, compact)
pub fn to_canonical_json<T: Serialize>(value: &T) -> Result<String> {
    let canonical = canonicalize(serde_json::to_value(value)?);
    Ok(serde_json::to_string(&canonical)?)
}

pub fn to_canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(to_canonical_json(value)?.into_bytes())
}

pub fn from_json_slice<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(serde_json::from_slice(bytes)?)
}

/// BLAKE3 hex digest of raw bytes
pub fn blake3_hex(bytes: &[u8]) -> String {
    hex::encode(blake3::hash(bytes).as_bytes())
}

/// BLAKE3 hex digest of the canonical JSON form
pub fn hash_canonical_hex<T: Serialize>(value: &T) -> Result<String> {
    Ok(blake3_hex(to_canonical_json(value)?.as_bytes()))
}
