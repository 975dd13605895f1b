//! Cache key derivation.
//!
//! Keys have the form `{namespace}:{operation}:{digest}` where the digest is the
//! SHA-256 of a canonical JSON rendering of the parameters. Every object, whether
//! a struct or a map, is rendered with its keys sorted, so structurally equal
//! parameters always produce the same key.

use crate::error::VidsyncError;
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

pub const KEY_DELIMITER: char = ':';

/// Derive the cache key for `operation` called with `params`.
pub fn derive_key<P>(namespace: &str, operation: &str, params: &P) -> Result<String, VidsyncError>
where
    P: Serialize + ?Sized,
{
    let canonical = canonical_bytes(params)?;

    Ok(format!(
        "{ns}{d}{op}{d}{digest}",
        ns = namespace,
        op = encode_segment(operation),
        digest = compute_sha256_hex(&canonical),
        d = KEY_DELIMITER,
    ))
}

/// Glob pattern matching every key of a namespace, or of one operation within it.
pub fn scope_pattern(namespace: &str, scope: Option<&str>) -> String {
    match scope {
        Some(op) if !op.is_empty() => format!(
            "{}{d}{}{d}*",
            namespace,
            encode_segment(op),
            d = KEY_DELIMITER
        ),
        _ => format!("{}{}*", namespace, KEY_DELIMITER),
    }
}

fn canonical_bytes<P: Serialize + ?Sized>(params: &P) -> Result<Vec<u8>, VidsyncError> {
    // Maps with non-string keys are rejected here.
    let value = serde_json::to_value(params)
        .map_err(|e| VidsyncError::EncodingFailed(format!("cache params: {}", e)))?;
    serde_json::to_vec(&canonicalize(value))
        .map_err(|e| VidsyncError::EncodingFailed(format!("cache params: {}", e)))
}

/// Rebuild objects with sorted keys, independent of whether `serde_json` keeps
/// insertion order in this build.
fn canonicalize(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, canonicalize(v)))
                    .collect::<Map<String, Value>>(),
            )
        }
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        other => other,
    }
}

/// URL-encode a key segment so it cannot contain the delimiter or glob characters.
fn encode_segment(s: &str) -> String {
    urlencoding::encode(s).into_owned()
}

fn compute_sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
