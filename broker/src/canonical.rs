//! Deterministic JSON canonicalization and hashing, shared by the signed
//! registry store (C3) and the resource-authorization challenge binding (C11).
//!
//! Canonical form: round-trip through `serde_json::Value`, then recursively
//! rebuild with object keys sorted lexicographically. Arrays and primitives
//! serialize through `serde_json::to_string`, which already has no ambiguity
//! once key order is fixed.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

pub fn canonicalize<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(value)?;
    Ok(canonicalize_value(&value))
}

fn canonicalize_value(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let parts: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonicalize_value(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", parts.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonicalize_value).collect();
            format!("[{}]", parts.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

pub fn hash_canonical<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let canon = canonicalize(value)?;
    Ok(sha256_hex(canon.as_bytes()))
}

/// HMAC-SHA256 over the canonical form of `value`, keyed by `key`. Used to
/// sign persisted files at rest.
pub fn hmac_canonical<T: Serialize>(key: &[u8], value: &T) -> Result<String, serde_json::Error> {
    let canon = canonicalize(value)?;
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(canon.as_bytes());
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Constant-time comparison of two signatures (hex strings compared as bytes).
pub fn signatures_match(expected: &str, actual: &str) -> bool {
    use subtle_compare::ct_eq;
    ct_eq(expected.as_bytes(), actual.as_bytes())
}

/// Minimal constant-time byte comparison, kept local so this module has no
/// dependency on an external constant-time-compare crate for one function.
mod subtle_compare {
    pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
        if a.len() != b.len() {
            return false;
        }
        let mut diff = 0u8;
        for (x, y) in a.iter().zip(b.iter()) {
            diff |= x ^ y;
        }
        diff == 0
    }
}
