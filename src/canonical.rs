//! Canonical JSON encoding and checkpoint integrity digests.
//!
//! Checkpoints are hashed so a resume can detect truncation or tampering
//! before an orchestrator trusts the state inside. Hashing the literal
//! serialized bytes would make the digest depend on serde_json's (stable
//! but incidental) key order; canonicalizing first makes the digest a
//! property of the *data*, not of how it happened to be serialized.

use hmac::{Hmac, Mac};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Recursively sort object keys so two semantically-equal JSON values
/// serialize to identical bytes regardless of field-insertion order.
pub fn sort_json_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), sort_json_keys(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_json_keys).collect()),
        other => other.clone(),
    }
}

/// Serialize `value` to its canonical JSON byte representation: keys sorted
/// at every depth, no extraneous whitespace.
pub fn canonical_bytes<T: Serialize>(value: &T) -> Result<Vec<u8>, serde_json::Error> {
    let raw = serde_json::to_value(value)?;
    let sorted = sort_json_keys(&raw);
    serde_json::to_vec(&sorted)
}

/// SHA-256 digest of `value`'s canonical JSON encoding, as lowercase hex.
pub fn canonical_sha256_hex<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    use sha2::Digest;
    let bytes = canonical_bytes(value)?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// HMAC-SHA256 of `value`'s canonical JSON encoding under `key`, as lowercase
/// hex. Used when `DEBATE_CHECKPOINT_HMAC_KEY` is configured, giving
/// checkpoint integrity a tamper-detecting signature rather than a plain
/// content hash.
pub fn canonical_hmac_sha256_hex<T: Serialize>(
    value: &T,
    key: &[u8],
) -> Result<String, serde_json::Error> {
    let bytes = canonical_bytes(value)?;
    // HMAC accepts keys of any length (RFC 2104); construction cannot fail.
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts any key length");
    mac.update(&bytes);
    Ok(hex::encode(mac.finalize().into_bytes()))
}
