//! Shared utility functions for Strata crates

use camino::Utf8PathBuf;
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 of a byte slice
pub fn sha256_hex(data: &[u8]) -> String {
    format!("{:x}", Sha256::digest(data))
}

/// Serialise a value with object keys sorted at every level
pub fn canonical_json(value: &Value) -> String {
    fn canonicalize(value: &Value) -> Value {
        match value {
            Value::Object(map) => {
                let mut entries: Vec<(&String, &Value)> = map.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                Value::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), canonicalize(v)))
                        .collect(),
                )
            }
            Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
            other => other.clone(),
        }
    }
    canonicalize(value).to_string()
}

/// SHA-256 over the canonical JSON of a value
pub fn json_digest(value: &Value) -> String {
    sha256_hex(canonical_json(value).as_bytes())
}

/// Default directory for the on-disk blueprint cache
///
/// Prefers the user's cache directory and falls back to the system temp dir.
pub fn default_cache_dir() -> Utf8PathBuf {
    let base = dirs::cache_dir().unwrap_or_else(std::env::temp_dir);
    Utf8PathBuf::from_path_buf(base.join("strata").join("blueprints"))
        .unwrap_or_else(|_| Utf8PathBuf::from("/tmp/strata/blueprints"))
}
