//! Deterministic content fingerprints used for change detection.
//!
//! The canonical form is compact JSON with object keys sorted at every depth,
//! so two values that differ only in construction order hash identically.
//! The digest is SHA-256, lower-case hex, always 64 characters.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub const LEN: usize = 64;

    /// Wraps a stored digest. Stored values are trusted; they were produced by [`fingerprint`].
    pub fn from_stored(digest: impl Into<String>) -> Self {
        Fingerprint(digest.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match n.as_f64() {
            // -0.0 and 0.0 are the same quantity
            Some(f) if n.is_f64() && f == 0.0 => out.push('0'),
            _ => out.push_str(&n.to_string()),
        },
        Value::String(s) => out.push_str(&Value::String(s.clone()).to_string()),
        Value::Array(items) => {
            out.push('[');
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String((*key).clone()).to_string());
                out.push(':');
                write_canonical(&map[*key], out);
            }
            out.push('}');
        }
    }
}

pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

pub fn fingerprint(value: &Value) -> Fingerprint {
    let mut hasher = Sha256::new();
    hasher.update(canonical_json(value).as_bytes());
    Fingerprint(format!("{:x}", hasher.finalize()))
}

/// Digest of raw bytes, used by the asset side-channel.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn key_order_does_not_matter() {
        let mut a = Map::new();
        a.insert("b".into(), json!(2));
        a.insert("a".into(), json!({"y": 1, "x": [1, 2]}));
        let mut b = Map::new();
        b.insert("a".into(), json!({"x": [1, 2], "y": 1}));
        b.insert("b".into(), json!(2));
        assert_eq!(fingerprint(&Value::Object(a)), fingerprint(&Value::Object(b)));
    }

    #[test]
    fn single_field_change_changes_digest() {
        let base = json!({"lines": [{"qty": 1.0}, {"qty": 2.0}]});
        let changed = json!({"lines": [{"qty": 1.0}, {"qty": 3.0}]});
        assert_ne!(fingerprint(&base), fingerprint(&changed));
    }

    #[test]
    fn line_order_is_significant() {
        let a = json!({"lines": [1, 2]});
        let b = json!({"lines": [2, 1]});
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn digest_is_fixed_length_hex() {
        let fp = fingerprint(&json!({}));
        assert_eq!(fp.as_str().len(), Fingerprint::LEN);
        assert!(fp.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(canonical_json(&json!({"b": -0.0, "a": "x"})), r#"{"a":"x","b":0}"#);
    }
}
