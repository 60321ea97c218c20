//! Canonical content hashing.
//!
//! Objects are re-emitted with sorted keys and compact separators before
//! hashing, so logically equal content always yields the same digest
//! regardless of how the payload map was built.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// 256-bit SHA-256 digest of a signal's logical content.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Hash the canonical form of a JSON value.
    pub fn of_value(value: &Value) -> Self {
        let mut buf = String::new();
        write_canonical(value, &mut buf);
        Self::of_bytes(buf.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(raw: &str) -> Option<Self> {
        let bytes = hex::decode(raw).ok()?;
        let arr: [u8; 32] = bytes.try_into().ok()?;
        Some(Self(arr))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..16])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ContentHash::from_hex(&raw)
            .ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// Stable serialization: sorted object keys, no whitespace.
pub fn canonical_json(value: &Value) -> String {
    let mut buf = String::new();
    write_canonical(value, &mut buf);
    buf
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                // Value::String serialization never fails.
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Map};

    #[test]
    fn test_key_order_does_not_matter() {
        let mut a = Map::new();
        a.insert("zeta".into(), json!(1));
        a.insert("alpha".into(), json!({"y": [1, 2], "x": null}));
        let mut b = Map::new();
        b.insert("alpha".into(), json!({"x": null, "y": [1, 2]}));
        b.insert("zeta".into(), json!(1));

        assert_eq!(
            ContentHash::of_value(&Value::Object(a)),
            ContentHash::of_value(&Value::Object(b))
        );
    }

    #[test]
    fn test_canonical_form() {
        let v = json!({"b": "two", "a": [3, {"d": true, "c": 1.5}]});
        assert_eq!(canonical_json(&v), r#"{"a":[3,{"c":1.5,"d":true}],"b":"two"}"#);
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(
            ContentHash::of_value(&json!([1, 2])),
            ContentHash::of_value(&json!([2, 1]))
        );
    }

    #[test]
    fn test_hex_round_trip() {
        let h = ContentHash::of_bytes(b"sisas");
        assert_eq!(h.to_hex().len(), 64);
        assert_eq!(ContentHash::from_hex(&h.to_hex()), Some(h));
        assert_eq!(ContentHash::from_hex("zz"), None);
    }
}
