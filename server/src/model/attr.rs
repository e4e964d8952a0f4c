//! Attribute values.
//!
//! OTLP `AnyValue` payloads are heterogeneous at runtime; internally they are
//! a tagged sum. On the wire the variants map to natural JSON, with byte
//! payloads carried as a single-key `{"@bytes": "<base64>"}` object so they
//! survive a round trip through the document store.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

/// Key marking a JSON object as an encoded byte payload.
const BYTES_KEY: &str = "@bytes";

/// An attribute value: scalar, opaque bytes, array, or nested map.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Str(String),
    Bool(bool),
    Int(i64),
    Double(f64),
    Bytes(Vec<u8>),
    Array(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
}

impl AttrValue {
    /// Convert to the wire JSON representation.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Str(s) => serde_json::Value::String(s.clone()),
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Int(i) => serde_json::Value::Number((*i).into()),
            Self::Double(d) => serde_json::Number::from_f64(*d)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Bytes(b) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(b);
                serde_json::json!({ BYTES_KEY: encoded })
            }
            Self::Array(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Build from wire JSON. Never fails: unknown shapes degrade to their
    /// closest variant (`null` becomes an empty string).
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Str(String::new()),
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| Self::Double(n.as_f64().unwrap_or(0.0)), Self::Int),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Self::Array(items.iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => {
                if map.len() == 1 {
                    if let Some(serde_json::Value::String(encoded)) = map.get(BYTES_KEY) {
                        if let Ok(bytes) =
                            base64::engine::general_purpose::STANDARD.decode(encoded)
                        {
                            return Self::Bytes(bytes);
                        }
                    }
                }
                Self::Map(
                    map.iter()
                        .map(|(k, v)| (k.clone(), Self::from_json(v)))
                        .collect(),
                )
            }
        }
    }

    /// Numeric view of the value, accepting numeric strings.
    ///
    /// Non-numeric values return `None` and are treated as missing by the
    /// cost attributor.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(i) => Some(*i as f64),
            Self::Double(d) => Some(*d),
            Self::Str(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// String view of the value, if it is a string.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for AttrValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AttrValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Ok(Self::from_json(&value))
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Str(s.to_owned())
    }
}

impl From<i64> for AttrValue {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}

impl From<f64> for AttrValue {
    fn from(d: f64) -> Self {
        Self::Double(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalars_round_trip() {
        for value in [
            AttrValue::Str("hello".into()),
            AttrValue::Bool(true),
            AttrValue::Int(-42),
            AttrValue::Double(0.25),
        ] {
            let json = serde_json::to_value(&value).unwrap();
            let back: AttrValue = serde_json::from_value(json).unwrap();
            assert_eq!(back, value);
        }
    }

    #[test]
    fn bytes_round_trip_through_marker_object() {
        let value = AttrValue::Bytes(vec![0, 159, 146, 150]);
        let json = serde_json::to_value(&value).unwrap();
        assert!(json.get(BYTES_KEY).is_some());
        let back: AttrValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn nested_structures_round_trip() {
        let mut inner = BTreeMap::new();
        inner.insert("k".to_owned(), AttrValue::Int(1));
        let value = AttrValue::Array(vec![AttrValue::Map(inner), AttrValue::Str("x".into())]);
        let json = serde_json::to_value(&value).unwrap();
        let back: AttrValue = serde_json::from_value(json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn numeric_strings_parse_as_numbers() {
        assert_eq!(AttrValue::Str("17".into()).as_f64(), Some(17.0));
        assert_eq!(AttrValue::Str(" 2.5 ".into()).as_f64(), Some(2.5));
        assert_eq!(AttrValue::Str("seventeen".into()).as_f64(), None);
        assert_eq!(AttrValue::Bool(true).as_f64(), None);
    }
}
