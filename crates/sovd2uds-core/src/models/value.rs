//! Closed value type for parameters and results

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A decoded parameter or result value.
///
/// Unlike `serde_json::Value` this is a closed set: there is no null, and raw
/// bytes are a first-class variant. It serializes to JSON with bytes rendered
/// as an uppercase hex string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "serde_json::Value", try_from = "serde_json::Value")]
pub enum SovdValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Array(Vec<SovdValue>),
    /// Ordered fields, in declaration order
    Object(Vec<(String, SovdValue)>),
}

/// Errors converting foreign JSON into a [`SovdValue`]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValueError {
    #[error("null is not a valid value")]
    Null,

    #[error("number {0} is not representable")]
    Number(String),
}

impl SovdValue {
    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, SovdValue)>) -> Self {
        SovdValue::Object(fields.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Short name of the variant, for error messages
    pub fn type_name(&self) -> &'static str {
        match self {
            SovdValue::String(_) => "string",
            SovdValue::Integer(_) => "integer",
            SovdValue::Float(_) => "float",
            SovdValue::Bool(_) => "boolean",
            SovdValue::Bytes(_) => "bytes",
            SovdValue::Array(_) => "array",
            SovdValue::Object(_) => "object",
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            SovdValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SovdValue::Integer(i) => Some(*i),
            SovdValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SovdValue::Integer(i) => Some(*i as f64),
            SovdValue::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            SovdValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Interpret as raw bytes.
    ///
    /// Accepts `Bytes`, a hex string (optional `0x` prefix, spaces allowed) or
    /// an array of integers in 0..=255.
    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            SovdValue::Bytes(b) => Some(b.clone()),
            SovdValue::String(s) => {
                let cleaned: String = s
                    .trim()
                    .trim_start_matches("0x")
                    .trim_start_matches("0X")
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect();
                hex::decode(cleaned).ok()
            }
            SovdValue::Array(items) => items
                .iter()
                .map(|v| v.as_i64().and_then(|i| u8::try_from(i).ok()))
                .collect(),
            _ => None,
        }
    }

    /// Field lookup on an object value
    pub fn get(&self, key: &str) -> Option<&SovdValue> {
        match self {
            SovdValue::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }
}

impl From<&str> for SovdValue {
    fn from(s: &str) -> Self {
        SovdValue::String(s.to_string())
    }
}

impl From<String> for SovdValue {
    fn from(s: String) -> Self {
        SovdValue::String(s)
    }
}

impl From<i64> for SovdValue {
    fn from(i: i64) -> Self {
        SovdValue::Integer(i)
    }
}

impl From<f64> for SovdValue {
    fn from(f: f64) -> Self {
        SovdValue::Float(f)
    }
}

impl From<bool> for SovdValue {
    fn from(b: bool) -> Self {
        SovdValue::Bool(b)
    }
}

impl From<Vec<u8>> for SovdValue {
    fn from(b: Vec<u8>) -> Self {
        SovdValue::Bytes(b)
    }
}

impl From<SovdValue> for serde_json::Value {
    fn from(value: SovdValue) -> Self {
        use serde_json::Value;
        match value {
            SovdValue::String(s) => Value::String(s),
            SovdValue::Integer(i) => Value::Number(i.into()),
            SovdValue::Float(f) => serde_json::Number::from_f64(f)
                .map(Value::Number)
                .unwrap_or_else(|| Value::String(f.to_string())),
            SovdValue::Bool(b) => Value::Bool(b),
            SovdValue::Bytes(b) => Value::String(hex::encode_upper(b)),
            SovdValue::Array(items) => Value::Array(items.into_iter().map(Into::into).collect()),
            SovdValue::Object(fields) => {
                Value::Object(fields.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}

impl TryFrom<serde_json::Value> for SovdValue {
    type Error = ValueError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        use serde_json::Value;
        Ok(match value {
            Value::Null => return Err(ValueError::Null),
            Value::Bool(b) => SovdValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    SovdValue::Integer(i)
                } else if let Some(f) = n.as_f64() {
                    SovdValue::Float(f)
                } else {
                    return Err(ValueError::Number(n.to_string()));
                }
            }
            Value::String(s) => SovdValue::String(s),
            Value::Array(items) => SovdValue::Array(
                items
                    .into_iter()
                    .map(SovdValue::try_from)
                    .collect::<Result<_, _>>()?,
            ),
            Value::Object(map) => SovdValue::Object(
                map.into_iter()
                    .map(|(k, v)| SovdValue::try_from(v).map(|v| (k, v)))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }
}
