//! Typed attribute values and their canonical JSON form.
//!
//! Attributes are stored in a `BTreeMap` so iteration, and therefore
//! serialization, always happens in lexicographic key order. Two attribute
//! sets with the same entries produce byte-identical JSON no matter how they
//! were built.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Key-ordered attribute map.
pub type Attributes = BTreeMap<String, AttributeValue>;

/// A single attribute value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Int(i64),
    /// Floating point number, must be finite to be sent
    Float(f64),
    /// Free-form string
    String(String),
}

impl AttributeValue {
    /// Converts to a JSON value, or `None` when the value has no JSON form.
    pub fn to_json(&self) -> Option<Value> {
        match self {
            Self::Bool(b) => Some(Value::Bool(*b)),
            Self::Int(i) => Some(Value::from(*i)),
            Self::Float(f) => serde_json::Number::from_f64(*f).map(Value::Number),
            Self::String(s) => Some(Value::String(s.clone())),
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for AttributeValue {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for AttributeValue {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for AttributeValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Converts attributes into a JSON object with sorted keys.
///
/// Values that cannot be represented in JSON are logged and left out; the
/// remaining attributes are still returned.
pub fn vet(attributes: &Attributes) -> Map<String, Value> {
    let mut object = Map::new();
    for (key, value) in attributes {
        match value.to_json() {
            Some(json) => {
                object.insert(key.clone(), json);
            },
            None => {
                tracing::warn!(
                    attribute = %key,
                    value = %value,
                    "dropping attribute that cannot be serialized"
                );
            },
        }
    }
    object
}

/// Canonical string form of an attribute set, used as part of a metric
/// identity.
pub fn canonical_json(attributes: &Attributes) -> String {
    Value::Object(vet(attributes)).to_string()
}

/// Builds an attribute map from key/value pairs.
pub fn attributes<I, K, V>(pairs: I) -> Attributes
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<AttributeValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
