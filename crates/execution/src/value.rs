//! Opaque dynamic payloads carried by trace records.
//!
//! Host-function parameters, results and event data arrive from the engine as
//! dynamically typed values. `TraceValue` models them with a closed set of
//! shapes; maps use `BTreeMap` so every serialization of the same value is
//! byte-identical.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key for wrapped non-map payloads.
pub const WRAPPED_VALUE_KEY: &str = "value";

/// A dynamically typed trace payload.
///
/// The untagged representation tries variants in declaration order, so
/// `Bytes` sits ahead of `List`: a JSON array whose elements all fit in a
/// byte reads back as `Bytes` (keeping byte payloads round-trippable), and
/// anything else falls through to `List`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraceValue {
    /// Boolean flag
    Bool(bool),
    /// Signed integer
    Integer(i64),
    /// Floating-point number
    Float(f64),
    /// UTF-8 text
    String(String),
    /// Raw bytes
    Bytes(Vec<u8>),
    /// Ordered list of values
    List(Vec<TraceValue>),
    /// String-keyed map with canonical ordering
    Map(BTreeMap<String, TraceValue>),
}

impl TraceValue {
    /// An empty map payload.
    pub fn empty_map() -> Self {
        TraceValue::Map(BTreeMap::new())
    }

    /// Builds a map payload from key/value pairs.
    pub fn map<K, V, I>(pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<TraceValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        TraceValue::Map(
            pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Whether the payload is a map.
    pub fn is_map(&self) -> bool {
        matches!(self, TraceValue::Map(_))
    }

    /// Projects the payload to the uniform map shape consumers see.
    ///
    /// Maps pass through; every other shape is wrapped as `{"value": …}`.
    pub fn to_map_payload(&self) -> BTreeMap<String, TraceValue> {
        match self {
            TraceValue::Map(entries) => entries.clone(),
            other => {
                let mut wrapped = BTreeMap::new();
                wrapped.insert(WRAPPED_VALUE_KEY.to_string(), other.clone());
                wrapped
            }
        }
    }
}

impl Default for TraceValue {
    fn default() -> Self {
        TraceValue::empty_map()
    }
}

impl From<bool> for TraceValue {
    fn from(v: bool) -> Self {
        TraceValue::Bool(v)
    }
}

impl From<i64> for TraceValue {
    fn from(v: i64) -> Self {
        TraceValue::Integer(v)
    }
}

impl From<u64> for TraceValue {
    fn from(v: u64) -> Self {
        TraceValue::Integer(v as i64)
    }
}

impl From<f64> for TraceValue {
    fn from(v: f64) -> Self {
        TraceValue::Float(v)
    }
}

impl From<&str> for TraceValue {
    fn from(v: &str) -> Self {
        TraceValue::String(v.to_string())
    }
}

impl From<String> for TraceValue {
    fn from(v: String) -> Self {
        TraceValue::String(v)
    }
}

impl From<Vec<u8>> for TraceValue {
    fn from(v: Vec<u8>) -> Self {
        TraceValue::Bytes(v)
    }
}

impl From<Vec<TraceValue>> for TraceValue {
    fn from(v: Vec<TraceValue>) -> Self {
        TraceValue::List(v)
    }
}

impl From<BTreeMap<String, TraceValue>> for TraceValue {
    fn from(v: BTreeMap<String, TraceValue>) -> Self {
        TraceValue::Map(v)
    }
}
