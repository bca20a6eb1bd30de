//! Flat key/value point records.
//!
//! Points are the currency of the ingress and export boundaries: each one
//! is a named record of scalar fields plus a timestamp. The correlation
//! core only ever reads the well-known keys in [`crate::span::fields`] and
//! passes everything else through untouched.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Scalar field value on a point.
///
/// Wraps `serde_json::Value` so arbitrary collector fields survive the
/// round trip through storage without a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Value(pub JsonValue);

impl Value {
    /// Create an integer value.
    #[must_use]
    pub fn int(v: i64) -> Self {
        Self(JsonValue::Number(v.into()))
    }

    /// Create an unsigned integer value.
    #[must_use]
    pub fn uint(v: u64) -> Self {
        Self(JsonValue::Number(v.into()))
    }

    /// Create a string value.
    #[must_use]
    pub fn string(v: impl Into<String>) -> Self {
        Self(JsonValue::String(v.into()))
    }

    /// Create a boolean value.
    #[must_use]
    pub fn bool(v: bool) -> Self {
        Self(JsonValue::Bool(v))
    }

    /// Read as a signed integer.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.as_i64()
    }

    /// Read as an unsigned integer.
    ///
    /// Collectors that only speak signed 64-bit store unsigned ids
    /// bit-cast to `i64`; both representations are accepted here.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match &self.0 {
            JsonValue::Number(n) => n
                .as_u64()
                .or_else(|| n.as_i64().map(|v| v as u64)),
            _ => None,
        }
    }

    /// Read as a string slice.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        self.0.as_str()
    }
}

/// One flat key/value record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    /// Record name (the measurement the collector filed it under).
    pub name: String,
    /// Scalar fields keyed by name.
    pub fields: BTreeMap<String, Value>,
    /// Capture timestamp, nanoseconds since the Unix epoch.
    pub timestamp_ns: u64,
}

impl Point {
    /// Create an empty point.
    #[must_use]
    pub fn new(name: impl Into<String>, timestamp_ns: u64) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            timestamp_ns,
        }
    }

    /// Set a field, replacing any existing value under the same key.
    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.fields.insert(key.into(), value);
    }

    /// Builder-style variant of [`Point::set`].
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.set(key, value);
        self
    }

    /// Get a field by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Get a field as a signed integer.
    #[must_use]
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Value::as_i64)
    }

    /// Get a field as an unsigned integer.
    #[must_use]
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    /// Get a field as a string slice.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}
