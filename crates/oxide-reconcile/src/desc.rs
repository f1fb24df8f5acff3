//! Free-form descriptive metadata attached to tables, columns and indexes.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::Result;

/// Key holding a column's previous name, the signal for a rename.
pub const ORIGIN_NAME_KEY: &str = "OriginName";

/// Descriptive metadata: an opaque key → JSON value map.
///
/// Equality is deep and ignores key insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Desc(Map<String, JsonValue>);

impl Desc {
    /// Creates an empty description.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns whether no key is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Gets a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.0.get(key)
    }

    /// Sets a value, returning the previous one.
    pub fn insert(
        &mut self,
        key: impl Into<String>,
        value: impl Into<JsonValue>,
    ) -> Option<JsonValue> {
        self.0.insert(key.into(), value.into())
    }

    /// Removes a value by key.
    pub fn remove(&mut self, key: &str) -> Option<JsonValue> {
        self.0.remove(key)
    }

    /// Adds a key, builder style.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.insert(key, value);
        self
    }

    /// Iterates over all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &JsonValue)> {
        self.0.iter()
    }

    /// Returns the rename signal, if it is a non-empty string.
    #[must_use]
    pub fn origin_name(&self) -> Option<&str> {
        match self.0.get(ORIGIN_NAME_KEY) {
            Some(JsonValue::String(name)) if !name.is_empty() => Some(name),
            _ => None,
        }
    }

    /// Sets the rename signal.
    #[must_use]
    pub fn with_origin_name(mut self, name: impl Into<String>) -> Self {
        self.0
            .insert(ORIGIN_NAME_KEY.to_string(), JsonValue::String(name.into()));
        self
    }

    /// Returns a copy without the rename signal.
    #[must_use]
    pub fn without_origin_name(&self) -> Self {
        let mut copy = self.clone();
        copy.0.remove(ORIGIN_NAME_KEY);
        copy
    }

    /// Encodes the description as a JSON object.
    #[must_use]
    pub fn to_json_string(&self) -> String {
        JsonValue::Object(self.0.clone()).to_string()
    }

    /// Decodes a description; an empty string yields an empty description.
    pub fn parse(text: &str) -> Result<Self> {
        if text.trim().is_empty() {
            return Ok(Self::new());
        }
        Ok(serde_json::from_str(text)?)
    }
}

impl From<Map<String, JsonValue>> for Desc {
    fn from(map: Map<String, JsonValue>) -> Self {
        Self(map)
    }
}
