//! Flow messages and their correlation ids.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Key under which a message carries its correlation id.
pub const CORRELATION_KEY: &str = "_msgid";

/// Mint a fresh correlation id.
pub fn new_correlation_id() -> String {
    Ulid::new().to_string().to_lowercase()
}

/// An open key/value record flowing between nodes.
///
/// Every message derived from another one carries the originating
/// correlation id under [`CORRELATION_KEY`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Message(Map<String, Value>);

impl Message {
    /// Create an empty message with a fresh correlation id.
    pub fn new() -> Self {
        let mut message = Self(Map::new());
        message.set_correlation_id(new_correlation_id());
        message
    }

    /// Wrap an existing map without touching its correlation id.
    pub fn from_map(map: Map<String, Value>) -> Self {
        Self(map)
    }

    /// Convert a JSON value into a message. Only objects are messages.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(map) => Some(Self(map)),
            _ => None,
        }
    }

    /// Set a field, builder style.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// The correlation id, if the message carries one.
    pub fn correlation_id(&self) -> Option<&str> {
        self.0.get(CORRELATION_KEY).and_then(Value::as_str)
    }

    /// Overwrite the correlation id.
    pub fn set_correlation_id(&mut self, id: impl Into<String>) {
        self.0
            .insert(CORRELATION_KEY.to_string(), Value::String(id.into()));
    }

    /// Return the correlation id, minting one if the message has none.
    pub fn ensure_correlation_id(&mut self) -> String {
        if let Some(id) = self.correlation_id() {
            return id.to_string();
        }
        let id = new_correlation_id();
        self.set_correlation_id(id.clone());
        id
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}

impl From<Map<String, Value>> for Message {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}
