//! The typed message envelope carried over the RPC transport (§4.3).

use std::collections::BTreeMap;

/// A single field value a [`Message`] can carry.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// UTF-8 text.
    Str(String),
    /// A signed 64-bit integer.
    Int(i64),
    /// Opaque bytes, e.g. a serialized payload or log chunk.
    Bytes(Vec<u8>),
    /// A raw file descriptor number, passed out-of-band by the
    /// transport's SCM_RIGHTS-equivalent framing. Stored as the integer
    /// handle; the transport implementation owns the actual descriptor
    /// lifecycle.
    FileDescriptor(i32),
    /// A nested message, used for streaming progress updates and
    /// structured payloads.
    Nested(Message),
    /// A homogeneous list of values.
    List(Vec<Value>),
}

/// A typed request or response envelope. Field order is insignificant;
/// fields are looked up by name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    fields: BTreeMap<String, Value>,
}

impl Message {
    /// An empty message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a field, returning `self` for chaining.
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.fields.insert(name.into(), value);
        self
    }

    /// Set a field in place.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.fields.insert(name.into(), value);
    }

    /// Fetch a field by name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Fetch a string field.
    #[must_use]
    pub fn get_str(&self, name: &str) -> Option<&str> {
        match self.fields.get(name) {
            Some(Value::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Fetch an integer field.
    #[must_use]
    pub fn get_int(&self, name: &str) -> Option<i64> {
        match self.fields.get(name) {
            Some(Value::Int(n)) => Some(*n),
            _ => None,
        }
    }

    /// Fetch a nested message field.
    #[must_use]
    pub fn get_nested(&self, name: &str) -> Option<&Message> {
        match self.fields.get(name) {
            Some(Value::Nested(m)) => Some(m),
            _ => None,
        }
    }

    /// All field names present, for diagnostics.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_and_accessors_round_trip() {
        let msg = Message::new()
            .with("id", Value::Str("c1".into()))
            .with("exit_code", Value::Int(0));
        assert_eq!(msg.get_str("id"), Some("c1"));
        assert_eq!(msg.get_int("exit_code"), Some(0));
        assert!(msg.get("missing").is_none());
    }

    #[test]
    fn nested_message_accessible() {
        let inner = Message::new().with("percent", Value::Int(50));
        let outer = Message::new().with("progress", Value::Nested(inner.clone()));
        assert_eq!(outer.get_nested("progress"), Some(&inner));
    }
}
