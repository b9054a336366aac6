//! Structured ("message") column support.
//!
//! A message column's payload type is resolved from a type name stored in
//! the schema. The embedding application registers an encode/decode
//! function pair for each name at startup; nothing here is resolved at
//! runtime by reflection or by name mangling. On the wire a message is a
//! 32-bit length prefix followed by whatever the registered encoder
//! produced, capped like any other binary payload.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{CairnError, Result};

/// A structured column payload: the schema-recorded type name plus the
/// application-level body bytes. The storage layer never interprets `data`.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    /// Name under which the codec pair was registered.
    pub type_name: String,
    /// Application-defined body.
    pub data: Vec<u8>,
}

impl Message {
    /// Convenience constructor.
    pub fn new(type_name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            type_name: type_name.into(),
            data,
        }
    }
}

type EncodeFn = dyn Fn(&Message) -> Result<Vec<u8>> + Send + Sync;
type DecodeFn = dyn Fn(&str, &[u8]) -> Result<Message> + Send + Sync;

/// Encode/decode function pair for one message type.
#[derive(Clone)]
pub struct MessageCodec {
    /// Turns a message body into wire bytes (without the length prefix).
    pub encode: Arc<EncodeFn>,
    /// Rebuilds a message from wire bytes; receives the schema type name.
    pub decode: Arc<DecodeFn>,
}

impl MessageCodec {
    /// A codec that stores the body bytes as-is. Useful for tests and for
    /// payloads serialized by the application before they reach the table.
    pub fn passthrough() -> Self {
        Self {
            encode: Arc::new(|m: &Message| Ok(m.data.clone())),
            decode: Arc::new(|name: &str, bytes: &[u8]| Ok(Message::new(name, bytes.to_vec()))),
        }
    }
}

/// Registry mapping message type names to codec pairs.
///
/// Populated once at startup by the embedding application; table loading
/// fails with a schema error if a message column names an unregistered
/// type, so the mistake surfaces at definition time rather than at the
/// first row write.
#[derive(Default)]
pub struct MessageRegistry {
    codecs: RwLock<HashMap<String, MessageCodec>>,
}

impl MessageRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the codec for `type_name`.
    pub fn register(&self, type_name: impl Into<String>, codec: MessageCodec) {
        self.codecs.write().insert(type_name.into(), codec);
    }

    /// Resolves the codec for `type_name`.
    pub fn resolve(&self, type_name: &str) -> Result<MessageCodec> {
        self.codecs.read().get(type_name).cloned().ok_or_else(|| {
            CairnError::Schema(format!(
                "no message codec registered for type '{type_name}'"
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_unregistered_is_schema_error() {
        let reg = MessageRegistry::new();
        assert!(matches!(
            reg.resolve("org.example.Missing"),
            Err(CairnError::Schema(_))
        ));
    }

    #[test]
    fn test_passthrough_roundtrip() {
        let reg = MessageRegistry::new();
        reg.register("org.example.Event", MessageCodec::passthrough());
        let codec = reg.resolve("org.example.Event").unwrap();

        let msg = Message::new("org.example.Event", vec![1, 2, 3]);
        let wire = (codec.encode)(&msg).unwrap();
        let back = (codec.decode)("org.example.Event", &wire).unwrap();
        assert_eq!(back, msg);
    }
}
