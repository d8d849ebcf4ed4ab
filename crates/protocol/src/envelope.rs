//! The `{type, payload}` message envelope exchanged over the socket.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Wire-level shape of every application message.
///
/// `kind` (serialized as `type`) is the routing key for handler dispatch.
/// `payload` is an opaque JSON value handed to subscribers undecoded; a
/// missing payload deserializes to `Value::Null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl Envelope {
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}
