//! Wire envelopes exchanged with dashboard clients over WebSocket.
//!
//! Clients send `{action, topic, message?}`; the gateway pushes
//! `{topic, message}`. Both directions are plain JSON text frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Action verbs a dashboard client may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClientAction {
    Subscribe,
    Publish,
    Unsubscribe,
}

/// One structured request from a dashboard client.
///
/// Parsing is all-or-nothing: unknown actions fail the whole envelope,
/// and the dispatcher drops envelopes without a topic.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientEnvelope {
    pub action: ClientAction,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub message: Option<Value>,
}

impl ClientEnvelope {
    /// Parse a client text frame; `None` for anything malformed.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }
}

/// One topic update pushed to a dashboard client.
#[derive(Debug, Clone, Serialize)]
pub struct TopicUpdate<'a> {
    pub topic: &'a str,
    pub message: &'a Value,
}

impl TopicUpdate<'_> {
    /// Compact JSON wire form.
    pub fn to_json(&self) -> String {
        // A &str + Value pair cannot fail to serialize.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Decode a raw bus payload for client delivery.
///
/// Unparseable payloads and empty objects degrade to `null`; any other
/// valid JSON passes through intact.
pub fn decode_payload(payload: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) if map.is_empty() => Value::Null,
        Ok(value) => value,
        Err(_) => Value::Null,
    }
}
