//! Protocol messages

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message exchanged between a client and the relay.
///
/// Serialized as internally tagged JSON, e.g.
/// `{"type":"register","channel":"orders"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Subscribe the sending connection to a channel
    Register {
        /// Channel name
        channel: String,
    },
    /// Remove the sending connection from a channel
    Disconnect {
        /// Channel name
        channel: String,
    },
    /// Publish a payload to every subscriber of a channel
    Event {
        /// Channel name
        channel: String,
        /// Structured payload, passed through untouched
        payload: Value,
    },
}

impl Message {
    /// Shorthand for a `register` message
    pub fn register(channel: impl Into<String>) -> Self {
        Message::Register {
            channel: channel.into(),
        }
    }

    /// Shorthand for a `disconnect` message
    pub fn disconnect(channel: impl Into<String>) -> Self {
        Message::Disconnect {
            channel: channel.into(),
        }
    }

    /// Shorthand for an `event` message
    pub fn event(channel: impl Into<String>, payload: Value) -> Self {
        Message::Event {
            channel: channel.into(),
            payload,
        }
    }

    /// The channel this message addresses
    pub fn channel(&self) -> &str {
        match self {
            Message::Register { channel }
            | Message::Disconnect { channel }
            | Message::Event { channel, .. } => channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_wire_shape() {
        let message = Message::register("orders");
        let encoded = serde_json::to_string(&message).unwrap();

        assert_eq!(encoded, r#"{"type":"register","channel":"orders"}"#);
    }

    #[test]
    fn test_event_round_trip() {
        let message = Message::event("orders", json!({"id": 1, "qty": 3}));
        let encoded = serde_json::to_vec(&message).unwrap();
        let decoded: Message = serde_json::from_slice(&encoded).unwrap();

        assert_eq!(decoded, message);
        assert_eq!(decoded.channel(), "orders");
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<Message>(r#"{"type":"ping","channel":"x"}"#);
        assert!(result.is_err());
    }
}
