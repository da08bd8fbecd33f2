//! Subscriber control protocol
//!
//! Wire envelope spoken by subscriber connections: a JSON object with a
//! `type` discriminator plus optional `channel`, `data`, and `timestamp`
//! fields. Replies reuse the same shape; the proactive welcome message is
//! heartbeat-typed and carries the connection id and auth status.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::events::MessagePriority;

/// Inbound control message from a subscriber
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Outbound message to a subscriber
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerMessage {
    /// Heartbeat echo; doubles as the connect-time welcome when the
    /// connection fields are present
    Heartbeat {
        timestamp: DateTime<Utc>,
        #[serde(skip_serializing_if = "Option::is_none")]
        connection_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        authenticated: Option<bool>,
    },
    /// Subscribe acknowledgement with the resulting subscriber count
    Subscribe { channel: String, subscribers: usize },
    /// Unsubscribe acknowledgement with the resulting subscriber count
    Unsubscribe { channel: String, subscribers: usize },
    /// Fanned-out channel event
    Event {
        channel: String,
        id: String,
        priority: MessagePriority,
        data: serde_json::Value,
        timestamp: DateTime<Utc>,
    },
    Error { error: String },
}

impl ServerMessage {
    pub fn heartbeat() -> Self {
        ServerMessage::Heartbeat {
            timestamp: Utc::now(),
            connection_id: None,
            authenticated: None,
        }
    }

    pub fn welcome(connection_id: String, authenticated: bool) -> Self {
        ServerMessage::Heartbeat {
            timestamp: Utc::now(),
            connection_id: Some(connection_id),
            authenticated: Some(authenticated),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error { error: message.into() }
    }
}

/// Parse a raw frame into a control message
pub fn parse_client_message(raw: &str) -> Result<ClientMessage> {
    serde_json::from_str(raw).map_err(|_| Error::InvalidMessage("Invalid JSON message".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_subscribe() {
        let msg = parse_client_message(r#"{"type":"subscribe","channel":"logs.all"}"#).unwrap();
        assert_eq!(msg.msg_type, "subscribe");
        assert_eq!(msg.channel.as_deref(), Some("logs.all"));
        assert!(msg.timestamp.is_none());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        let err = parse_client_message("not json at all").unwrap_err();
        assert!(matches!(err, Error::InvalidMessage(_)));
        assert_eq!(err.to_string(), "Invalid message: Invalid JSON message");
    }

    #[test]
    fn test_server_message_wire_shape() {
        let ack = ServerMessage::Subscribe {
            channel: "logs.all".to_string(),
            subscribers: 3,
        };
        let json = serde_json::to_value(&ack).unwrap();
        assert_eq!(json["type"], "subscribe");
        assert_eq!(json["subscribers"], 3);

        let err = ServerMessage::error("Unknown message type: nonsense");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["error"], "Unknown message type: nonsense");
    }

    #[test]
    fn test_welcome_is_heartbeat_typed() {
        let welcome = ServerMessage::welcome("conn-1".to_string(), true);
        let json = serde_json::to_value(&welcome).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert_eq!(json["connection_id"], "conn-1");
        assert_eq!(json["authenticated"], true);
    }

    #[test]
    fn test_plain_heartbeat_omits_connection_fields() {
        let hb = ServerMessage::heartbeat();
        let json = serde_json::to_value(&hb).unwrap();
        assert_eq!(json["type"], "heartbeat");
        assert!(json.get("connection_id").is_none());
    }
}
