//! Inbound realtime protocol.
//!
//! Frames are JSON objects `{"event": "<name>", "data": {...}}`. Connecting and
//! disconnecting are transport-level and have no frame of their own.

use serde::Deserialize;
use serde_json::Value;

use crate::content::MessageContent;
use crate::error::ValidationError;
use crate::types::{MessageId, UserId};

/// All events a connected client may send.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// Send a message to a peer, creating the conversation on first contact.
    #[serde(alias = "privateMessage")]
    Send(SendPayload),

    /// Typing indicator for a peer. Never persisted.
    Typing(TypingPayload),

    /// Mark messages addressed to the caller as read.
    MarkAsRead(MarkAsReadPayload),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    #[serde(alias = "receiver")]
    pub receiver_id: UserId,
    #[serde(default)]
    pub text: String,
    #[serde(rename = "type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

impl SendPayload {
    pub fn content(&self) -> Result<MessageContent, ValidationError> {
        MessageContent::from_parts(self.kind.as_deref(), self.metadata.as_ref())
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingPayload {
    pub receiver_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkAsReadPayload {
    pub message_ids: Vec<MessageId>,
}

impl ClientEvent {
    pub fn from_json(data: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let receiver = UserId::new();
        let frame = format!(
            r#"{{"event":"send","data":{{"receiverId":"{receiver}","text":"hi","type":"text"}}}}"#
        );

        match ClientEvent::from_json(&frame).unwrap() {
            ClientEvent::Send(payload) => {
                assert_eq!(payload.receiver_id, receiver);
                assert_eq!(payload.text, "hi");
                assert_eq!(payload.content().unwrap(), MessageContent::Text);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_parse_typing_and_mark_as_read() {
        let receiver = UserId::new();
        let frame = format!(r#"{{"event":"typing","data":{{"receiverId":"{receiver}","isTyping":true}}}}"#);
        assert!(matches!(
            ClientEvent::from_json(&frame).unwrap(),
            ClientEvent::Typing(TypingPayload { is_typing: true, .. })
        ));

        let id = MessageId::new();
        let frame = format!(r#"{{"event":"markAsRead","data":{{"messageIds":["{id}"]}}}}"#);
        match ClientEvent::from_json(&frame).unwrap() {
            ClientEvent::MarkAsRead(payload) => assert_eq!(payload.message_ids, vec![id]),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_event_rejected() {
        assert!(ClientEvent::from_json(r#"{"event":"dance","data":{}}"#).is_err());
    }
}
