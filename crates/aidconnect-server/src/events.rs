//! Outbound realtime events.
//!
//! Every event is written to the socket as `{"event": "<name>", "data": {...}}`,
//! the same envelope the client uses for inbound frames.

use chrono::{DateTime, Utc};
use serde::Serialize;

use aidconnect_shared::types::{PresenceStatus, RequestId, SessionId, UserId};
use aidconnect_store::{Message, Notification};

pub const NEW_MESSAGE: &str = "newMessage";
pub const MESSAGE_SENT: &str = "messageSent";
pub const USER_TYPING: &str = "userTyping";
pub const USER_STATUS: &str = "userStatus";
pub const NEW_CHAT_ROOM: &str = "newChatRoom";
pub const NEW_NOTIFICATION: &str = "newNotification";
pub const NOTIFICATION_UPDATED: &str = "notificationUpdated";

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A message addressed to this user was persisted.
    NewMessage(Message),
    /// Ack to the sender once its message is persisted.
    MessageSent(Message),
    UserTyping(TypingEvent),
    UserStatus(StatusEvent),
    NewChatRoom(ChatRoomEvent),
    NewNotification(Notification),
    NotificationUpdated(Notification),
    /// A frame from this connection was rejected.
    Error(ErrorEvent),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewMessage(_) => NEW_MESSAGE,
            Self::MessageSent(_) => MESSAGE_SENT,
            Self::UserTyping(_) => USER_TYPING,
            Self::UserStatus(_) => USER_STATUS,
            Self::NewChatRoom(_) => NEW_CHAT_ROOM,
            Self::NewNotification(_) => NEW_NOTIFICATION,
            Self::NotificationUpdated(_) => NOTIFICATION_UPDATED,
            Self::Error(_) => "error",
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingEvent {
    pub user_id: UserId,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusEvent {
    pub user_id: UserId,
    pub status: PresenceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRoomEvent {
    pub chat_room_id: SessionId,
    pub request_id: RequestId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorEvent {
    pub message: String,
}
