//! Domain model structs persisted in the SQLite database.
//!
//! Every struct derives `Serialize` so it can be handed directly to the HTTP
//! and realtime layers; field names are camelCase on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use aidconnect_shared::types::{
    MessageId, MessageStatus, NotificationId, NotificationType, RequestId, RequestStatus, Role,
    SessionId, UserId,
};
use aidconnect_shared::MessageContent;

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

/// A user known to the directory. Presence is not stored here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: UserId,
    pub name: String,
    pub role: Role,
    pub profile_picture: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Help request
// ---------------------------------------------------------------------------

/// The slice of a help request this service needs to guard chat rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HelpRequest {
    pub id: RequestId,
    pub title: String,
    pub status: RequestStatus,
    pub requester_id: UserId,
    pub volunteer_id: Option<UserId>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Chat session
// ---------------------------------------------------------------------------

/// What a chat session is keyed by.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SessionScope {
    /// Peer-to-peer conversation, unique per unordered pair of users.
    Peer,
    /// Chat room bound to one help request. The binding never changes.
    #[serde(rename_all = "camelCase")]
    Request {
        request_id: RequestId,
        requester_id: UserId,
        volunteer_id: UserId,
    },
}

impl SessionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Peer => "peer",
            Self::Request { .. } => "request",
        }
    }
}

/// A two-party chat session: a conversation or a chat room.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    pub id: SessionId,
    #[serde(flatten)]
    pub scope: SessionScope,
    /// Always sorted, always distinct.
    pub participants: [UserId; 2],
    pub last_message_id: Option<MessageId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChatSession {
    /// Build a new session; `a` and `b` may be given in any order.
    pub fn new(scope: SessionScope, a: UserId, b: UserId, now: DateTime<Utc>) -> Self {
        Self {
            id: SessionId::new(),
            scope,
            participants: normalized_pair(a, b),
            last_message_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn has_participant(&self, user: UserId) -> bool {
        self.participants.contains(&user)
    }

    /// The participant that is not `user`, if `user` takes part at all.
    pub fn other_participant(&self, user: UserId) -> Option<UserId> {
        match self.participants {
            [a, b] if a == user => Some(b),
            [a, b] if b == user => Some(a),
            _ => None,
        }
    }

    pub fn request_id(&self) -> Option<RequestId> {
        match self.scope {
            SessionScope::Request { request_id, .. } => Some(request_id),
            SessionScope::Peer => None,
        }
    }
}

/// Order-insensitive key for a pair of users.
pub fn normalized_pair(a: UserId, b: UserId) -> [UserId; 2] {
    if a <= b {
        [a, b]
    } else {
        [b, a]
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "conversationId")]
    pub session_id: SessionId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    #[serde(flatten)]
    pub content: MessageContent,
    pub status: MessageStatus,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Notification
// ---------------------------------------------------------------------------

/// Input for creating a notification.
#[derive(Debug, Clone, PartialEq)]
pub struct NewNotification {
    pub recipient_id: UserId,
    pub sender_id: Option<UserId>,
    pub request_id: Option<RequestId>,
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: NotificationId,
    pub recipient_id: UserId,
    pub sender_id: Option<UserId>,
    pub request_id: Option<RequestId>,
    #[serde(rename = "type")]
    pub kind: NotificationType,
    pub title: String,
    pub message: String,
    pub data: Value,
    pub read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}
