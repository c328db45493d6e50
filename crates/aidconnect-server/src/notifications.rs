//! Notification service: persists notifications and pushes them to the
//! recipient's live connections.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, warn};

use aidconnect_shared::types::{NotificationId, NotificationType, RequestId, UserId};
use aidconnect_store::{now, Message, NewNotification, Notification};

use crate::error::ServerError;
use crate::events::ServerEvent;
use crate::registry::ConnectionRegistry;
use crate::store::Store;

/// A request workflow event to turn into a notification.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestEvent {
    pub recipient_id: UserId,
    pub sender_id: Option<UserId>,
    pub request_id: RequestId,
    pub title: String,
    pub message: String,
}

#[derive(Clone)]
pub struct NotificationService {
    store: Store,
    registry: Arc<ConnectionRegistry>,
}

impl NotificationService {
    pub fn new(store: Store, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Persist a notification, then push `newNotification` to its recipient.
    pub async fn create(&self, new: NewNotification) -> Result<Notification, ServerError> {
        let notification = self.store.run(move |db| db.insert_notification(new)).await?;

        let recipient = notification.recipient_id;
        let reached = self
            .registry
            .send_to_user(recipient, &ServerEvent::NewNotification(notification.clone()));
        debug!(
            recipient = %recipient,
            kind = notification.kind.as_str(),
            reached,
            "notification created"
        );

        Ok(notification)
    }

    /// `new_message` notification for the receiver of `message`. Failure is
    /// logged and swallowed; the message itself is already stored.
    pub async fn notify_new_message(&self, message: &Message) -> Option<Notification> {
        let sender = message.sender_id;
        let sender_name = match self.store.run(move |db| db.get_user(sender)).await {
            Ok(user) => user.name,
            Err(_) => "someone".to_string(),
        };

        let new = NewNotification {
            recipient_id: message.receiver_id,
            sender_id: Some(sender),
            request_id: None,
            kind: NotificationType::NewMessage,
            title: "New Message".to_string(),
            message: format!("You have a new message from {sender_name}"),
            data: json!({
                "messageId": message.id,
                "conversationId": message.session_id,
                "senderId": sender,
            }),
        };

        match self.create(new).await {
            Ok(notification) => Some(notification),
            Err(e) => {
                warn!(
                    message = %message.id,
                    receiver = %message.receiver_id,
                    error = %e,
                    "failed to create new_message notification"
                );
                None
            }
        }
    }

    /// Wrap a request workflow event as a notification.
    pub async fn notify_request_event(
        &self,
        kind: NotificationType,
        event: RequestEvent,
    ) -> Result<Notification, ServerError> {
        if !matches!(
            kind,
            NotificationType::RequestCreated
                | NotificationType::RequestAccepted
                | NotificationType::RequestCompleted
                | NotificationType::RequestCancelled
                | NotificationType::RequestUpdated
        ) {
            return Err(ServerError::Validation(format!(
                "{} is not a request event",
                kind.as_str()
            )));
        }

        let mut data = json!({ "requestId": event.request_id });
        if let Some(sender) = event.sender_id {
            data["senderId"] = json!(sender);
        }

        self.create(NewNotification {
            recipient_id: event.recipient_id,
            sender_id: event.sender_id,
            request_id: Some(event.request_id),
            kind,
            title: event.title,
            message: event.message,
            data,
        })
        .await
    }

    /// Mark one notification read and push `notificationUpdated`.
    pub async fn mark_read(&self, id: NotificationId, user: UserId) -> Result<Notification, ServerError> {
        let notification = self
            .store
            .run(move |db| db.mark_notification_read(id, user, now()))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("Notification not found".into()),
                other => other,
            })?;

        self.registry
            .send_to_user(user, &ServerEvent::NotificationUpdated(notification.clone()));
        Ok(notification)
    }
}
