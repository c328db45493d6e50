//! Realtime Dispatcher.
//!
//! Every write follows the same order: validate, persist, then fan out.
//! Nothing reaches a socket before the store accepted the write, and a
//! receiver being offline is never an error since the message stays
//! retrievable.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info};

use aidconnect_shared::protocol::ClientEvent;
use aidconnect_shared::types::{ConnectionId, MessageId, MessageStatus, SessionId, UserId};
use aidconnect_shared::{MessageContent, ValidationError};
use aidconnect_store::{now, ChatSession, Message};

use crate::auth::{AuthUser, TokenVerifier};
use crate::error::ServerError;
use crate::events::{ServerEvent, TypingEvent};
use crate::notifications::NotificationService;
use crate::presence::PresenceBroadcaster;
use crate::registry::{ConnectionHandle, ConnectionRegistry};
use crate::resolver::ConversationResolver;
use crate::store::Store;

#[derive(Clone)]
pub struct Dispatcher {
    store: Store,
    registry: Arc<ConnectionRegistry>,
    presence: PresenceBroadcaster,
    resolver: ConversationResolver,
    notifications: NotificationService,
    verifier: Arc<dyn TokenVerifier>,
    connection_buffer: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Disconnected,
}

/// One live realtime connection, from `connect` until `disconnect`.
pub struct RealtimeSession {
    dispatcher: Dispatcher,
    pub user: AuthUser,
    pub id: ConnectionId,
    state: SessionState,
}

impl Dispatcher {
    pub fn new(
        store: Store,
        registry: Arc<ConnectionRegistry>,
        verifier: Arc<dyn TokenVerifier>,
        connection_buffer: usize,
    ) -> Self {
        Self {
            presence: PresenceBroadcaster::new(registry.clone()),
            resolver: ConversationResolver::new(store.clone(), registry.clone()),
            notifications: NotificationService::new(store.clone(), registry.clone()),
            store,
            registry,
            verifier,
            connection_buffer,
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &PresenceBroadcaster {
        &self.presence
    }

    pub fn resolver(&self) -> &ConversationResolver {
        &self.resolver
    }

    pub fn notifications(&self) -> &NotificationService {
        &self.notifications
    }

    pub fn verifier(&self) -> &Arc<dyn TokenVerifier> {
        &self.verifier
    }

    // ------------------------------------------------------------------
    // Connection lifecycle
    // ------------------------------------------------------------------

    /// Verify `token` and register a new connection for its user.
    pub fn connect(
        &self,
        token: &str,
    ) -> Result<(RealtimeSession, mpsc::Receiver<ServerEvent>), ServerError> {
        let user = self.verifier.verify(token)?;
        Ok(self.attach(user))
    }

    /// Register a connection for an already authenticated user.
    pub fn attach(&self, user: AuthUser) -> (RealtimeSession, mpsc::Receiver<ServerEvent>) {
        let (handle, rx) = ConnectionHandle::channel(self.connection_buffer);
        let id = handle.id;

        if self.registry.register(user.id, handle) {
            self.presence.online(user.id);
        }

        let session = RealtimeSession {
            dispatcher: self.clone(),
            user,
            id,
            state: SessionState::Connected,
        };
        (session, rx)
    }

    fn disconnect(&self, user: UserId, conn: ConnectionId) {
        if let Some(last_seen) = self.registry.unregister(user, conn) {
            self.presence.offline(user, last_seen);
        }
    }

    // ------------------------------------------------------------------
    // Messaging
    // ------------------------------------------------------------------

    /// Send a peer message, creating the conversation on first contact.
    pub async fn send(
        &self,
        sender: UserId,
        receiver: UserId,
        text: String,
        content: MessageContent,
    ) -> Result<Message, ServerError> {
        if sender == receiver {
            return Err(ValidationError::SelfMessage.into());
        }

        self.store
            .run(move |db| db.get_user(receiver))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("Receiver not found".into()),
                other => other,
            })?;

        let session = self.resolver.find_or_create(sender, receiver).await?;
        self.deliver(&session, sender, receiver, text, content).await
    }

    /// Send into an existing session (a chat room or a known conversation).
    /// The receiver is the caller's counterpart in that session.
    pub async fn send_in_session(
        &self,
        sender: UserId,
        session_id: SessionId,
        text: String,
        content: MessageContent,
    ) -> Result<Message, ServerError> {
        let session = self
            .store
            .run(move |db| db.get_session(session_id))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("Chat room not found".into()),
                other => other,
            })?;

        let receiver = session.other_participant(sender).ok_or_else(|| {
            ServerError::Forbidden("Not a participant of this chat".into())
        })?;

        self.deliver(&session, sender, receiver, text, content).await
    }

    async fn deliver(
        &self,
        session: &ChatSession,
        sender: UserId,
        receiver: UserId,
        text: String,
        content: MessageContent,
    ) -> Result<Message, ServerError> {
        let message = Message {
            id: MessageId::new(),
            session_id: session.id,
            sender_id: sender,
            receiver_id: receiver,
            text,
            content,
            status: MessageStatus::Sent,
            created_at: now(),
            read_at: None,
        };

        let stored = message.clone();
        self.store
            .run(move |db| {
                db.insert_message(&stored)?;
                db.touch_session(stored.session_id, stored.id, stored.created_at)
            })
            .await?;

        info!(
            message = %message.id,
            session = %message.session_id,
            kind = message.content.kind(),
            "message stored"
        );

        self.notifications.notify_new_message(&message).await;

        let delivered = self
            .registry
            .send_to_user(receiver, &ServerEvent::NewMessage(message.clone()));
        self.registry
            .send_to_user(sender, &ServerEvent::MessageSent(message.clone()));
        debug!(message = %message.id, receiver = %receiver, delivered, "message fanned out");

        Ok(message)
    }

    /// Typing indicator. Nothing is stored.
    pub fn typing(&self, sender: UserId, receiver: UserId, is_typing: bool) {
        self.registry.send_to_user(
            receiver,
            &ServerEvent::UserTyping(TypingEvent {
                user_id: sender,
                is_typing,
            }),
        );
    }

    /// Mark messages addressed to `reader` as read. Ids addressed to anyone
    /// else are skipped.
    pub async fn mark_as_read(&self, reader: UserId, ids: Vec<MessageId>) -> Result<usize, ServerError> {
        self.store
            .run(move |db| db.mark_read(&ids, reader, now()))
            .await
    }

    async fn handle(&self, user: AuthUser, event: ClientEvent) -> Result<(), ServerError> {
        match event {
            ClientEvent::Send(payload) => {
                let content = payload.content()?;
                self.send(user.id, payload.receiver_id, payload.text, content)
                    .await?;
            }
            ClientEvent::Typing(payload) => {
                self.typing(user.id, payload.receiver_id, payload.is_typing);
            }
            ClientEvent::MarkAsRead(payload) => {
                self.mark_as_read(user.id, payload.message_ids).await?;
            }
        }
        Ok(())
    }
}

impl RealtimeSession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Handle one inbound event. Errors only concern this event; the
    /// connection stays usable.
    pub async fn handle(&self, event: ClientEvent) -> Result<(), ServerError> {
        if self.state == SessionState::Disconnected {
            return Err(ServerError::Validation("Connection is closed".into()));
        }
        self.dispatcher.handle(self.user, event).await
    }

    /// Unregister this connection. Safe to call more than once.
    pub fn disconnect(&mut self) {
        if self.state == SessionState::Connected {
            self.state = SessionState::Disconnected;
            self.dispatcher.disconnect(self.user.id, self.id);
        }
    }
}

impl Drop for RealtimeSession {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use aidconnect_shared::protocol::{SendPayload, TypingPayload};
    use aidconnect_shared::types::{NotificationType, PresenceStatus, Role};
    use serde_json::json;

    use super::*;
    use crate::auth::test_support::{token_for, SECRET};
    use crate::auth::JwtVerifier;
    use crate::testing::{seed_request, seed_user};

    fn dispatcher() -> (Dispatcher, Store) {
        let store = Store::in_memory();
        let dispatcher = Dispatcher::new(
            store.clone(),
            Arc::new(ConnectionRegistry::new()),
            Arc::new(JwtVerifier::new(SECRET)),
            16,
        );
        (dispatcher, store)
    }

    fn drain(rx: &mut mpsc::Receiver<ServerEvent>) -> Vec<ServerEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_connect_requires_valid_token() {
        let (dispatcher, _) = dispatcher();
        assert!(matches!(
            dispatcher.connect("garbage"),
            Err(ServerError::Auth(_))
        ));

        let user = UserId::new();
        let (session, _rx) = dispatcher.connect(&token_for(user, Role::Volunteer)).unwrap();
        assert_eq!(session.user.id, user);
        assert!(dispatcher.registry().is_online(user));
    }

    #[tokio::test]
    async fn test_send_persists_counts_and_notifies() {
        let (dispatcher, store) = dispatcher();
        let a = seed_user(&store, Role::Requester).await;
        let b = seed_user(&store, Role::Volunteer).await;
        let (_sa, mut rx_a) = dispatcher.attach(AuthUser { id: a, role: Role::Requester });
        let (_sb, mut rx_b) = dispatcher.attach(AuthUser { id: b, role: Role::Volunteer });
        drain(&mut rx_a);

        let message = dispatcher
            .send(a, b, "hi".into(), MessageContent::Text)
            .await
            .unwrap();
        assert_eq!(message.status, MessageStatus::Sent);

        let session_id = message.session_id;
        let unread = store.run(move |db| db.count_unread(b, session_id)).await.unwrap();
        assert_eq!(unread, 1);

        let notifications = store.run(move |db| db.list_notifications(b, 50)).await.unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].kind, NotificationType::NewMessage);
        assert_eq!(notifications[0].data["messageId"], message.id.to_string());

        let session = store.run(move |db| db.get_session(session_id)).await.unwrap();
        assert_eq!(session.last_message_id, Some(message.id));

        let to_b = drain(&mut rx_b);
        assert!(to_b.contains(&ServerEvent::NewMessage(message.clone())));
        assert!(to_b.iter().any(|e| matches!(e, ServerEvent::NewNotification(_))));
        assert_eq!(drain(&mut rx_a), vec![ServerEvent::MessageSent(message)]);
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_send() {
        let (dispatcher, store) = dispatcher();
        let a = seed_user(&store, Role::Requester).await;
        let b = seed_user(&store, Role::Volunteer).await;
        store
            .run(|db| {
                db.conn().execute_batch("DROP TABLE notifications")?;
                Ok(())
            })
            .await
            .unwrap();

        let message = dispatcher
            .send(a, b, "still here".into(), MessageContent::Text)
            .await
            .unwrap();

        let id = message.id;
        let stored = store.run(move |db| db.get_message(id)).await.unwrap();
        assert_eq!(stored, message);
    }

    #[tokio::test]
    async fn test_invalid_send_stores_nothing_and_pushes_nothing() {
        let (dispatcher, store) = dispatcher();
        let a = seed_user(&store, Role::Requester).await;
        let b = seed_user(&store, Role::Volunteer).await;
        let (_sb, mut rx_b) = dispatcher.attach(AuthUser { id: b, role: Role::Volunteer });

        let err = dispatcher
            .send(a, a, "me".into(), MessageContent::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));

        let err = dispatcher
            .send(a, UserId::new(), "ghost".into(), MessageContent::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        let sessions = store.run(move |db| db.list_sessions_for_user(a, None)).await.unwrap();
        assert!(sessions.is_empty());
        assert!(drain(&mut rx_b).is_empty());
    }

    #[tokio::test]
    async fn test_location_payload_validated_before_send() {
        let (dispatcher, store) = dispatcher();
        let a = seed_user(&store, Role::Requester).await;
        let b = seed_user(&store, Role::Volunteer).await;
        let (session, _rx) = dispatcher.attach(AuthUser { id: a, role: Role::Requester });

        let bad = ClientEvent::Send(SendPayload {
            receiver_id: b,
            text: "here".into(),
            kind: Some("location".into()),
            metadata: Some(json!({ "coordinates": [1.0] })),
        });
        assert!(matches!(session.handle(bad).await, Err(ServerError::Validation(_))));

        let good = ClientEvent::Send(SendPayload {
            receiver_id: b,
            text: "here".into(),
            kind: Some("location".into()),
            metadata: Some(json!({ "coordinates": [106.8, -6.2] })),
        });
        session.handle(good).await.unwrap();

        let messages = store.run(move |db| db.list_messages_between(a, b)).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(
            messages[0].content,
            MessageContent::Location { lat: -6.2, lng: 106.8 }
        );
    }

    #[tokio::test]
    async fn test_mark_as_read_only_touches_own_messages() {
        let (dispatcher, store) = dispatcher();
        let a = seed_user(&store, Role::Requester).await;
        let b = seed_user(&store, Role::Volunteer).await;

        let m1 = dispatcher.send(a, b, "one".into(), MessageContent::Text).await.unwrap();
        let m2 = dispatcher.send(a, b, "two".into(), MessageContent::Text).await.unwrap();
        let m3 = dispatcher.send(b, a, "three".into(), MessageContent::Text).await.unwrap();

        let changed = dispatcher
            .mark_as_read(b, vec![m1.id, m2.id, m3.id])
            .await
            .unwrap();
        assert_eq!(changed, 2);

        for (id, expected) in [
            (m1.id, MessageStatus::Read),
            (m2.id, MessageStatus::Read),
            (m3.id, MessageStatus::Sent),
        ] {
            let message = store.run(move |db| db.get_message(id)).await.unwrap();
            assert_eq!(message.status, expected);
            assert_eq!(message.read_at.is_some(), expected == MessageStatus::Read);
        }
    }

    #[tokio::test]
    async fn test_typing_reaches_receiver_only() {
        let (dispatcher, _) = dispatcher();
        let (a, b) = (UserId::new(), UserId::new());
        let (session_a, mut rx_a) = dispatcher.attach(AuthUser { id: a, role: Role::Requester });
        let (_sb, mut rx_b) = dispatcher.attach(AuthUser { id: b, role: Role::Volunteer });
        drain(&mut rx_a);

        session_a
            .handle(ClientEvent::Typing(TypingPayload {
                receiver_id: b,
                is_typing: true,
            }))
            .await
            .unwrap();

        assert_eq!(
            drain(&mut rx_b),
            vec![ServerEvent::UserTyping(TypingEvent {
                user_id: a,
                is_typing: true
            })]
        );
        assert!(drain(&mut rx_a).is_empty());
    }

    #[tokio::test]
    async fn test_presence_transitions_fire_once() {
        let (dispatcher, _) = dispatcher();
        let watcher = UserId::new();
        let user = UserId::new();
        let (_watch, mut rx) = dispatcher.attach(AuthUser { id: watcher, role: Role::Admin });

        let auth = AuthUser { id: user, role: Role::Volunteer };
        let (mut tab1, _rx1) = dispatcher.attach(auth);
        let (mut tab2, _rx2) = dispatcher.attach(auth);

        tab1.disconnect();
        assert!(dispatcher.registry().is_online(user));
        tab2.disconnect();
        tab2.disconnect();
        drop(tab2);
        assert!(!dispatcher.registry().is_online(user));

        let statuses: Vec<_> = drain(&mut rx)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::UserStatus(s) if s.user_id == user => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(statuses.len(), 2);
        assert_eq!(statuses[0].status, PresenceStatus::Online);
        assert_eq!(statuses[1].status, PresenceStatus::Offline);
        assert!(statuses[1].last_seen.is_some());
    }

    #[tokio::test]
    async fn test_closed_session_rejects_events() {
        let (dispatcher, _) = dispatcher();
        let (mut session, _rx) = dispatcher.attach(AuthUser {
            id: UserId::new(),
            role: Role::Volunteer,
        });
        session.disconnect();
        assert_eq!(session.state(), SessionState::Disconnected);

        let err = session
            .handle(ClientEvent::Typing(TypingPayload {
                receiver_id: UserId::new(),
                is_typing: false,
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Validation(_)));
    }

    #[tokio::test]
    async fn test_send_in_room_requires_participant() {
        let (dispatcher, store) = dispatcher();
        let requester = seed_user(&store, Role::Requester).await;
        let volunteer = seed_user(&store, Role::Volunteer).await;
        let outsider = seed_user(&store, Role::Volunteer).await;
        let request = seed_request(&store, requester, volunteer, aidconnect_shared::types::RequestStatus::InProgress).await;

        let room = dispatcher
            .resolver()
            .find_or_create_room(requester, request, volunteer, requester)
            .await
            .unwrap();

        let err = dispatcher
            .send_in_session(outsider, room.id, "let me in".into(), MessageContent::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::Forbidden(_)));

        let err = dispatcher
            .send_in_session(requester, SessionId::new(), "hello?".into(), MessageContent::Text)
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound(_)));

        let message = dispatcher
            .send_in_session(requester, room.id, "thanks!".into(), MessageContent::Text)
            .await
            .unwrap();
        assert_eq!(message.receiver_id, volunteer);
        assert_eq!(message.session_id, room.id);
    }
}
