//! Conversation Resolver: find-or-create for chat sessions.
//!
//! Lookup and insert are separate store calls, so two callers can both miss
//! the lookup. The schema lets exactly one insert win; the loser gets
//! `DuplicateKey` and re-reads the winner's row.

use std::sync::Arc;

use tracing::{debug, info};

use aidconnect_shared::types::{RequestId, RequestStatus, UserId};
use aidconnect_store::{now, ChatSession, SessionScope, StoreError};

use crate::error::ServerError;
use crate::events::{ChatRoomEvent, ServerEvent};
use crate::registry::ConnectionRegistry;
use crate::store::Store;

#[derive(Clone)]
pub struct ConversationResolver {
    store: Store,
    registry: Arc<ConnectionRegistry>,
}

impl ConversationResolver {
    pub fn new(store: Store, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// The peer conversation between `a` and `b`, created on first use.
    pub async fn find_or_create(&self, a: UserId, b: UserId) -> Result<ChatSession, ServerError> {
        if a == b {
            return Err(ServerError::Validation(
                "Cannot start a conversation with yourself".into(),
            ));
        }

        self.store
            .run(move |db| {
                db.get_user(a)?;
                db.get_user(b)
            })
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("User not found".into()),
                other => other,
            })?;

        if let Some(existing) = self.store.run(move |db| db.find_peer_session(a, b)).await? {
            return Ok(existing);
        }

        self.create_peer(a, b).await
    }

    async fn create_peer(&self, a: UserId, b: UserId) -> Result<ChatSession, ServerError> {
        let session = ChatSession::new(SessionScope::Peer, a, b, now());
        let candidate = session.clone();

        match self.store.call(move |db| db.insert_session(&candidate)).await? {
            Ok(()) => {
                info!(session = %session.id, "conversation created");
                Ok(session)
            }
            Err(StoreError::DuplicateKey(_)) => {
                debug!(a = %a, b = %b, "lost conversation creation race, re-reading");
                self.store
                    .run(move |db| db.find_peer_session(a, b))
                    .await?
                    .ok_or_else(|| ServerError::Internal("conversation vanished after conflict".into()))
            }
            Err(other) => Err(other.into()),
        }
    }

    /// The chat room of `request_id`, created on first use.
    ///
    /// The request must be in progress and the caller must be one of the two
    /// parties named. When a room is created both parties get `newChatRoom`.
    pub async fn find_or_create_room(
        &self,
        caller: UserId,
        request_id: RequestId,
        volunteer_id: UserId,
        requester_id: UserId,
    ) -> Result<ChatSession, ServerError> {
        if volunteer_id == requester_id {
            return Err(ServerError::Validation(
                "Volunteer and requester must be different users".into(),
            ));
        }

        let request = self
            .store
            .run(move |db| db.get_request(request_id))
            .await
            .map_err(|e| match e {
                ServerError::NotFound(_) => ServerError::NotFound("Request not found".into()),
                other => other,
            })?;

        if request.status != RequestStatus::InProgress {
            return Err(ServerError::Validation(
                "Request must be in progress to start a chat".into(),
            ));
        }

        if caller != volunteer_id && caller != requester_id {
            return Err(ServerError::Forbidden("Not authorized to create chat room".into()));
        }

        if request.requester_id != requester_id
            || request.volunteer_id.is_some_and(|v| v != volunteer_id)
        {
            return Err(ServerError::Validation(
                "Participants do not match the request".into(),
            ));
        }

        if let Some(existing) = self
            .store
            .run(move |db| db.find_session_by_request(request_id))
            .await?
        {
            return bound_to(existing, caller);
        }

        let scope = SessionScope::Request {
            request_id,
            requester_id,
            volunteer_id,
        };
        let room = ChatSession::new(scope, volunteer_id, requester_id, now());
        let candidate = room.clone();

        match self.store.call(move |db| db.insert_session(&candidate)).await? {
            Ok(()) => {
                info!(room = %room.id, request = %request_id, "chat room created");
                let event = ServerEvent::NewChatRoom(ChatRoomEvent {
                    chat_room_id: room.id,
                    request_id,
                });
                for participant in room.participants {
                    self.registry.send_to_user(participant, &event);
                }
                Ok(room)
            }
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self
                    .store
                    .run(move |db| db.find_session_by_request(request_id))
                    .await?
                    .ok_or_else(|| ServerError::Internal("chat room vanished after conflict".into()))?;
                bound_to(existing, caller)
            }
            Err(other) => Err(other.into()),
        }
    }
}

/// A room's participants are fixed when it is created, so a caller named by
/// the request today may still be a stranger to the stored room.
fn bound_to(room: ChatSession, caller: UserId) -> Result<ChatSession, ServerError> {
    if room.has_participant(caller) {
        Ok(room)
    } else {
        Err(ServerError::Forbidden("Not a participant of this chat room".into()))
    }
}
