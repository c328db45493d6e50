//! Presence Broadcaster.
//!
//! Online/offline transitions are announced to every other connected user.
//! Delivery is fire-and-forget: a missed event is corrected by the next one.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use aidconnect_shared::types::{PresenceStatus, UserId};

use crate::events::{ServerEvent, StatusEvent};
use crate::registry::ConnectionRegistry;

#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<ConnectionRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    pub fn online(&self, user: UserId) {
        self.announce(StatusEvent {
            user_id: user,
            status: PresenceStatus::Online,
            last_seen: None,
        });
    }

    pub fn offline(&self, user: UserId, last_seen: DateTime<Utc>) {
        self.announce(StatusEvent {
            user_id: user,
            status: PresenceStatus::Offline,
            last_seen: Some(last_seen),
        });
    }

    fn announce(&self, status: StatusEvent) {
        let user = status.user_id;
        let state = status.status;
        let reached = self
            .registry
            .broadcast_except(user, &ServerEvent::UserStatus(status));
        debug!(user = %user, status = ?state, reached, "presence broadcast");
    }

    /// Current presence as derived from live connections, in the same shape
    /// as the `userStatus` event.
    pub fn presence(&self, user: UserId) -> StatusEvent {
        if self.registry.is_online(user) {
            StatusEvent {
                user_id: user,
                status: PresenceStatus::Online,
                last_seen: None,
            }
        } else {
            StatusEvent {
                user_id: user,
                status: PresenceStatus::Offline,
                last_seen: self.registry.last_seen(user),
            }
        }
    }
}
