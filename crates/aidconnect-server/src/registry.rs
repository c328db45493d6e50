//! Connection Registry: user id -> live realtime connections.
//!
//! Each user owns one bucket in a sharded map. Every mutation locks only that
//! bucket, so connects and disconnects of different users never contend.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info};

use aidconnect_shared::types::{ConnectionId, UserId};
use aidconnect_store::now;

use crate::events::ServerEvent;

/// Sending half of one connection's outbound queue.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    tx: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    /// New handle plus the receiver the socket task drains.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                id: ConnectionId::next(),
                tx,
            },
            rx,
        )
    }

    fn deliver(&self, user: UserId, event: &ServerEvent) -> Delivery {
        match self.tx.try_send(event.clone()) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                debug!(user = %user, conn = %self.id, event = event.name(), "queue full, dropping event");
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => {
                debug!(user = %user, conn = %self.id, "pruning dead connection");
                Delivery::Dead
            }
        }
    }
}

enum Delivery {
    Sent,
    Dropped,
    Dead,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    connections: DashMap<UserId, Vec<ConnectionHandle>>,
    last_seen: DashMap<UserId, DateTime<Utc>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to the user's bucket. Returns `true` on the 0 -> 1
    /// transition, i.e. when the user just came online.
    ///
    /// A bucket emptied by pruning stays in the map until its sessions
    /// unregister, so an empty occupied bucket also counts as offline.
    pub fn register(&self, user: UserId, handle: ConnectionHandle) -> bool {
        let conn = handle.id;
        let (came_online, count) = match self.connections.entry(user) {
            Entry::Occupied(mut entry) => {
                let was_empty = entry.get().is_empty();
                entry.get_mut().push(handle);
                (was_empty, entry.get().len())
            }
            Entry::Vacant(entry) => {
                entry.insert(vec![handle]);
                (true, 1)
            }
        };

        info!(user = %user, conn = %conn, connections = count, "connection registered");
        came_online
    }

    /// Remove one handle. Returns the last-seen timestamp when this removal
    /// left the user with no connections (the 1 -> 0 transition).
    pub fn unregister(&self, user: UserId, conn: ConnectionId) -> Option<DateTime<Utc>> {
        let Entry::Occupied(mut entry) = self.connections.entry(user) else {
            return None;
        };

        entry.get_mut().retain(|h| h.id != conn);
        if !entry.get().is_empty() {
            info!(user = %user, conn = %conn, connections = entry.get().len(), "connection closed");
            return None;
        }

        entry.remove();
        let seen = now();
        self.last_seen.insert(user, seen);
        info!(user = %user, conn = %conn, "last connection closed, user offline");
        Some(seen)
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.connections
            .get(&user)
            .map(|handles| !handles.is_empty())
            .unwrap_or(false)
    }

    pub fn last_seen(&self, user: UserId) -> Option<DateTime<Utc>> {
        self.last_seen.get(&user).map(|seen| *seen)
    }

    pub fn connection_count(&self, user: UserId) -> usize {
        self.connections.get(&user).map(|h| h.len()).unwrap_or(0)
    }

    pub fn online_users(&self) -> usize {
        self.connections
            .iter()
            .filter(|handles| !handles.is_empty())
            .count()
    }

    /// Fan `event` out to every live connection of `user`. Dead handles are
    /// pruned; a full queue only loses this event. Returns the number of
    /// connections the event was queued on.
    pub fn send_to_user(&self, user: UserId, event: &ServerEvent) -> usize {
        let Some(mut handles) = self.connections.get_mut(&user) else {
            return 0;
        };

        let mut sent = 0;
        handles.retain(|handle| match handle.deliver(user, event) {
            Delivery::Sent => {
                sent += 1;
                true
            }
            Delivery::Dropped => true,
            Delivery::Dead => false,
        });
        sent
    }

    /// Fan `event` out to every connected user except `skip`.
    pub fn broadcast_except(&self, skip: UserId, event: &ServerEvent) -> usize {
        let mut sent = 0;
        for mut bucket in self.connections.iter_mut() {
            let user = *bucket.key();
            if user == skip {
                continue;
            }
            bucket.value_mut().retain(|handle| match handle.deliver(user, event) {
                Delivery::Sent => {
                    sent += 1;
                    true
                }
                Delivery::Dropped => true,
                Delivery::Dead => false,
            });
        }
        sent
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{ErrorEvent, ServerEvent};

    fn ping() -> ServerEvent {
        ServerEvent::Error(ErrorEvent {
            message: "ping".into(),
        })
    }

    #[test]
    fn test_two_handles_then_one_leaves() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (first, _rx1) = ConnectionHandle::channel(4);
        let (second, _rx2) = ConnectionHandle::channel(4);
        let first_id = first.id;
        let second_id = second.id;

        assert!(registry.register(user, first));
        assert!(!registry.register(user, second));

        assert_eq!(registry.unregister(user, first_id), None);
        assert!(registry.is_online(user));

        let seen = registry.unregister(user, second_id);
        assert!(seen.is_some());
        assert!(!registry.is_online(user));
        assert_eq!(registry.last_seen(user), seen);

        // A late duplicate unregister reports nothing.
        assert_eq!(registry.unregister(user, second_id), None);
    }

    #[tokio::test]
    async fn test_fan_out_reaches_every_tab() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (a, mut rx_a) = ConnectionHandle::channel(4);
        let (b, mut rx_b) = ConnectionHandle::channel(4);
        registry.register(user, a);
        registry.register(user, b);

        assert_eq!(registry.send_to_user(user, &ping()), 2);
        assert_eq!(rx_a.recv().await, Some(ping()));
        assert_eq!(rx_b.recv().await, Some(ping()));
    }

    #[test]
    fn test_dead_handle_is_pruned() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (live, _rx_live) = ConnectionHandle::channel(4);
        let (dead, rx_dead) = ConnectionHandle::channel(4);
        let dead_id = dead.id;
        registry.register(user, live);
        registry.register(user, dead);
        drop(rx_dead);

        assert_eq!(registry.send_to_user(user, &ping()), 1);
        assert_eq!(registry.connection_count(user), 1);

        // The socket task still unregisters its pruned handle; nothing breaks.
        assert_eq!(registry.unregister(user, dead_id), None);
        assert!(registry.is_online(user));
    }

    #[test]
    fn test_full_queue_drops_event_but_keeps_handle() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = ConnectionHandle::channel(1);
        registry.register(user, handle);

        assert_eq!(registry.send_to_user(user, &ping()), 1);
        assert_eq!(registry.send_to_user(user, &ping()), 0);
        assert_eq!(registry.connection_count(user), 1);
    }

    #[test]
    fn test_send_to_offline_user_is_noop() {
        let registry = ConnectionRegistry::new();
        assert_eq!(registry.send_to_user(UserId::new(), &ping()), 0);
    }

    #[test]
    fn test_broadcast_skips_origin() {
        let registry = ConnectionRegistry::new();
        let origin = UserId::new();
        let other = UserId::new();
        let (h1, mut rx_origin) = ConnectionHandle::channel(4);
        let (h2, mut rx_other) = ConnectionHandle::channel(4);
        registry.register(origin, h1);
        registry.register(other, h2);

        assert_eq!(registry.broadcast_except(origin, &ping()), 1);
        assert!(rx_origin.try_recv().is_err());
        assert_eq!(rx_other.try_recv().unwrap(), ping());
    }

    #[test]
    fn test_concurrent_register_unregister() {
        let registry = std::sync::Arc::new(ConnectionRegistry::new());
        let user = UserId::new();

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let (handle, _rx) = ConnectionHandle::channel(1);
                        let id = handle.id;
                        registry.register(user, handle);
                        registry.unregister(user, id);
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert!(!registry.is_online(user));
        assert_eq!(registry.online_users(), 0);
    }

    #[test]
    fn test_reconnect_after_last_handle_pruned_comes_online() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (stale, rx_stale) = ConnectionHandle::channel(4);
        let stale_id = stale.id;
        assert!(registry.register(user, stale));
        drop(rx_stale);

        assert_eq!(registry.send_to_user(user, &ping()), 0);
        assert!(!registry.is_online(user));
        assert_eq!(registry.online_users(), 0);

        let (fresh, _rx_fresh) = ConnectionHandle::channel(4);
        let fresh_id = fresh.id;
        assert!(registry.register(user, fresh));
        assert_eq!(registry.online_users(), 1);

        // The stale session closing later does not take the user offline.
        assert_eq!(registry.unregister(user, stale_id), None);
        assert!(registry.is_online(user));
        assert!(registry.unregister(user, fresh_id).is_some());
    }

    #[test]
    fn test_pruned_bucket_reports_offline_when_session_ends() {
        let registry = ConnectionRegistry::new();
        let user = UserId::new();
        let (handle, rx) = ConnectionHandle::channel(4);
        let id = handle.id;
        registry.register(user, handle);
        drop(rx);

        let other = UserId::new();
        let (watcher, _rx_watcher) = ConnectionHandle::channel(4);
        registry.register(other, watcher);
        assert_eq!(registry.broadcast_except(other, &ping()), 0);
        assert_eq!(registry.online_users(), 1);

        assert!(registry.unregister(user, id).is_some());
    }
}
