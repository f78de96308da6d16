use std::collections::HashSet;

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::ConnectionId;

/// Presence transition observed when a connection is added or removed.
///
/// The registry itself performs no I/O; the presence tracker consumes these
/// and updates the shared online set outside any map lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceTransition {
    /// First live connection for this user.
    CameOnline,
    /// User already had at least one other live connection.
    AlreadyOnline,
    /// Last live connection for this user went away.
    WentOffline,
    /// User still has other live connections.
    StillOnline,
}

/// Maps authenticated users to their live transport connections.
///
/// All operations are synchronous sharded-map mutations; nothing here ever
/// awaits, so callers may hold no lock across network I/O by construction.
#[derive(Default)]
pub struct ConnectionRegistry {
    // user_id -> live connection ids
    users: DashMap<Uuid, HashSet<ConnectionId>>,
    // reverse index: connection id -> owning user
    owners: DashMap<ConnectionId, Uuid>,
    // connection id -> outbound channel to the transport task
    senders: DashMap<ConnectionId, UnboundedSender<String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a user's set.
    ///
    /// Returns `CameOnline` when this is the user's first live connection.
    pub fn register(
        &self,
        user_id: Uuid,
        conn_id: ConnectionId,
        sender: UnboundedSender<String>,
    ) -> PresenceTransition {
        self.senders.insert(conn_id, sender);
        self.owners.insert(conn_id, user_id);

        let mut entry = self.users.entry(user_id).or_default();
        let was_offline = entry.is_empty();
        entry.insert(conn_id);

        tracing::debug!(%user_id, %conn_id, connections = entry.len(), "connection registered");

        if was_offline {
            PresenceTransition::CameOnline
        } else {
            PresenceTransition::AlreadyOnline
        }
    }

    /// Remove a connection, looked up through the reverse index.
    ///
    /// Removing an already-removed connection is a no-op, not an error.
    pub fn unregister(&self, conn_id: ConnectionId) -> Option<(Uuid, PresenceTransition)> {
        self.senders.remove(&conn_id);
        let (_, user_id) = self.owners.remove(&conn_id)?;

        let mut went_offline = false;
        if let Some(mut entry) = self.users.get_mut(&user_id) {
            entry.remove(&conn_id);
            went_offline = entry.is_empty();
        }
        if went_offline {
            self.users.remove_if(&user_id, |_, conns| conns.is_empty());
        }

        tracing::debug!(%user_id, %conn_id, went_offline, "connection unregistered");

        let transition = if went_offline {
            PresenceTransition::WentOffline
        } else {
            PresenceTransition::StillOnline
        };
        Some((user_id, transition))
    }

    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.users
            .get(&user_id)
            .map(|conns| !conns.is_empty())
            .unwrap_or(false)
    }

    /// Users with at least one live connection on this instance.
    pub fn local_online(&self) -> Vec<Uuid> {
        self.users
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| *entry.key())
            .collect()
    }

    pub fn connection_count(&self, user_id: Uuid) -> usize {
        self.users.get(&user_id).map(|c| c.len()).unwrap_or(0)
    }

    pub fn owner_of(&self, conn_id: ConnectionId) -> Option<Uuid> {
        self.owners.get(&conn_id).map(|u| *u)
    }

    /// Deliver a payload to one connection. A dead sender is logged and
    /// skipped; teardown removes it shortly after.
    pub fn send_to_connection(&self, conn_id: ConnectionId, payload: &str) {
        if let Some(sender) = self.senders.get(&conn_id) {
            if sender.send(payload.to_owned()).is_err() {
                tracing::debug!(%conn_id, "dropping payload for closed connection");
            }
        }
    }

    /// Deliver a payload to every live connection of one user.
    pub fn send_to_user(&self, user_id: Uuid, payload: &str) {
        let conns: Vec<ConnectionId> = match self.users.get(&user_id) {
            Some(entry) => entry.iter().copied().collect(),
            None => return,
        };
        for conn_id in conns {
            self.send_to_connection(conn_id, payload);
        }
    }

    /// Deliver a payload to an explicit connection set (a room snapshot).
    ///
    /// One dead target never prevents delivery to the rest.
    pub fn send_to_members(&self, members: &[ConnectionId], payload: &str) {
        for conn_id in members {
            self.send_to_connection(*conn_id, payload);
        }
    }

    /// Deliver a payload to every connection on this instance.
    pub fn broadcast_all(&self, payload: &str) {
        for entry in self.senders.iter() {
            if entry.value().send(payload.to_owned()).is_err() {
                tracing::debug!(conn_id = %entry.key(), "dropping payload for closed connection");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc::unbounded_channel;

    fn sender() -> UnboundedSender<String> {
        unbounded_channel().0
    }

    #[test]
    fn first_connection_comes_online_last_goes_offline() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        assert_eq!(registry.register(user, a, sender()), PresenceTransition::CameOnline);
        assert_eq!(registry.register(user, b, sender()), PresenceTransition::AlreadyOnline);
        assert!(registry.is_online(user));
        assert_eq!(registry.connection_count(user), 2);

        assert_eq!(
            registry.unregister(a),
            Some((user, PresenceTransition::StillOnline))
        );
        assert!(registry.is_online(user));

        assert_eq!(
            registry.unregister(b),
            Some((user, PresenceTransition::WentOffline))
        );
        assert!(!registry.is_online(user));
        assert_eq!(registry.connection_count(user), 0);
    }

    #[test]
    fn double_unregister_is_noop() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let conn = ConnectionId::new();

        registry.register(user, conn, sender());
        assert!(registry.unregister(conn).is_some());
        assert!(registry.unregister(conn).is_none());
    }

    #[test]
    fn delivery_reaches_every_user_connection() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let (tx_a, mut rx_a) = unbounded_channel();
        let (tx_b, mut rx_b) = unbounded_channel();

        registry.register(user, ConnectionId::new(), tx_a);
        registry.register(user, ConnectionId::new(), tx_b);
        registry.send_to_user(user, "hello");

        assert_eq!(rx_a.try_recv().unwrap(), "hello");
        assert_eq!(rx_b.try_recv().unwrap(), "hello");
    }

    #[test]
    fn dead_sender_does_not_block_remaining_targets() {
        let registry = ConnectionRegistry::new();
        let user = Uuid::new_v4();
        let dead = ConnectionId::new();
        let live = ConnectionId::new();
        let (tx_live, mut rx_live) = unbounded_channel();

        registry.register(user, dead, sender()); // receiver dropped immediately
        registry.register(user, live, tx_live);
        registry.send_to_members(&[dead, live], "payload");

        assert_eq!(rx_live.try_recv().unwrap(), "payload");
    }
}
