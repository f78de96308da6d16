use std::collections::HashSet;

use dashmap::DashMap;
use uuid::Uuid;

use super::ConnectionId;

/// Maps rooms (conversations, broadcast topics) to their subscribed
/// connections.
///
/// Membership is per-connection, not per-user: a user can be joined from one
/// tab and not another. A reverse index keeps teardown O(rooms joined).
/// Authorization happens in the event router before `join` is called.
#[derive(Default)]
pub struct RoomTable {
    // room_id -> subscribed connections
    rooms: DashMap<Uuid, HashSet<ConnectionId>>,
    // reverse index: connection -> rooms it joined
    joined: DashMap<ConnectionId, HashSet<Uuid>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent join: joining a room already joined is a no-op.
    pub fn join(&self, room_id: Uuid, conn_id: ConnectionId) {
        self.rooms.entry(room_id).or_default().insert(conn_id);
        self.joined.entry(conn_id).or_default().insert(room_id);
    }

    /// Idempotent removal.
    pub fn leave(&self, room_id: Uuid, conn_id: ConnectionId) {
        let mut emptied = false;
        if let Some(mut members) = self.rooms.get_mut(&room_id) {
            members.remove(&conn_id);
            emptied = members.is_empty();
        }
        if emptied {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }

        let mut orphaned = false;
        if let Some(mut rooms) = self.joined.get_mut(&conn_id) {
            rooms.remove(&room_id);
            orphaned = rooms.is_empty();
        }
        if orphaned {
            self.joined.remove_if(&conn_id, |_, rooms| rooms.is_empty());
        }
    }

    /// Snapshot of the room's current connection set, for fan-out.
    ///
    /// Taken at call time under the shard lock; callers fan out from the
    /// returned vector so a concurrent disconnect cannot invalidate it.
    pub fn members_of(&self, room_id: Uuid) -> Vec<ConnectionId> {
        self.rooms
            .get(&room_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, room_id: Uuid, conn_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .map(|members| members.contains(&conn_id))
            .unwrap_or(false)
    }

    /// Rooms the connection currently belongs to.
    pub fn rooms_of(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        self.joined
            .get(&conn_id)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Remove the connection from every room it joined. Returns the rooms
    /// left so the caller can emit any per-room events.
    pub fn drop_connection(&self, conn_id: ConnectionId) -> Vec<Uuid> {
        let rooms = self.rooms_of(conn_id);
        for room_id in &rooms {
            self.leave(*room_id, conn_id);
        }
        rooms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_then_leave_restores_pre_join_state() {
        let table = RoomTable::new();
        let room = Uuid::new_v4();
        let conn = ConnectionId::new();

        table.join(room, conn);
        assert!(table.contains(room, conn));

        table.leave(room, conn);
        assert!(!table.contains(room, conn));
        assert!(table.members_of(room).is_empty());
        assert!(table.rooms_of(conn).is_empty());
    }

    #[test]
    fn double_join_is_idempotent() {
        let table = RoomTable::new();
        let room = Uuid::new_v4();
        let conn = ConnectionId::new();

        table.join(room, conn);
        table.join(room, conn);
        assert_eq!(table.members_of(room).len(), 1);
    }

    #[test]
    fn leave_of_unjoined_room_is_noop() {
        let table = RoomTable::new();
        table.leave(Uuid::new_v4(), ConnectionId::new());
    }

    #[test]
    fn drop_connection_clears_every_room() {
        let table = RoomTable::new();
        let conn = ConnectionId::new();
        let other = ConnectionId::new();
        let rooms: Vec<Uuid> = (0..3).map(|_| Uuid::new_v4()).collect();

        for room in &rooms {
            table.join(*room, conn);
            table.join(*room, other);
        }

        let mut left = table.drop_connection(conn);
        left.sort();
        let mut expected = rooms.clone();
        expected.sort();
        assert_eq!(left, expected);

        for room in &rooms {
            assert!(!table.contains(*room, conn), "dangling connection id");
            assert!(table.contains(*room, other));
        }
        assert!(table.rooms_of(conn).is_empty());
    }
}
