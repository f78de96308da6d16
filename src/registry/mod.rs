use uuid::Uuid;

pub mod connections;
pub mod rooms;

pub use connections::{ConnectionRegistry, PresenceTransition};
pub use rooms::RoomTable;

/// Unique identifier for one transport-level session.
///
/// Assigned at handshake and never reused; a user with several tabs or
/// devices holds several of these at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}
