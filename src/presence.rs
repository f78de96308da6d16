use std::sync::Arc;

use uuid::Uuid;

use crate::bridge::MessageBus;
use crate::error::AppError;
use crate::registry::{ConnectionRegistry, PresenceTransition};
use crate::router::events::ServerEvent;

/// Shared set of users with at least one live connection anywhere.
/// Explicitly maintained, never TTL-expired.
pub const ONLINE_USERS_KEY: &str = "online_users";

/// Derives online/offline status from connection registry transitions and
/// announces the changes.
///
/// Presence is global: `user_online` / `user_offline` go to every locally
/// connected socket, not just room members. The shared set gives other
/// instances the same view, eventually consistent with how fast the
/// transition propagates.
pub struct PresenceTracker {
    registry: Arc<ConnectionRegistry>,
    bus: Arc<dyn MessageBus>,
}

impl PresenceTracker {
    pub fn new(registry: Arc<ConnectionRegistry>, bus: Arc<dyn MessageBus>) -> Self {
        Self { registry, bus }
    }

    /// Apply a registry transition: update the shared set, then broadcast.
    ///
    /// A bridge failure degrades to local-only visibility; the local
    /// broadcast still goes out.
    pub async fn apply(&self, user_id: Uuid, transition: PresenceTransition) {
        let event = match transition {
            PresenceTransition::CameOnline => {
                if let Err(e) = self
                    .bus
                    .set_add(ONLINE_USERS_KEY, &user_id.to_string())
                    .await
                {
                    tracing::warn!(%user_id, error = %e, "failed to add user to shared online set");
                }
                ServerEvent::UserOnline { user_id }
            }
            PresenceTransition::WentOffline => {
                if let Err(e) = self
                    .bus
                    .set_remove(ONLINE_USERS_KEY, &user_id.to_string())
                    .await
                {
                    tracing::warn!(%user_id, error = %e, "failed to remove user from shared online set");
                }
                ServerEvent::UserOffline { user_id }
            }
            PresenceTransition::AlreadyOnline | PresenceTransition::StillOnline => return,
        };

        match event.to_json() {
            Ok(payload) => self.registry.broadcast_all(&payload),
            Err(e) => tracing::error!(error = %e, "failed to serialize presence event"),
        }
    }

    /// Snapshot of the shared online set, falling back to the local registry
    /// when the bridge is unreachable.
    pub async fn online_users(&self) -> Vec<Uuid> {
        match self.bus.set_members(ONLINE_USERS_KEY).await {
            Ok(members) => members
                .iter()
                .filter_map(|m| Uuid::parse_str(m).ok())
                .collect(),
            Err(AppError::BridgeUnavailable(e)) => {
                tracing::warn!(error = %e, "bridge unavailable, serving local online set");
                self.registry.local_online()
            }
            Err(e) => {
                tracing::warn!(error = %e, "online set lookup failed, serving local online set");
                self.registry.local_online()
            }
        }
    }
}
