use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::bridge::MessageBus;
use crate::error::{AppError, AppResult};
use crate::router::events::ServerEvent;

/// Global push channel for system-wide announcements.
pub const BROADCAST_CHANNEL: &str = "broadcast:notifications";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Like,
    Comment,
    Follow,
    Message,
    Post,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

fn notification_key(id: Uuid) -> String {
    format!("notification:{id}")
}

fn user_index_key(user_id: Uuid) -> String {
    format!("user:{user_id}:notifications")
}

/// Per-user push channel. Shares its name with the index key; the bus
/// keeps channels and keys in separate namespaces.
pub fn user_channel(user_id: Uuid) -> String {
    format!("user:{user_id}:notifications")
}

/// Notifications live in the bridge's backing store until read or expired:
/// one serialized entry per notification under a 30-day TTL, plus a
/// newest-first id index per user. Expiry is the store's TTL, not a sweep.
pub struct NotificationStore {
    bus: Arc<dyn MessageBus>,
    ttl: Duration,
}

impl NotificationStore {
    pub fn new(bus: Arc<dyn MessageBus>, ttl: Duration) -> Self {
        Self { bus, ttl }
    }

    /// Create, persist and push a notification to one user.
    ///
    /// The push rides the per-user channel so whichever instance holds the
    /// user's connections delivers it. A failed publish is degraded, not
    /// fatal: the notification is stored and readable either way.
    pub async fn send(
        &self,
        user_id: Uuid,
        kind: NotificationKind,
        title: String,
        message: String,
        data: Option<serde_json::Value>,
    ) -> AppResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id,
            kind,
            title,
            message,
            data,
            read: false,
            created_at: Utc::now(),
        };

        let serialized = serde_json::to_string(&notification)?;
        self.bus
            .set_with_ttl(&notification_key(notification.id), &serialized, self.ttl)
            .await?;
        self.bus
            .list_push(
                &user_index_key(user_id),
                &notification.id.to_string(),
                self.ttl,
            )
            .await?;

        let push = ServerEvent::NewNotification {
            notification: notification.clone(),
        }
        .to_json()?;
        if let Err(e) = self.bus.publish(&user_channel(user_id), &push).await {
            tracing::warn!(%user_id, error = %e, "notification stored but push not broadcast");
        }

        tracing::info!(%user_id, notification_id = %notification.id, "notification sent");
        Ok(notification)
    }

    /// Push an unpersisted announcement to every connected user, on every
    /// instance.
    pub async fn broadcast(
        &self,
        kind: NotificationKind,
        title: String,
        message: String,
        data: Option<serde_json::Value>,
    ) -> AppResult<Notification> {
        let notification = Notification {
            id: Uuid::new_v4(),
            user_id: Uuid::nil(),
            kind,
            title,
            message,
            data,
            read: false,
            created_at: Utc::now(),
        };

        let push = ServerEvent::NewNotification {
            notification: notification.clone(),
        }
        .to_json()?;
        self.bus.publish(BROADCAST_CHANNEL, &push).await?;
        Ok(notification)
    }

    /// Flip the read flag. `NotFound` when the notification is missing,
    /// expired, or belongs to someone else; the flag is untouched in every
    /// failure case.
    pub async fn mark_read(&self, notification_id: Uuid, user_id: Uuid) -> AppResult<()> {
        let key = notification_key(notification_id);
        let stored = self.bus.get(&key).await?.ok_or(AppError::NotFound)?;
        let mut notification: Notification = serde_json::from_str(&stored).map_err(|e| {
            tracing::error!(error = %e, "corrupt stored notification");
            AppError::Internal
        })?;

        if notification.user_id != user_id {
            return Err(AppError::NotFound);
        }

        notification.read = true;
        let serialized = serde_json::to_string(&notification)?;
        self.bus.set_with_ttl(&key, &serialized, self.ttl).await?;
        Ok(())
    }

    /// Newest-first page of a user's notifications. Ids whose entry already
    /// expired are skipped silently.
    pub async fn list(
        &self,
        user_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> AppResult<Vec<Notification>> {
        if limit == 0 {
            // A stop of offset - 1 would read as "rest of the list".
            return Ok(Vec::new());
        }
        let stop = (offset + limit) as isize - 1;
        let ids = self
            .bus
            .list_range(&user_index_key(user_id), offset as isize, stop)
            .await?;

        let mut notifications = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(stored) = self.bus.get(&format!("notification:{id}")).await? {
                match serde_json::from_str::<Notification>(&stored) {
                    Ok(n) => notifications.push(n),
                    Err(e) => tracing::warn!(%id, error = %e, "skipping undecodable notification"),
                }
            }
        }
        Ok(notifications)
    }

    pub async fn unread_count(&self, user_id: Uuid) -> AppResult<usize> {
        let ids = self
            .bus
            .list_range(&user_index_key(user_id), 0, -1)
            .await?;

        let mut unread = 0;
        for id in ids {
            if let Some(stored) = self.bus.get(&format!("notification:{id}")).await? {
                if let Ok(n) = serde_json::from_str::<Notification>(&stored) {
                    if !n.read {
                        unread += 1;
                    }
                }
            }
        }
        Ok(unread)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::InMemoryBus;

    fn store() -> NotificationStore {
        NotificationStore::new(Arc::new(InMemoryBus::new()), Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn send_then_list_round_trips_newest_first() {
        let store = store();
        let user = Uuid::new_v4();

        let first = store
            .send(user, NotificationKind::Like, "t1".into(), "m1".into(), None)
            .await
            .unwrap();
        let second = store
            .send(user, NotificationKind::Comment, "t2".into(), "m2".into(), None)
            .await
            .unwrap();

        let listed = store.list(user, 10, 0).await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[1].id, first.id);
        assert!(!listed[0].read);
    }

    #[tokio::test]
    async fn zero_limit_page_is_empty() {
        let store = store();
        let user = Uuid::new_v4();
        store
            .send(user, NotificationKind::Like, "t".into(), "m".into(), None)
            .await
            .unwrap();

        assert!(store.list(user, 0, 0).await.unwrap().is_empty());
        assert!(store.list(user, 0, 1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn mark_read_by_foreign_user_is_not_found_and_flag_stays_false() {
        let store = store();
        let owner = Uuid::new_v4();
        let stranger = Uuid::new_v4();

        let n = store
            .send(owner, NotificationKind::Follow, "t".into(), "m".into(), None)
            .await
            .unwrap();

        let err = store.mark_read(n.id, stranger).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound));

        let listed = store.list(owner, 10, 0).await.unwrap();
        assert!(!listed[0].read);

        store.mark_read(n.id, owner).await.unwrap();
        let listed = store.list(owner, 10, 0).await.unwrap();
        assert!(listed[0].read);
    }

    #[tokio::test]
    async fn unread_count_tracks_read_flag() {
        let store = store();
        let user = Uuid::new_v4();

        let a = store
            .send(user, NotificationKind::System, "t".into(), "m".into(), None)
            .await
            .unwrap();
        store
            .send(user, NotificationKind::Post, "t".into(), "m".into(), None)
            .await
            .unwrap();

        assert_eq!(store.unread_count(user).await.unwrap(), 2);
        store.mark_read(a.id, user).await.unwrap();
        assert_eq!(store.unread_count(user).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn mark_read_of_unknown_id_is_not_found() {
        let store = store();
        let err = store
            .mark_read(Uuid::new_v4(), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound));
    }
}
