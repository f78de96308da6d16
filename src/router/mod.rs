use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use crate::bridge::{BusMessage, MessageBus};
use crate::error::{AppError, AppResult};
use crate::notifications::{NotificationStore, BROADCAST_CHANNEL};
use crate::presence::PresenceTracker;
use crate::registry::{ConnectionId, ConnectionRegistry, RoomTable};
use crate::services::{ConversationDirectory, IdentityValidator, MessageStore};

pub mod events;

use events::{ClientEvent, Delivery, RemoteFrame, ServerEvent};

fn room_channel(room_id: Uuid) -> String {
    format!("room:{room_id}")
}

/// Connection lifecycle. A connection only dispatches client events while
/// `Authenticated`; everything received in the other states is dropped by
/// the transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Transport open, handshake token not yet validated.
    Connecting,
    /// Registered and allowed to dispatch events.
    Authenticated,
    /// Torn down; terminal.
    Closed,
}

/// Handle returned from a successful handshake. The transport keeps it for
/// the lifetime of the connection and passes it back on every event.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user_id: Uuid,
}

/// Central dispatcher tying the registry, room table, presence tracker,
/// bridge and storage collaborators together.
///
/// One router per process. Every instance tags its outgoing room frames
/// with `instance_id` and skips them when they loop back through the bus,
/// so a member connected locally is served exactly once, from the snapshot
/// taken before the publish.
pub struct EventRouter {
    instance_id: Uuid,
    connections: Arc<ConnectionRegistry>,
    rooms: Arc<RoomTable>,
    presence: Arc<PresenceTracker>,
    bus: Arc<dyn MessageBus>,
    identity: Arc<dyn IdentityValidator>,
    directory: Arc<dyn ConversationDirectory>,
    messages: Arc<dyn MessageStore>,
    notifications: Arc<NotificationStore>,
}

impl EventRouter {
    pub fn new(
        bus: Arc<dyn MessageBus>,
        identity: Arc<dyn IdentityValidator>,
        directory: Arc<dyn ConversationDirectory>,
        messages: Arc<dyn MessageStore>,
        notifications: Arc<NotificationStore>,
    ) -> Arc<Self> {
        let connections = Arc::new(ConnectionRegistry::new());
        let presence = Arc::new(PresenceTracker::new(connections.clone(), bus.clone()));
        Arc::new(Self {
            instance_id: Uuid::new_v4(),
            connections,
            rooms: Arc::new(RoomTable::new()),
            presence,
            bus,
            identity,
            directory,
            messages,
            notifications,
        })
    }

    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.presence
    }

    /// Handshake: validate the token, register the connection, preload the
    /// user's conversations into the room table, announce presence.
    ///
    /// A preload failure rolls the registration back and fails the
    /// handshake; a half-connected session that silently misses its rooms
    /// would be worse than a clean retry.
    pub async fn connect(
        &self,
        token: &str,
        sender: UnboundedSender<String>,
    ) -> AppResult<ConnectionHandle> {
        let user_id = self.identity.validate(token).await?;
        let conn_id = ConnectionId::new();

        let transition = self.connections.register(user_id, conn_id, sender);
        self.presence.apply(user_id, transition).await;

        match self.directory.list_user_rooms(user_id).await {
            Ok(room_ids) => {
                for room_id in &room_ids {
                    self.rooms.join(*room_id, conn_id);
                }
                tracing::info!(%user_id, %conn_id, rooms = room_ids.len(), "connection established");
            }
            Err(e) => {
                tracing::error!(%user_id, error = %e, "room preload failed, closing connection");
                self.disconnect(conn_id).await;
                return Err(e);
            }
        }

        Ok(ConnectionHandle {
            id: conn_id,
            user_id,
        })
    }

    /// Dispatch one client event. Errors come back as an `error` frame for
    /// the transport to deliver; they never tear the connection down.
    pub async fn handle_event(
        &self,
        handle: ConnectionHandle,
        event: ClientEvent,
    ) -> Option<ServerEvent> {
        match self.dispatch(handle, event).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::debug!(user_id = %handle.user_id, error = %e, "event rejected");
                Some(ServerEvent::Error {
                    error: e.to_string(),
                })
            }
        }
    }

    async fn dispatch(
        &self,
        handle: ConnectionHandle,
        event: ClientEvent,
    ) -> AppResult<Option<ServerEvent>> {
        match event {
            ClientEvent::JoinRoom { room_id } => {
                // Authorization is re-checked on every join, not only at
                // preload time; membership may have been revoked since.
                if !self.directory.is_participant(handle.user_id, room_id).await? {
                    return Err(AppError::NotAuthorized);
                }
                self.rooms.join(room_id, handle.id);
                Ok(Some(ServerEvent::JoinedRoom { room_id }))
            }

            ClientEvent::LeaveRoom { room_id } => {
                self.rooms.leave(room_id, handle.id);
                Ok(Some(ServerEvent::LeftRoom { room_id }))
            }

            ClientEvent::SendMessage {
                room_id,
                content,
                kind,
            } => self.send_message(handle, room_id, content, kind).await,

            ClientEvent::TypingStart { room_id } => {
                self.fan_out_typing(handle, room_id, true)?;
                Ok(None)
            }
            ClientEvent::TypingStop { room_id } => {
                self.fan_out_typing(handle, room_id, false)?;
                Ok(None)
            }

            ClientEvent::MarkNotificationRead { notification_id } => {
                self.notifications
                    .mark_read(notification_id, handle.user_id)
                    .await?;
                Ok(Some(ServerEvent::NotificationMarkedRead { notification_id }))
            }

            ClientEvent::GetOnlineUsers => Ok(Some(ServerEvent::OnlineUsers {
                users: self.presence.online_users().await,
            })),
        }
    }

    /// Store-then-fan-out. Storage is the gate: a refusal fails the send
    /// with nothing delivered. After storage succeeds the message is final;
    /// a bridge outage only degrades delivery to local members, reported in
    /// the ack as `stored`.
    async fn send_message(
        &self,
        handle: ConnectionHandle,
        room_id: Uuid,
        content: String,
        kind: String,
    ) -> AppResult<Option<ServerEvent>> {
        if !self.rooms.contains(room_id, handle.id) {
            return Err(AppError::NotAuthorized);
        }

        let message = self
            .messages
            .create_message(room_id, handle.user_id, &content, &kind)
            .await?;

        let payload = ServerEvent::NewMessage {
            message: message.clone(),
            room_id,
        }
        .to_json()?;

        // Snapshot before the publish await; a member disconnecting while
        // the bus call is in flight must not affect this fan-out.
        let members = self.rooms.members_of(room_id);
        self.connections.send_to_members(&members, &payload);

        let frame = serde_json::to_string(&RemoteFrame {
            origin: self.instance_id,
            payload,
        })?;
        let delivery = match self.bus.publish(&room_channel(room_id), &frame).await {
            Ok(()) => Delivery::Broadcast,
            Err(e) => {
                tracing::warn!(%room_id, error = %e, "message stored but not broadcast");
                Delivery::Stored
            }
        };

        Ok(Some(ServerEvent::MessageSent { message, delivery }))
    }

    /// Typing is ephemeral and local: fanned out to the room's connections
    /// on this instance, minus the sender's own connection. Other devices
    /// of the same user do receive it.
    fn fan_out_typing(
        &self,
        handle: ConnectionHandle,
        room_id: Uuid,
        is_typing: bool,
    ) -> AppResult<()> {
        if !self.rooms.contains(room_id, handle.id) {
            return Err(AppError::NotAuthorized);
        }

        let payload = ServerEvent::UserTyping {
            user_id: handle.user_id,
            room_id,
            is_typing,
        }
        .to_json()?;

        let members: Vec<ConnectionId> = self
            .rooms
            .members_of(room_id)
            .into_iter()
            .filter(|c| *c != handle.id)
            .collect();
        self.connections.send_to_members(&members, &payload);
        Ok(())
    }

    /// Teardown, idempotent. Room exits, registry removal and the presence
    /// transition all run even when called twice; the second call finds
    /// nothing and does nothing.
    pub async fn disconnect(&self, conn_id: ConnectionId) {
        let rooms_left = self.rooms.drop_connection(conn_id);
        if let Some((user_id, transition)) = self.connections.unregister(conn_id) {
            tracing::info!(%user_id, %conn_id, rooms = rooms_left.len(), "connection closed");
            self.presence.apply(user_id, transition).await;
        }
    }

    /// Wire the bus subscriptions this instance serves:
    ///
    ///   room:*                  room frames from other instances
    ///   user:*:notifications    per-user notification pushes
    ///   broadcast:notifications global announcements
    ///
    /// Notification pushes are delivered only through the bus, including
    /// the instance that produced them; the publish loops back locally.
    pub async fn start_listeners(self: &Arc<Self>) -> AppResult<()> {
        let router = self.clone();
        self.bus
            .subscribe(
                "room:*",
                Arc::new(move |msg: BusMessage| {
                    let router = router.clone();
                    async move { router.on_room_frame(msg) }.boxed()
                }),
            )
            .await?;

        let router = self.clone();
        self.bus
            .subscribe(
                "user:*:notifications",
                Arc::new(move |msg: BusMessage| {
                    let router = router.clone();
                    async move { router.on_user_push(msg) }.boxed()
                }),
            )
            .await?;

        let router = self.clone();
        self.bus
            .subscribe(
                BROADCAST_CHANNEL,
                Arc::new(move |msg: BusMessage| {
                    let router = router.clone();
                    async move {
                        router.connections.broadcast_all(&msg.payload);
                    }
                    .boxed()
                }),
            )
            .await?;

        Ok(())
    }

    fn on_room_frame(&self, msg: BusMessage) {
        let Some(room_id) = msg
            .channel
            .strip_prefix("room:")
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            tracing::warn!(channel = %msg.channel, "unparseable room channel");
            return;
        };

        let frame: RemoteFrame = match serde_json::from_str(&msg.payload) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(%room_id, error = %e, "dropping malformed room frame");
                return;
            }
        };
        if frame.origin == self.instance_id {
            return; // our own publish looping back
        }

        let members = self.rooms.members_of(room_id);
        self.connections.send_to_members(&members, &frame.payload);
    }

    fn on_user_push(&self, msg: BusMessage) {
        let Some(user_id) = msg
            .channel
            .strip_prefix("user:")
            .and_then(|s| s.strip_suffix(":notifications"))
            .and_then(|s| Uuid::parse_str(s).ok())
        else {
            tracing::warn!(channel = %msg.channel, "unparseable user channel");
            return;
        };
        self.connections.send_to_user(user_id, &msg.payload);
    }
}
