use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::notifications::Notification;
use crate::services::StoredMessage;

fn default_message_kind() -> String {
    "text".to_string()
}

/// Inbound client events, one tagged union consumed by the per-connection
/// dispatch loop. All of them are handled in the `Authenticated` state and
/// none changes the connection's lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "join_room")]
    JoinRoom { room_id: Uuid },

    #[serde(rename = "leave_room")]
    LeaveRoom { room_id: Uuid },

    // `kind` stays `kind` on the wire: the envelope's internal tag already
    // owns the `type` key.
    #[serde(rename = "send_message")]
    SendMessage {
        room_id: Uuid,
        content: String,
        #[serde(default = "default_message_kind")]
        kind: String,
    },

    #[serde(rename = "typing_start")]
    TypingStart { room_id: Uuid },

    #[serde(rename = "typing_stop")]
    TypingStop { room_id: Uuid },

    #[serde(rename = "mark_notification_read")]
    MarkNotificationRead { notification_id: Uuid },

    #[serde(rename = "get_online_users")]
    GetOnlineUsers,
}

/// Whether an accepted message also reached the bus for cross-instance
/// delivery, or only the local fan-out set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delivery {
    /// Stored and published for other instances.
    Broadcast,
    /// Stored, but the bridge publish failed; local members got it, remote
    /// members will not until they fetch history.
    Stored,
}

/// Outbound server events and acks.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "new_message")]
    NewMessage { message: StoredMessage, room_id: Uuid },

    #[serde(rename = "user_online")]
    UserOnline { user_id: Uuid },

    #[serde(rename = "user_offline")]
    UserOffline { user_id: Uuid },

    #[serde(rename = "user_typing")]
    UserTyping {
        user_id: Uuid,
        room_id: Uuid,
        is_typing: bool,
    },

    #[serde(rename = "new_notification")]
    NewNotification { notification: Notification },

    #[serde(rename = "joined_room")]
    JoinedRoom { room_id: Uuid },

    #[serde(rename = "left_room")]
    LeftRoom { room_id: Uuid },

    #[serde(rename = "notification_marked_read")]
    NotificationMarkedRead { notification_id: Uuid },

    #[serde(rename = "online_users")]
    OnlineUsers { users: Vec<Uuid> },

    #[serde(rename = "message_sent")]
    MessageSent {
        message: StoredMessage,
        delivery: Delivery,
    },

    #[serde(rename = "error")]
    Error { error: String },
}

impl ServerEvent {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Envelope carried on `room:<id>` bus channels. The origin instance id
/// lets every instance skip its own frames: local members were already
/// served from the pre-publish snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFrame {
    pub origin: Uuid,
    pub payload: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_events_parse_from_wire_names() {
        let evt: ClientEvent =
            serde_json::from_str(r#"{"type":"join_room","room_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6"}"#)
                .unwrap();
        assert!(matches!(evt, ClientEvent::JoinRoom { .. }));

        let evt: ClientEvent = serde_json::from_str(
            r#"{"type":"send_message","room_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","content":"hi"}"#,
        )
        .unwrap();
        match evt {
            ClientEvent::SendMessage { kind, content, .. } => {
                assert_eq!(kind, "text"); // defaulted
                assert_eq!(content, "hi");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let evt: ClientEvent = serde_json::from_str(
            r#"{"type":"send_message","room_id":"3fa85f64-5717-4562-b3fc-2c963f66afa6","content":"pic","kind":"image"}"#,
        )
        .unwrap();
        match evt {
            ClientEvent::SendMessage { kind, .. } => assert_eq!(kind, "image"),
            other => panic!("unexpected event: {other:?}"),
        }

        let evt: ClientEvent = serde_json::from_str(r#"{"type":"get_online_users"}"#).unwrap();
        assert!(matches!(evt, ClientEvent::GetOnlineUsers));
    }

    #[test]
    fn outbound_events_carry_wire_names() {
        let user_id = Uuid::new_v4();
        let json = ServerEvent::UserOnline { user_id }.to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "user_online");
        assert_eq!(value["user_id"], user_id.to_string());

        let json = ServerEvent::UserTyping {
            user_id,
            room_id: Uuid::new_v4(),
            is_typing: true,
        }
        .to_json()
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["type"], "user_typing");
        assert_eq!(value["is_typing"], true);
    }
}
