use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppResult;

pub mod auth;
pub mod messages_client;

pub use auth::JwtValidator;
pub use messages_client::MessagesClient;

/// A chat message accepted and persisted by the storage collaborator.
/// Fanned out to room members verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
}

/// Validates handshake tokens. Consumed once per connection; a refusal
/// closes the handshake without registering anything.
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Returns the authenticated user id, or `AppError::Auth`.
    async fn validate(&self, token: &str) -> AppResult<Uuid>;
}

/// Conversation/participant lookups, consumed on join and at connection
/// establishment to preload the user's rooms.
#[async_trait]
pub trait ConversationDirectory: Send + Sync {
    async fn is_participant(&self, user_id: Uuid, room_id: Uuid) -> AppResult<bool>;
    async fn list_user_rooms(&self, user_id: Uuid) -> AppResult<Vec<Uuid>>;
}

/// Message persistence. A refusal (`AppError::StorageRejected`,
/// `AppError::NotFound`, `AppError::NotAuthorized`) fails the whole send.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn create_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: &str,
    ) -> AppResult<StoredMessage>;
}
