use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::{ConversationDirectory, MessageStore, StoredMessage};

/// HTTP client for the conversation/message storage service.
///
/// Implements both collaborator seams against the storage service's
/// internal REST API; the realtime core never touches the database itself.
pub struct MessagesClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ParticipantResponse {
    participant: bool,
}

#[derive(Debug, Deserialize)]
struct RejectionBody {
    error: String,
}

impl MessagesClient {
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn transport_err(e: reqwest::Error) -> AppError {
        tracing::error!(error = %e, "messages service unreachable");
        AppError::Internal
    }

    async fn rejection_reason(resp: reqwest::Response) -> String {
        resp.json::<RejectionBody>()
            .await
            .map(|b| b.error)
            .unwrap_or_else(|_| "storage refused the request".to_string())
    }
}

#[async_trait]
impl ConversationDirectory for MessagesClient {
    async fn is_participant(&self, user_id: Uuid, room_id: Uuid) -> AppResult<bool> {
        let url = format!(
            "{}/internal/conversations/{room_id}/participants/{user_id}",
            self.base_url
        );
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        match resp.status() {
            StatusCode::OK => {
                let body: ParticipantResponse =
                    resp.json().await.map_err(Self::transport_err)?;
                Ok(body.participant)
            }
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                tracing::error!(%status, "participant lookup failed");
                Err(AppError::Internal)
            }
        }
    }

    async fn list_user_rooms(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let url = format!("{}/internal/users/{user_id}/conversations", self.base_url);
        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(Self::transport_err)?;

        if !resp.status().is_success() {
            tracing::error!(status = %resp.status(), "conversation preload failed");
            return Err(AppError::Internal);
        }
        resp.json::<Vec<Uuid>>().await.map_err(Self::transport_err)
    }
}

#[async_trait]
impl MessageStore for MessagesClient {
    async fn create_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: &str,
    ) -> AppResult<StoredMessage> {
        let url = format!("{}/internal/messages", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&serde_json::json!({
                "conversation_id": room_id,
                "sender_id": sender_id,
                "content": content,
                "type": kind,
            }))
            .send()
            .await
            .map_err(Self::transport_err)?;

        match resp.status() {
            s if s.is_success() => resp.json().await.map_err(Self::transport_err),
            StatusCode::NOT_FOUND => Err(AppError::NotFound),
            StatusCode::FORBIDDEN => Err(AppError::NotAuthorized),
            _ => Err(AppError::StorageRejected(
                Self::rejection_reason(resp).await,
            )),
        }
    }
}
