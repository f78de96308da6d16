use actix_web::{get, post, web, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::AppResult;
use crate::notifications::NotificationKind;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SendNotificationRequest {
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub data: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct MarkReadRequest {
    pub user_id: Uuid,
}

/// Internal API for other services to push a notification to one user.
#[post("/notifications/send")]
pub async fn send_notification(
    state: web::Data<AppState>,
    body: web::Json<SendNotificationRequest>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    let notification = state
        .notifications
        .send(body.user_id, body.kind, body.title, body.message, body.data)
        .await?;
    Ok(HttpResponse::Ok().json(notification))
}

/// System-wide announcement to every connected user on every instance.
#[post("/notifications/broadcast")]
pub async fn broadcast_notification(
    state: web::Data<AppState>,
    body: web::Json<BroadcastRequest>,
) -> AppResult<HttpResponse> {
    let body = body.into_inner();
    let notification = state
        .notifications
        .broadcast(body.kind, body.title, body.message, body.data)
        .await?;
    Ok(HttpResponse::Ok().json(notification))
}

#[get("/notifications/user/{user_id}")]
pub async fn list_notifications(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    query: web::Query<Pagination>,
) -> AppResult<HttpResponse> {
    let user_id = path.into_inner();
    let limit = query.limit.unwrap_or(20).min(100);
    let offset = query.offset.unwrap_or(0);

    let notifications = state.notifications.list(user_id, limit, offset).await?;
    Ok(HttpResponse::Ok().json(json!({ "notifications": notifications })))
}

#[get("/notifications/user/{user_id}/unread-count")]
pub async fn unread_count(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
) -> AppResult<HttpResponse> {
    let count = state.notifications.unread_count(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(json!({ "count": count })))
}

#[post("/notifications/{notification_id}/read")]
pub async fn mark_read(
    state: web::Data<AppState>,
    path: web::Path<Uuid>,
    body: web::Json<MarkReadRequest>,
) -> AppResult<HttpResponse> {
    state
        .notifications
        .mark_read(path.into_inner(), body.user_id)
        .await?;
    Ok(HttpResponse::Ok().json(json!({ "success": true })))
}
