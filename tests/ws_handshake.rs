use std::sync::Arc;
use std::time::Duration;

use actix_web::{test, web, App};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use realtime_service::bridge::InMemoryBus;
use realtime_service::config::{BusKind, Config};
use realtime_service::error::{AppError, AppResult};
use realtime_service::notifications::NotificationStore;
use realtime_service::router::EventRouter;
use realtime_service::routes;
use realtime_service::services::{
    ConversationDirectory, IdentityValidator, MessageStore, StoredMessage,
};
use realtime_service::state::AppState;

struct FakeIdentity;

#[async_trait]
impl IdentityValidator for FakeIdentity {
    async fn validate(&self, token: &str) -> AppResult<Uuid> {
        Uuid::parse_str(token).map_err(|_| AppError::Auth("bad token".into()))
    }
}

struct NoRooms;

#[async_trait]
impl ConversationDirectory for NoRooms {
    async fn is_participant(&self, _user_id: Uuid, _room_id: Uuid) -> AppResult<bool> {
        Ok(false)
    }

    async fn list_user_rooms(&self, _user_id: Uuid) -> AppResult<Vec<Uuid>> {
        Ok(Vec::new())
    }
}

struct NoStore;

#[async_trait]
impl MessageStore for NoStore {
    async fn create_message(
        &self,
        room_id: Uuid,
        sender_id: Uuid,
        content: &str,
        kind: &str,
    ) -> AppResult<StoredMessage> {
        Ok(StoredMessage {
            id: Uuid::new_v4(),
            room_id,
            sender_id,
            content: content.to_string(),
            kind: kind.to_string(),
            created_at: Utc::now(),
        })
    }
}

fn test_state() -> AppState {
    let bus = Arc::new(InMemoryBus::new());
    let notifications = Arc::new(NotificationStore::new(
        bus.clone(),
        Duration::from_secs(3600),
    ));
    let router = EventRouter::new(
        bus,
        Arc::new(FakeIdentity),
        Arc::new(NoRooms),
        Arc::new(NoStore),
        notifications.clone(),
    );
    AppState {
        config: Arc::new(Config {
            port: 0,
            redis_url: "redis://127.0.0.1:6379".into(),
            bus: BusKind::Memory,
            jwt_secret: "test-secret".into(),
            messages_service_url: "http://127.0.0.1:0".into(),
            bus_publish_timeout: Duration::from_secs(1),
            bus_retry_delay: Duration::from_secs(1),
            notification_ttl: Duration::from_secs(3600),
        }),
        router,
        notifications,
    }
}

// A plain GET with a valid token but no upgrade headers fails the
// handshake after the registry registration has already happened; the
// handler must undo it, not leak a phantom online user.
#[actix_web::test]
async fn failed_upgrade_leaves_no_registration_behind() {
    let state = test_state();
    let router = state.router.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .service(routes::ws::ws_handler),
    )
    .await;

    let user = Uuid::new_v4();
    let req = test::TestRequest::get()
        .uri(&format!("/ws?token={user}"))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert!(!resp.status().is_success(), "upgrade should be refused");

    assert!(!router.connections().is_online(user));
    assert_eq!(router.connections().connection_count(user), 0);
    assert!(!router.presence().online_users().await.contains(&user));
}

#[actix_web::test]
async fn handshake_without_a_valid_token_registers_nothing() {
    let state = test_state();
    let router = state.router.clone();
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(state))
            .service(routes::ws::ws_handler),
    )
    .await;

    let req = test::TestRequest::get().uri("/ws").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    let req = test::TestRequest::get()
        .uri("/ws?token=not-a-token")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status().as_u16(), 401);

    assert!(router.presence().online_users().await.is_empty());
}
