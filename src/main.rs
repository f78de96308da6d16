use std::sync::Arc;

use actix_web::{web, App, HttpServer};
use realtime_service::{
    bridge::{InMemoryBus, MessageBus, RedisBus},
    config::{self, BusKind},
    error, logging,
    notifications::NotificationStore,
    router::EventRouter,
    routes,
    services::{JwtValidator, MessagesClient},
    state::AppState,
};

#[actix_web::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = Arc::new(config::Config::from_env()?);

    let bus: Arc<dyn MessageBus> = match cfg.bus {
        BusKind::Redis => Arc::new(
            RedisBus::connect(&cfg.redis_url, cfg.bus_publish_timeout, cfg.bus_retry_delay)
                .await?,
        ),
        BusKind::Memory => {
            tracing::warn!("in-memory bus selected, cross-instance delivery disabled");
            Arc::new(InMemoryBus::new())
        }
    };

    let identity = Arc::new(JwtValidator::new(&cfg.jwt_secret));
    let messages = Arc::new(MessagesClient::new(&cfg.messages_service_url));
    let notifications = Arc::new(NotificationStore::new(bus.clone(), cfg.notification_ttl));

    let router = EventRouter::new(
        bus,
        identity,
        messages.clone(),
        messages,
        notifications.clone(),
    );
    router.start_listeners().await?;

    let state = AppState {
        config: cfg.clone(),
        router,
        notifications,
    };

    let bind_addr = format!("0.0.0.0:{}", cfg.port);
    tracing::info!(%bind_addr, "starting realtime-service");

    HttpServer::new(move || {
        let cors = actix_cors::Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .wrap(cors)
            .app_data(web::Data::new(state.clone()))
            .service(routes::ws::ws_handler)
            .service(routes::notifications::send_notification)
            .service(routes::notifications::broadcast_notification)
            .service(routes::notifications::list_notifications)
            .service(routes::notifications::unread_count)
            .service(routes::notifications::mark_read)
            .route("/health", web::get().to(|| async { "OK" }))
    })
    .bind(&bind_addr)
    .map_err(|e| error::AppError::StartServer(format!("bind: {e}")))?
    .run()
    .await
    .map_err(|e| error::AppError::StartServer(format!("run: {e}")))
}
