use dotenvy::dotenv;
use std::env;
use std::time::Duration;

use crate::error::AppError;

/// Which backing implementation the pub/sub bridge uses.
///
/// `Memory` is for single-instance deployments and tests; `Redis` is the
/// multi-instance bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Redis,
    Memory,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub bus: BusKind,
    pub jwt_secret: String,
    /// Base URL of the conversation/message storage service.
    pub messages_service_url: String,
    /// Bounded wait for a single bus publish before degrading to local-only.
    pub bus_publish_timeout: Duration,
    /// Fixed delay between subscription re-establishment attempts.
    pub bus_retry_delay: Duration,
    /// Retention for stored notifications (30 days by default).
    pub notification_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        dotenv().ok();

        let port = env::var("PORT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(3004);
        let redis_url = env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());

        let bus = match env::var("BUS").as_deref() {
            Ok("memory") => BusKind::Memory,
            Ok("redis") | Err(_) => BusKind::Redis,
            Ok(other) => {
                return Err(AppError::Config(format!(
                    "BUS must be 'redis' or 'memory', got '{other}'"
                )))
            }
        };

        let jwt_secret =
            env::var("JWT_SECRET").map_err(|_| AppError::Config("JWT_SECRET missing".into()))?;

        let messages_service_url = env::var("MESSAGES_SERVICE_URL")
            .unwrap_or_else(|_| "http://messages-service:3003".into());

        let bus_publish_timeout = Duration::from_millis(
            env::var("BUS_PUBLISH_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2_000),
        );
        let bus_retry_delay = Duration::from_millis(
            env::var("BUS_RETRY_DELAY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(2_000),
        );
        let notification_ttl = Duration::from_secs(
            env::var("NOTIFICATION_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(30 * 24 * 60 * 60),
        );

        Ok(Self {
            port,
            redis_url,
            bus,
            jwt_secret,
            messages_service_url,
            bus_publish_timeout,
            bus_retry_delay,
            notification_ttl,
        })
    }
}
