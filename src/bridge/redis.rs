use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::{sleep, timeout};

use crate::error::{AppError, AppResult};

use super::{BusHandler, BusMessage, MessageBus};

/// Redis-backed bus: pub/sub channels for cross-instance fan-out, plain
/// key/value, set and list commands for shared state.
///
/// Commands go through a multiplexed [`ConnectionManager`]; each
/// subscription holds its own dedicated connection (PSUBSCRIBE cannot share
/// a multiplexed one) inside a retry loop that re-establishes it with a
/// fixed delay, indefinitely. Publishes are bounded by `publish_timeout` and
/// fail with `BridgeUnavailable` instead of blocking the caller.
pub struct RedisBus {
    client: Client,
    manager: ConnectionManager,
    publish_timeout: Duration,
    retry_delay: Duration,
}

impl RedisBus {
    pub async fn connect(
        redis_url: &str,
        publish_timeout: Duration,
        retry_delay: Duration,
    ) -> AppResult<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| AppError::Config(format!("invalid REDIS_URL: {e}")))?;
        let manager = ConnectionManager::new(client.clone()).await?;
        Ok(Self {
            client,
            manager,
            publish_timeout,
            retry_delay,
        })
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        match timeout(
            self.publish_timeout,
            conn.publish::<_, _, ()>(channel, payload),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(AppError::BridgeUnavailable(e.to_string())),
            Err(_) => Err(AppError::BridgeUnavailable(format!(
                "publish to {channel} timed out after {:?}",
                self.publish_timeout
            ))),
        }
    }

    async fn subscribe(&self, pattern: &str, handler: BusHandler) -> AppResult<()> {
        let client = self.client.clone();
        let pattern = pattern.to_owned();
        let retry_delay = self.retry_delay;

        tokio::spawn(async move {
            loop {
                let pubsub = match client.get_async_connection().await {
                    Ok(conn) => conn.into_pubsub(),
                    Err(e) => {
                        tracing::warn!(%pattern, error = %e, "bus connection failed, retrying");
                        sleep(retry_delay).await;
                        continue;
                    }
                };

                let mut pubsub = pubsub;
                if let Err(e) = pubsub.psubscribe(&pattern).await {
                    tracing::warn!(%pattern, error = %e, "psubscribe failed, retrying");
                    sleep(retry_delay).await;
                    continue;
                }
                tracing::info!(%pattern, "bus subscription established");

                let mut stream = pubsub.on_message();
                while let Some(msg) = stream.next().await {
                    let channel: String = msg.get_channel_name().into();
                    let payload: String = match msg.get_payload() {
                        Ok(p) => p,
                        Err(e) => {
                            tracing::warn!(%channel, error = %e, "undecodable bus payload, skipping");
                            continue;
                        }
                    };
                    // One bad message must not unsubscribe: handlers run on
                    // their own task and log their own failures.
                    let handler = handler.clone();
                    tokio::spawn(async move {
                        handler(BusMessage { channel, payload }).await;
                    });
                }

                tracing::warn!(%pattern, "bus subscription lost, reconnecting");
                sleep(retry_delay).await;
            }
        });

        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl.as_secs()).await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.get(key).await?)
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.del::<_, ()>(key).await?;
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.sadd::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.srem::<_, _, ()>(key, member).await?;
        Ok(())
    }

    async fn set_members(&self, key: &str) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.smembers(key).await?)
    }

    async fn list_push(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        let mut conn = self.manager.clone();
        conn.lpush::<_, _, ()>(key, value).await?;
        conn.expire::<_, ()>(key, ttl.as_secs() as i64).await?;
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let mut conn = self.manager.clone();
        Ok(conn.lrange(key, start, stop).await?)
    }
}
