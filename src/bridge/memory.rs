use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

use super::{pattern_matches, BusHandler, BusMessage, MessageBus};

/// In-process bus for single-instance deployments and tests.
///
/// Channels loop straight back to local subscribers on a spawned dispatch
/// task; storage lives in plain maps with lazily-enforced TTLs. The
/// `online` switch models a dropped bus connection on the channel half:
/// while offline, publishes fail fast and are dropped, matching the
/// best-effort contract of the real bus.
#[derive(Default)]
pub struct InMemoryBus {
    kv: DashMap<String, (String, Option<Instant>)>,
    sets: DashMap<String, HashSet<String>>,
    lists: DashMap<String, Vec<String>>,
    subscribers: RwLock<Vec<(String, BusHandler)>>,
    offline: AtomicBool,
}

impl InMemoryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the bus connection dropping or coming back.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    fn live_value(&self, key: &str) -> Option<String> {
        let entry = self.kv.get(key)?;
        let (value, expires_at) = entry.value();
        if let Some(deadline) = expires_at {
            if Instant::now() >= *deadline {
                drop(entry);
                self.kv.remove(key);
                return None;
            }
        }
        Some(value.clone())
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, channel: &str, payload: &str) -> AppResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(AppError::BridgeUnavailable("bus offline".into()));
        }

        let subscribers = self.subscribers.read().await;
        for (pattern, handler) in subscribers.iter() {
            if pattern_matches(pattern, channel) {
                let handler = handler.clone();
                let msg = BusMessage {
                    channel: channel.to_owned(),
                    payload: payload.to_owned(),
                };
                tokio::spawn(async move {
                    handler(msg).await;
                });
            }
        }
        Ok(())
    }

    async fn subscribe(&self, pattern: &str, handler: BusHandler) -> AppResult<()> {
        self.subscribers
            .write()
            .await
            .push((pattern.to_owned(), handler));
        Ok(())
    }

    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.kv.insert(
            key.to_owned(),
            (value.to_owned(), Some(Instant::now() + ttl)),
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.live_value(key))
    }

    async fn del(&self, key: &str) -> AppResult<()> {
        self.kv.remove(key);
        Ok(())
    }

    async fn set_add(&self, key: &str, member: &str) -> AppResult<()> {
        self.sets
            .entry(key.to_owned())
            .or_default()
            .insert(member.to_owned());
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: &str) -> AppResult<()> {
        if let Some(mut set) = self.sets.get_mut(key) {
            set.remove(member);
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> AppResult<Vec<String>> {
        Ok(self
            .sets
            .get(key)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_push(&self, key: &str, value: &str, _ttl: Duration) -> AppResult<()> {
        self.lists
            .entry(key.to_owned())
            .or_default()
            .insert(0, value.to_owned());
        Ok(())
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> AppResult<Vec<String>> {
        let list = match self.lists.get(key) {
            Some(list) => list,
            None => return Ok(Vec::new()),
        };
        let len = list.len() as isize;
        let clamp = |i: isize| -> usize {
            let i = if i < 0 { len + i } else { i };
            i.clamp(0, len.max(0)) as usize
        };
        let start = clamp(start);
        let stop = (clamp(stop) + 1).min(list.len());
        if start >= stop {
            return Ok(Vec::new());
        }
        Ok(list[start..stop].to_vec())
    }
}
