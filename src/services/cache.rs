use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::RwLock;
use tokio::time::Instant;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Short-lived result store shared by workers of one kind.
#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError>;
}

type Entries = HashMap<String, (serde_json::Value, Instant)>;

fn drop_expired(entries: &mut Entries, now: Instant) -> usize {
    let before = entries.len();
    entries.retain(|_, (_, expires)| *expires > now);
    before - entries.len()
}

/// Process-local cache with per-entry expiry. Every write also drops the
/// entries that have expired, so the map stays bounded by the live set.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: RwLock<Entries>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop expired entries; returns how many were removed.
    pub async fn purge_expired(&self) -> usize {
        drop_expired(&mut *self.entries.write().await, Instant::now())
    }

    /// Stored entries, expired ones included until the next write or purge.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let expired = drop_expired(&mut entries, now);
        if expired > 0 {
            tracing::trace!(expired, "Expired cache entries dropped");
        }
        entries.insert(key.to_string(), (value.clone(), now + ttl));
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let entries = self.entries.read().await;
        Ok(entries
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(value, _)| value.clone()))
    }
}

/// Redis-backed cache using `SET key value EX ttl`.
pub struct RedisCache {
    client: redis::Client,
    prefix: String,
}

impl RedisCache {
    pub fn new(redis_url: &str, prefix: impl Into<String>) -> Result<Self, CacheError> {
        let client = redis::Client::open(redis_url)?;
        Ok(Self {
            client,
            prefix: prefix.into(),
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{}", self.prefix, key)
    }

    /// Check Redis connectivity (for health checks).
    pub async fn health_check(&self) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        redis::cmd("PING").query_async::<String>(&mut conn).await?;
        Ok(())
    }
}

#[async_trait]
impl ResultCache for RedisCache {
    async fn set(
        &self,
        key: &str,
        value: &serde_json::Value,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload = serde_json::to_string(value)?;
        conn.set_ex::<_, _, ()>(self.key(key), payload, ttl.as_secs().max(1))
            .await?;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, CacheError> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let payload: Option<String> = conn.get(self.key(key)).await?;
        payload
            .map(|p| serde_json::from_str(&p).map_err(CacheError::from))
            .transpose()
    }
}
