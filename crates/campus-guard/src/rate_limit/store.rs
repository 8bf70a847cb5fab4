//! Rate limit record storage: process memory or Redis.

use anyhow::{Context, Result};
use async_trait::async_trait;
use campus_common::RateLimitRecord;
use campus_common::constants::redis_keys::RATELIMIT_PREFIX;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Backing store for rate limit records
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn load(&self, key: &str) -> Result<Option<RateLimitRecord>>;

    /// Persist a record. `ttl_secs` is how long the record stays meaningful.
    async fn save(&self, record: &RateLimitRecord, ttl_secs: u64) -> Result<()>;

    async fn remove(&self, key: &str) -> Result<()>;

    /// Short name for logs and health output
    fn backend_name(&self) -> &'static str;
}

/// Process-local store. Cleared on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, (RateLimitRecord, Instant)>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live (unexpired) records
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let records = self.records.read().await;
        records.values().filter(|(_, expires)| *expires > now).count()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn load(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(key)
            .filter(|(_, expires)| *expires > Instant::now())
            .map(|(record, _)| record.clone()))
    }

    async fn save(&self, record: &RateLimitRecord, ttl_secs: u64) -> Result<()> {
        let expires = Instant::now() + Duration::from_secs(ttl_secs.max(1));
        let mut records = self.records.write().await;
        // Expired entries are dropped lazily on write
        let now = Instant::now();
        records.retain(|_, (_, e)| *e > now);
        records.insert(record.identifier.clone(), (record.clone(), expires));
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.write().await.remove(key);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Redis-backed store shared by every instance pointed at the same server
pub struct RedisStore {
    redis: redis::aio::ConnectionManager,
}

impl RedisStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client =
            redis::Client::open(redis_url).context("Failed to create Redis client")?;
        let redis = redis::aio::ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;
        Ok(Self { redis })
    }

    pub fn connection(&self) -> redis::aio::ConnectionManager {
        self.redis.clone()
    }

    fn key(identifier: &str) -> String {
        format!("{}{}", RATELIMIT_PREFIX, identifier)
    }
}

#[async_trait]
impl RecordStore for RedisStore {
    async fn load(&self, key: &str) -> Result<Option<RateLimitRecord>> {
        let mut conn = self.redis.clone();
        let data: Option<String> = conn.get(Self::key(key)).await?;

        match data {
            Some(d) => Ok(Some(
                serde_json::from_str(&d).context("Corrupt rate limit record")?,
            )),
            None => Ok(None),
        }
    }

    async fn save(&self, record: &RateLimitRecord, ttl_secs: u64) -> Result<()> {
        let mut conn = self.redis.clone();
        let data = serde_json::to_string(record)?;
        conn.set_ex::<_, _, ()>(Self::key(&record.identifier), data, ttl_secs.max(1))
            .await?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.del::<_, ()>(Self::key(key)).await?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
