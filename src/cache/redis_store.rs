//! Redis cache backend.

use crate::cache::CacheStore;
use crate::error::VidsyncError;
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use std::fmt;
use std::time::Duration;
use tracing::info;

/// Redis-backed [`CacheStore`]. The connection manager reconnects on its own, so a
/// Redis outage surfaces as per-call errors that the cache layer absorbs.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
}

impl fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCache")
            .field("conn", &"<ConnectionManager>")
            .finish()
    }
}

impl RedisCache {
    pub async fn connect(redis_url: &str) -> Result<Self, VidsyncError> {
        let client = redis::Client::open(redis_url)?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis");
        Ok(Self { conn })
    }
}

#[async_trait]
impl CacheStore for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VidsyncError> {
        let value: Option<Vec<u8>> = redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), VidsyncError> {
        // PX takes milliseconds; a zero TTL is rejected by Redis.
        let ttl_ms = (ttl.as_millis() as u64).max(1);
        let _: () = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("PX")
            .arg(ttl_ms)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(())
    }

    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), VidsyncError> {
        let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(count)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok((next, keys))
    }

    async fn unlink(&self, keys: &[String]) -> Result<u64, VidsyncError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let removed: u64 = redis::cmd("UNLINK")
            .arg(keys)
            .query_async(&mut self.conn.clone())
            .await?;
        Ok(removed)
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}
