//! Cache module for vidsync.
//!
//! This module provides the cache-aside read path:
//! - Deterministic key derivation from an operation name and its parameters
//! - A versioned MessagePack envelope for cached values
//! - A generic executor that memoizes queries and degrades to direct execution
//! - Scope invalidation via cursor-based scanning
//!
//! Two backends implement [`CacheStore`]: Redis and an in-process map used when
//! no Redis URL is configured (and by the tests).

pub mod codec;
pub mod executor;
pub mod invalidator;
pub mod key;
pub mod memory;
pub mod redis_store;

pub use executor::CacheAside;
pub use invalidator::{CacheInvalidator, InvalidationOutcome};
pub use memory::MemoryCache;
pub use redis_store::RedisCache;

use crate::error::VidsyncError;
use async_trait::async_trait;
use std::time::Duration;

/// Minimal key-value surface the cache-aside layer needs from a backend.
///
/// `get` distinguishes an explicit miss (`Ok(None)`) from a backend failure (`Err`).
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VidsyncError>;

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), VidsyncError>;

    /// One step of a cursor scan. Returns the next cursor (0 once the pass is complete)
    /// and the keys matching `pattern` found in this step, which may be empty.
    async fn scan(
        &self,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> Result<(u64, Vec<String>), VidsyncError>;

    /// Non-blocking delete. Returns the number of keys actually removed.
    async fn unlink(&self, keys: &[String]) -> Result<u64, VidsyncError>;

    /// Short backend name for logs and health output
    fn backend(&self) -> &'static str;
}
