//! Cache-aside execution of read queries.
//!
//! [`CacheAside::execute`] memoizes any query whose parameters are `Serialize`
//! and whose result round-trips through the cache codec. Cache problems never
//! reach the caller: a failed key derivation, read, decode or write degrades to
//! running the query directly.

use crate::cache::{codec, key, CacheStore};
use crate::error::VidsyncError;
use crate::metrics::SharedMetrics;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheAside {
    store: Arc<dyn CacheStore>,
    namespace: String,
    ttl: Duration,
    metrics: SharedMetrics,
}

impl CacheAside {
    pub fn new(
        store: Arc<dyn CacheStore>,
        namespace: impl Into<String>,
        ttl: Duration,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            ttl,
            metrics,
        }
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    /// Return the cached result of `operation(params)`, or compute it with `query`
    /// and populate the cache.
    ///
    /// Only errors returned by `query` itself are propagated; they are never cached.
    pub async fn execute<P, T, F, Fut>(
        &self,
        operation: &str,
        params: P,
        query: F,
    ) -> Result<T, VidsyncError>
    where
        P: Serialize,
        T: Serialize + DeserializeOwned,
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<T, VidsyncError>>,
    {
        let start = Instant::now();

        // 1. Derive the key; without one there is nothing to cache
        let cache_key = match key::derive_key(&self.namespace, operation, &params) {
            Ok(k) => k,
            Err(e) => {
                warn!(query = operation, error = %e, "Failed to derive cache key, executing directly");
                self.metrics.record_cache(operation, "key_error");
                let result = query(params).await;
                self.metrics
                    .record_query(operation, start.elapsed().as_secs_f64());
                return result;
            }
        };

        // 2. Try the cache
        match self.store.get(&cache_key).await {
            Ok(Some(bytes)) => match codec::decode::<T>(&bytes) {
                Ok(envelope) => {
                    debug!(
                        query = operation,
                        key = %cache_key,
                        cached_at = %envelope.cached_at,
                        "Cache HIT"
                    );
                    self.metrics.record_cache(operation, "hit");
                    self.metrics
                        .record_query(operation, start.elapsed().as_secs_f64());
                    return Ok(envelope.data);
                }
                Err(e) => {
                    warn!(key = %cache_key, error = %e, "Failed to decode cached result");
                    self.metrics.record_cache(operation, "decode_error");
                }
            },
            Ok(None) => {
                debug!(query = operation, key = %cache_key, "Cache MISS");
                self.metrics.record_cache(operation, "miss");
            }
            Err(e) => {
                warn!(query = operation, key = %cache_key, error = %e, "Failed to read from cache");
                self.metrics.record_cache(operation, "error");
            }
        }

        // 3. Compute and populate
        let result = self.execute_and_populate(&cache_key, params, query).await;
        self.metrics
            .record_query(operation, start.elapsed().as_secs_f64());
        result
    }

    async fn execute_and_populate<P, T, F, Fut>(
        &self,
        cache_key: &str,
        params: P,
        query: F,
    ) -> Result<T, VidsyncError>
    where
        T: Serialize,
        F: FnOnce(P) -> Fut,
        Fut: Future<Output = Result<T, VidsyncError>>,
    {
        let result = query(params).await?;

        let encoded = match codec::encode(&result) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %cache_key, error = %e, "Failed to encode query result");
                return Ok(result);
            }
        };

        if let Err(e) = self.store.set(cache_key, encoded, self.ttl).await {
            warn!(key = %cache_key, error = %e, "Failed to set cache");
            self.metrics.cache_write_errors_total.inc();
        }

        Ok(result)
    }
}
