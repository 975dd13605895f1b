//! Scope invalidation by cursor scanning.

use crate::cache::{key, CacheStore};
use crate::error::VidsyncError;
use crate::metrics::SharedMetrics;
use std::sync::Arc;
use tracing::{info, warn};

/// Upper bound on scan steps in one pass, in case a backend never returns cursor 0
const MAX_SCAN_ITERATIONS: usize = 100_000;

/// Result of one invalidation pass.
#[derive(Debug, Default)]
pub struct InvalidationOutcome {
    /// Keys actually removed
    pub deleted: u64,
    /// Non-empty batches submitted for deletion
    pub batches: usize,
    /// Set when the scan itself failed and the pass stopped early
    pub error: Option<VidsyncError>,
}

impl InvalidationOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Clone)]
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    namespace: String,
    batch_size: usize,
    metrics: SharedMetrics,
}

impl CacheInvalidator {
    pub fn new(
        store: Arc<dyn CacheStore>,
        namespace: impl Into<String>,
        batch_size: usize,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            batch_size: batch_size.max(1),
            metrics,
        }
    }

    /// Delete every key under `scope` (an operation name), or the whole namespace
    /// when `scope` is `None`.
    pub async fn invalidate_scope(&self, scope: Option<&str>) -> InvalidationOutcome {
        let pattern = key::scope_pattern(&self.namespace, scope);
        let mut outcome = InvalidationOutcome::default();
        let mut cursor = 0u64;

        for _ in 0..MAX_SCAN_ITERATIONS {
            let (next, keys) = match self.store.scan(cursor, &pattern, self.batch_size).await {
                Ok(step) => step,
                Err(e) => {
                    warn!(pattern = %pattern, error = %e, "Cache scan failed, stopping invalidation");
                    outcome.error = Some(e);
                    break;
                }
            };

            if !keys.is_empty() {
                outcome.batches += 1;
                match self.store.unlink(&keys).await {
                    Ok(removed) => outcome.deleted += removed,
                    Err(e) => {
                        warn!(
                            pattern = %pattern,
                            batch = keys.len(),
                            error = %e,
                            "Failed to delete cache batch"
                        );
                    }
                }
            }

            // SCAN may return empty batches mid-pass; only cursor 0 ends it
            if next == 0 {
                break;
            }
            cursor = next;
        }

        self.metrics
            .cache_invalidated_keys_total
            .inc_by(outcome.deleted as f64);

        info!(
            pattern = %pattern,
            deleted = outcome.deleted,
            batches = outcome.batches,
            complete = outcome.is_complete(),
            "Cache invalidation pass finished"
        );

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::metrics::create_metrics;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    async fn seeded(matching: usize, other: usize) -> Arc<MemoryCache> {
        let cache = Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(60);
        for i in 0..matching {
            cache
                .set(&format!("videos:get_latest_videos:{:04}", i), vec![1], ttl)
                .await
                .unwrap();
        }
        for i in 0..other {
            cache
                .set(&format!("videos:other_op:{:04}", i), vec![1], ttl)
                .await
                .unwrap();
        }
        cache
    }

    #[tokio::test]
    async fn test_scope_deletes_exactly_matching_keys() {
        let cache = seeded(25, 4).await;
        let invalidator = CacheInvalidator::new(cache.clone(), "videos", 10, create_metrics());

        let outcome = invalidator
            .invalidate_scope(Some("get_latest_videos"))
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.deleted, 25);
        assert!(outcome.batches >= 3);
        assert_eq!(cache.len(), 4);
    }

    #[tokio::test]
    async fn test_whole_namespace() {
        let cache = seeded(5, 5).await;
        cache
            .set("clips:x:1", vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        let invalidator = CacheInvalidator::new(cache.clone(), "videos", 1000, create_metrics());

        let outcome = invalidator.invalidate_scope(None).await;
        assert_eq!(outcome.deleted, 10);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_namespace_issues_no_delete() {
        let cache = Arc::new(MemoryCache::new());
        let invalidator = CacheInvalidator::new(cache, "videos", 10, create_metrics());

        let outcome = invalidator.invalidate_scope(None).await;
        assert!(outcome.is_complete());
        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.batches, 0);
    }

    #[tokio::test]
    async fn test_empty_batches_before_matches_do_not_end_the_pass() {
        let cache = Arc::new(MemoryCache::new());
        let ttl = Duration::from_secs(60);
        for i in 0..10 {
            cache
                .set(&format!("videos:other_op:{:04}", i), vec![1], ttl)
                .await
                .unwrap();
        }
        for i in 0..3 {
            cache
                .set(&format!("videos:get_latest_videos:{:04}", i), vec![1], ttl)
                .await
                .unwrap();
        }
        let invalidator = CacheInvalidator::new(cache.clone(), "videos", 5, create_metrics());

        // The first two scan steps match nothing but return a nonzero cursor
        let outcome = invalidator
            .invalidate_scope(Some("get_latest_videos"))
            .await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.deleted, 3);
        assert_eq!(outcome.batches, 1);
        assert_eq!(cache.len(), 10);
    }

    /// Delegates to a memory cache but fails every other unlink
    struct FlakyUnlink {
        inner: Arc<MemoryCache>,
        unlinks: AtomicUsize,
    }

    #[async_trait]
    impl CacheStore for FlakyUnlink {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, VidsyncError> {
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), VidsyncError> {
            self.inner.set(key, value, ttl).await
        }

        async fn scan(
            &self,
            cursor: u64,
            pattern: &str,
            count: usize,
        ) -> Result<(u64, Vec<String>), VidsyncError> {
            self.inner.scan(cursor, pattern, count).await
        }

        async fn unlink(&self, keys: &[String]) -> Result<u64, VidsyncError> {
            if self.unlinks.fetch_add(1, Ordering::SeqCst) % 2 == 0 {
                return Err(VidsyncError::CacheUnavailable("timeout".into()));
            }
            self.inner.unlink(keys).await
        }

        fn backend(&self) -> &'static str {
            "flaky"
        }
    }

    #[tokio::test]
    async fn test_failed_batch_does_not_stop_the_pass() {
        let inner = seeded(20, 0).await;
        let flaky = Arc::new(FlakyUnlink {
            inner: inner.clone(),
            unlinks: AtomicUsize::new(0),
        });
        let invalidator = CacheInvalidator::new(flaky.clone(), "videos", 5, create_metrics());

        let outcome = invalidator.invalidate_scope(None).await;

        assert!(outcome.is_complete());
        assert_eq!(outcome.batches, 4);
        assert_eq!(flaky.unlinks.load(Ordering::SeqCst), 4);
        assert_eq!(outcome.deleted, 10);
        assert_eq!(inner.len(), 10);
    }

    struct BrokenScan;

    #[async_trait]
    impl CacheStore for BrokenScan {
        async fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, VidsyncError> {
            Ok(None)
        }

        async fn set(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) -> Result<(), VidsyncError> {
            Ok(())
        }

        async fn scan(
            &self,
            _cursor: u64,
            _pattern: &str,
            _count: usize,
        ) -> Result<(u64, Vec<String>), VidsyncError> {
            Err(VidsyncError::CacheUnavailable("connection reset".into()))
        }

        async fn unlink(&self, _keys: &[String]) -> Result<u64, VidsyncError> {
            Ok(0)
        }

        fn backend(&self) -> &'static str {
            "broken"
        }
    }

    #[tokio::test]
    async fn test_scan_failure_is_reported() {
        let invalidator = CacheInvalidator::new(Arc::new(BrokenScan), "videos", 10, create_metrics());
        let outcome = invalidator.invalidate_scope(None).await;
        assert!(!outcome.is_complete());
        assert!(matches!(outcome.error, Some(VidsyncError::CacheUnavailable(_))));
        assert_eq!(outcome.deleted, 0);
    }
}
