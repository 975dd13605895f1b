//! Background ingestion loop.
//!
//! Every tick picks the current credential, searches for videos published after
//! the watermark, feeds the results through the upsert writer and advances the
//! watermark. How the upstream answered decides what happens to the credential:
//! quota exhaustion rotates past it, transport failures and rejections remove it.

use crate::cache::CacheInvalidator;
use crate::error::VidsyncError;
use crate::ingest::credentials::{mask_credential, CredentialPool};
use crate::ingest::watermark::{Watermark, WatermarkPolicy};
use crate::ingest::writer::{UpsertWriter, WriteStatus};
use crate::metrics::SharedMetrics;
use crate::model::{format_timestamp, Video};
use crate::services::videos::GET_LATEST_VIDEOS;
use crate::services::youtube::{classify, ResponseClass, SearchClient};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Configuration for the ingestion loop
#[derive(Debug, Clone)]
pub struct IngestorConfig {
    /// Fixed search query
    pub search_query: String,
    /// Tick interval
    pub fetch_interval: Duration,
    /// How far back the first search reaches
    pub lookback: Duration,
    /// Recheck interval while the credential pool is empty
    pub key_poll_interval: Duration,
    pub watermark_policy: WatermarkPolicy,
    /// Drop cached `get_latest_videos` results after a tick that inserted rows
    pub invalidate_on_ingest: bool,
}

impl Default for IngestorConfig {
    fn default() -> Self {
        Self {
            search_query: "news".to_string(),
            fetch_interval: Duration::from_secs(10),
            lookback: Duration::from_secs(100 * 60),
            key_poll_interval: Duration::from_secs(10),
            watermark_policy: WatermarkPolicy::Sliding,
            invalidate_on_ingest: false,
        }
    }
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Completed {
        fetched: usize,
        inserted: usize,
        duplicates: usize,
        failed: usize,
    },
    /// Credential was out of quota and the pool rotated past it
    QuotaRotated,
    /// Tick ended early; the reason is for logs
    Aborted(String),
    /// Shutdown was requested while waiting for a credential
    Cancelled,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Completed { .. } => "completed",
            TickOutcome::QuotaRotated => "quota_rotated",
            TickOutcome::Aborted(_) => "aborted",
            TickOutcome::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TickOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TickOutcome::Aborted(reason) => write!(f, "aborted: {}", reason),
            other => write!(f, "{}", other.as_str()),
        }
    }
}

/// Shared, read-only view of the watermark (used by the health endpoint)
pub type WatermarkHandle = Arc<Mutex<Watermark>>;

pub struct Ingestor {
    pool: Arc<CredentialPool>,
    client: Arc<dyn SearchClient>,
    writer: UpsertWriter,
    config: IngestorConfig,
    metrics: SharedMetrics,
    invalidator: Option<CacheInvalidator>,
    watermark: WatermarkHandle,
    shutdown_rx: watch::Receiver<bool>,
}

impl Ingestor {
    pub fn new(
        pool: Arc<CredentialPool>,
        client: Arc<dyn SearchClient>,
        writer: UpsertWriter,
        config: IngestorConfig,
        metrics: SharedMetrics,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        let watermark = Watermark::starting_at(Utc::now(), config.lookback, config.watermark_policy);
        metrics
            .ingest_watermark_seconds
            .set(watermark.get().timestamp() as f64);

        Self {
            pool,
            client,
            writer,
            config,
            metrics,
            invalidator: None,
            watermark: Arc::new(Mutex::new(watermark)),
            shutdown_rx,
        }
    }

    /// Attach the invalidator used when `invalidate_on_ingest` is enabled
    pub fn with_invalidator(mut self, invalidator: CacheInvalidator) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    pub fn watermark(&self) -> WatermarkHandle {
        self.watermark.clone()
    }

    /// Run ticks on a fixed interval until shutdown. An in-flight tick always finishes.
    pub async fn run(&self) {
        info!(
            interval_secs = self.config.fetch_interval.as_secs_f64(),
            query = %self.config.search_query,
            policy = %self.config.watermark_policy,
            "Starting ingestion loop"
        );

        let mut ticker = interval(self.config.fetch_interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            if *shutdown_rx.borrow() {
                info!("Ingestion loop received shutdown signal");
                break;
            }

            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            let outcome = self.tick().await;
            self.metrics.record_tick(outcome.as_str());

            match &outcome {
                TickOutcome::Completed {
                    fetched,
                    inserted,
                    duplicates,
                    failed,
                } => info!(
                    fetched = fetched,
                    inserted = inserted,
                    duplicates = duplicates,
                    failed = failed,
                    "Ingestion tick completed"
                ),
                TickOutcome::QuotaRotated => info!("Credential out of quota, rotated"),
                TickOutcome::Aborted(_) => warn!(outcome = %outcome, "Ingestion tick aborted"),
                TickOutcome::Cancelled => {
                    info!("Ingestion loop cancelled while waiting for credentials");
                    break;
                }
            }
        }

        info!("Ingestion loop stopped");
    }

    /// Run one fetch-classify-persist cycle.
    pub async fn tick(&self) -> TickOutcome {
        let credential = match self.acquire_credential().await {
            Some(c) => c,
            None => return TickOutcome::Cancelled,
        };

        let published_after = self.watermark.lock().await.get();
        debug!(
            credential = %mask_credential(&credential),
            published_after = %format_timestamp(&published_after),
            "Fetching videos"
        );

        let response = match self
            .client
            .search(&credential, &self.config.search_query, published_after)
            .await
        {
            Ok(response) => response,
            Err(VidsyncError::UpstreamMalformed(msg)) => {
                // Says nothing about the credential
                return TickOutcome::Aborted(format!("malformed response: {}", msg));
            }
            Err(e) => {
                self.remove_credential(&credential).await;
                return TickOutcome::Aborted(e.to_string());
            }
        };

        match classify(&response) {
            ResponseClass::QuotaExceeded => match self.pool.rotate().await {
                Ok(_) => {
                    debug!(
                        credential = %mask_credential(&credential),
                        error = %VidsyncError::UpstreamQuota,
                        "Rotating past credential"
                    );
                    self.metrics
                        .record_credential_event("rotated", self.pool.len().await);
                    self.advance_watermark(None).await;
                    TickOutcome::QuotaRotated
                }
                Err(e) => TickOutcome::Aborted(e.to_string()),
            },
            ResponseClass::Rejected { code, message } => {
                self.remove_credential(&credential).await;
                TickOutcome::Aborted(
                    VidsyncError::UpstreamRejected { code, message }.to_string(),
                )
            }
            ResponseClass::Success => {
                let videos: Vec<Video> = response
                    .payload
                    .items
                    .into_iter()
                    .filter_map(|item| item.into_video())
                    .collect();
                self.persist(videos).await
            }
        }
    }

    /// Current credential, waiting while the pool is empty. `None` on shutdown.
    async fn acquire_credential(&self) -> Option<String> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut warned = false;

        loop {
            if *shutdown_rx.borrow() {
                return None;
            }

            match self.pool.current().await {
                Ok(credential) => return Some(credential),
                Err(_) => {
                    if !warned {
                        warn!(
                            poll_secs = self.config.key_poll_interval.as_secs_f64(),
                            "Credential pool is empty, waiting for a key to be added"
                        );
                        warned = true;
                    }
                }
            }

            tokio::select! {
                _ = sleep(self.config.key_poll_interval) => {}
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        return None;
                    }
                }
            }
        }
    }

    async fn remove_credential(&self, credential: &str) {
        // Only this loop removes credentials, so the cursor still points at `credential`
        if let Some(removed) = self.pool.remove_current().await {
            debug_assert_eq!(removed, credential);
        }
        self.metrics
            .record_credential_event("removed", self.pool.len().await);
    }

    async fn persist(&self, videos: Vec<Video>) -> TickOutcome {
        let fetched = videos.len();
        let mut inserted = 0;
        let mut duplicates = 0;
        let mut failed = 0;
        let mut latest: Option<DateTime<Utc>> = None;

        for video in &videos {
            latest = latest.max(Some(video.published_at));

            match self.writer.execute(video).await {
                Ok(WriteStatus::Inserted) => inserted += 1,
                Ok(WriteStatus::Duplicate) => duplicates += 1,
                Err(e) => {
                    warn!(video_id = %video.video_id, error = %e, "Failed to store video, skipping");
                    failed += 1;
                }
            }
        }

        self.metrics
            .record_items(WriteStatus::Inserted.as_str(), inserted as u64);
        self.metrics
            .record_items(WriteStatus::Duplicate.as_str(), duplicates as u64);
        self.metrics.record_items("failed", failed as u64);

        if inserted > 0 && self.config.invalidate_on_ingest {
            if let Some(invalidator) = &self.invalidator {
                invalidator.invalidate_scope(Some(GET_LATEST_VIDEOS)).await;
            }
        }

        self.advance_watermark(latest).await;

        TickOutcome::Completed {
            fetched,
            inserted,
            duplicates,
            failed,
        }
    }

    async fn advance_watermark(&self, latest: Option<DateTime<Utc>>) {
        let mut watermark = self.watermark.lock().await;
        let next = watermark.advance(Utc::now(), self.config.fetch_interval, latest);
        self.metrics.ingest_watermark_seconds.set(next.timestamp() as f64);
        debug!(published_after = %format_timestamp(&next), "Advanced watermark");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{key, CacheStore, MemoryCache};
    use crate::ingest::writer::WriterConfig;
    use crate::metrics::create_metrics;
    use crate::services::youtube::{SearchPayload, SearchResponse};
    use crate::store::memory::MemoryVideoStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex as StdMutex;

    /// Upstream that replays scripted responses and records the credentials used.
    /// An exhausted script answers with an empty success.
    #[derive(Default)]
    struct ScriptedClient {
        script: StdMutex<VecDeque<Result<SearchResponse, VidsyncError>>>,
        seen: StdMutex<Vec<String>>,
    }

    impl ScriptedClient {
        fn push(&self, step: Result<SearchResponse, VidsyncError>) {
            self.script.lock().unwrap().push_back(step);
        }

        fn push_json(&self, status: u16, body: &str) {
            let payload: SearchPayload = serde_json::from_str(body).unwrap();
            self.push(Ok(SearchResponse { status, payload }));
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchClient for ScriptedClient {
        async fn search(
            &self,
            credential: &str,
            _query: &str,
            _published_after: DateTime<Utc>,
        ) -> Result<SearchResponse, VidsyncError> {
            self.seen.lock().unwrap().push(credential.to_string());
            self.script.lock().unwrap().pop_front().unwrap_or_else(|| {
                Ok(SearchResponse {
                    status: 200,
                    payload: SearchPayload::default(),
                })
            })
        }
    }

    const QUOTA_BODY: &str = r#"{"error": {"code": 403, "message": "quota",
        "errors": [{"message": "quota", "domain": "youtube.quota", "reason": "quotaExceeded"}]}}"#;

    fn items_body(ids: &[&str]) -> String {
        let items: Vec<String> = ids
            .iter()
            .map(|id| {
                format!(
                    r#"{{"id": {{"videoId": "{}"}}, "snippet": {{"publishedAt": "2024-05-01T08:30:00Z",
                        "channelId": "UC1", "title": "t", "description": "d",
                        "thumbnails": {{"default": {{"url": "u"}}}}, "channelTitle": "c"}}}}"#,
                    id
                )
            })
            .collect();
        format!(r#"{{"items": [{}]}}"#, items.join(","))
    }

    struct Harness {
        ingestor: Ingestor,
        pool: Arc<CredentialPool>,
        client: Arc<ScriptedClient>,
        store: Arc<MemoryVideoStore>,
        shutdown_tx: watch::Sender<bool>,
    }

    fn harness(keys: &[&str], config: IngestorConfig) -> Harness {
        let pool = Arc::new(CredentialPool::new(keys.iter().map(|k| k.to_string())));
        let client = Arc::new(ScriptedClient::default());
        let store = Arc::new(MemoryVideoStore::new());
        let metrics = create_metrics();
        let writer = UpsertWriter::new(
            store.clone(),
            WriterConfig {
                max_attempts: 3,
                backoff_unit: Duration::from_millis(1),
                deadline: Duration::from_secs(5),
            },
            metrics.clone(),
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let ingestor = Ingestor::new(
            pool.clone(),
            client.clone(),
            writer,
            config,
            metrics,
            shutdown_rx,
        );

        Harness {
            ingestor,
            pool,
            client,
            store,
            shutdown_tx,
        }
    }

    fn fast_config() -> IngestorConfig {
        IngestorConfig {
            fetch_interval: Duration::from_millis(10),
            key_poll_interval: Duration::from_millis(10),
            ..IngestorConfig::default()
        }
    }

    #[tokio::test]
    async fn test_quota_rotates_to_next_credential() {
        let h = harness(&["k1", "k2"], fast_config());
        h.client.push_json(403, QUOTA_BODY);
        h.client.push_json(200, &items_body(&["v1"]));

        assert_eq!(h.ingestor.tick().await, TickOutcome::QuotaRotated);
        assert_eq!(h.pool.len().await, 2);

        let outcome = h.ingestor.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                fetched: 1,
                inserted: 1,
                duplicates: 0,
                failed: 0
            }
        );
        assert_eq!(h.client.seen(), vec!["k1", "k2"]);
    }

    #[tokio::test]
    async fn test_quota_tick_advances_sliding_watermark() {
        let h = harness(&["k1", "k2"], fast_config());
        let before = h.ingestor.watermark().lock().await.get();
        h.client.push_json(403, QUOTA_BODY);

        h.ingestor.tick().await;
        let after = h.ingestor.watermark().lock().await.get();
        assert!(after > before);
    }

    #[tokio::test]
    async fn test_not_found_removes_only_credential() {
        let h = harness(&["k1", "k2"], fast_config());
        h.client
            .push_json(404, r#"{"error": {"code": 404, "message": "not found"}}"#);

        let outcome = h.ingestor.tick().await;
        assert!(matches!(outcome, TickOutcome::Aborted(_)));
        assert_eq!(h.pool.len().await, 1);
        assert_eq!(h.pool.current().await.unwrap(), "k2");
        assert_eq!(h.store.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_transport_error_removes_credential() {
        let h = harness(&["k1", "k2"], fast_config());
        h.client
            .push(Err(VidsyncError::UpstreamTransient("timed out".into())));

        assert!(matches!(h.ingestor.tick().await, TickOutcome::Aborted(_)));
        assert_eq!(h.pool.len().await, 1);
        assert_eq!(h.pool.current().await.unwrap(), "k2");
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_credential() {
        let h = harness(&["k1"], fast_config());
        h.client
            .push(Err(VidsyncError::UpstreamMalformed("expected value".into())));

        assert!(matches!(h.ingestor.tick().await, TickOutcome::Aborted(_)));
        assert_eq!(h.pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_item_twice_is_stored_once() {
        let h = harness(&["k1"], fast_config());
        h.client.push_json(200, &items_body(&["v1"]));
        h.client.push_json(200, &items_body(&["v1"]));

        h.ingestor.tick().await;
        let second = h.ingestor.tick().await;

        assert_eq!(
            second,
            TickOutcome::Completed {
                fetched: 1,
                inserted: 0,
                duplicates: 1,
                failed: 0
            }
        );
        assert_eq!(h.store.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_item_is_skipped() {
        let h = harness(&["k1"], fast_config());
        h.client.push_json(200, &items_body(&["v1", "v2"]));
        // Exhausts every attempt for the first item only
        h.store.fail_next_inserts(3);

        let outcome = h.ingestor.tick().await;
        assert_eq!(
            outcome,
            TickOutcome::Completed {
                fetched: 2,
                inserted: 1,
                duplicates: 0,
                failed: 1
            }
        );
        assert!(h.store.get("v1").is_none());
        assert!(h.store.get("v2").is_some());
    }

    #[tokio::test]
    async fn test_empty_pool_waits_until_key_added() {
        let h = harness(&[], fast_config());
        let pool = h.pool.clone();
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            pool.add("late").await.unwrap();
        });

        let outcome = h.ingestor.tick().await;
        assert!(matches!(outcome, TickOutcome::Completed { .. }));
        assert_eq!(h.client.seen(), vec!["late"]);
    }

    #[tokio::test]
    async fn test_empty_pool_wait_is_cancellable() {
        let h = harness(&[], fast_config());
        let tx = h.shutdown_tx;
        tokio::spawn(async move {
            sleep(Duration::from_millis(30)).await;
            let _ = tx.send(true);
        });

        assert_eq!(h.ingestor.tick().await, TickOutcome::Cancelled);
        assert!(h.client.seen().is_empty());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let h = harness(&["k1"], fast_config());
        let ingestor = Arc::new(h.ingestor);
        let runner = {
            let ingestor = ingestor.clone();
            tokio::spawn(async move { ingestor.run().await })
        };

        sleep(Duration::from_millis(50)).await;
        h.shutdown_tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), runner)
            .await
            .expect("loop did not stop")
            .unwrap();
        assert!(!h.client.seen().is_empty());
    }

    #[tokio::test]
    async fn test_insert_invalidates_latest_videos_scope() {
        let config = IngestorConfig {
            invalidate_on_ingest: true,
            ..fast_config()
        };
        let h = harness(&["k1"], config);
        let cache = Arc::new(MemoryCache::new());
        let cached_key = key::derive_key("videos", GET_LATEST_VIDEOS, &1u32).unwrap();
        cache
            .set(&cached_key, vec![1], Duration::from_secs(60))
            .await
            .unwrap();
        let invalidator = CacheInvalidator::new(cache.clone(), "videos", 100, create_metrics());
        let ingestor = h.ingestor.with_invalidator(invalidator);

        h.client.push_json(200, &items_body(&["v1"]));
        ingestor.tick().await;

        assert!(cache.get(&cached_key).await.unwrap().is_none());
    }
}
