//! Prometheus metrics for monitoring vidsync.
//!
//! Covers the ingestion loop (ticks, items, credential pool), the upstream API,
//! the upsert writer, and the cache-aside layer.

use prometheus::{
    Counter, CounterVec, Gauge, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
};
use std::sync::Arc;
use tracing::error;

/// All metrics for the vidsync service
pub struct Metrics {
    pub registry: Registry,

    // Ingestion metrics
    pub ingest_ticks_total: CounterVec,
    pub ingest_items_total: CounterVec,
    pub ingest_watermark_seconds: Gauge,
    pub credential_pool_size: Gauge,
    pub credential_events_total: CounterVec,

    // Upstream metrics
    pub upstream_requests_total: CounterVec,
    pub upstream_request_duration_seconds: Histogram,

    // Writer metrics
    pub write_retries_total: Counter,

    // Cache metrics
    pub cache_requests_total: CounterVec,
    pub cache_write_errors_total: Counter,
    pub cache_invalidated_keys_total: Counter,

    // Query metrics
    pub query_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new metrics registry with all metrics
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Ingestion metrics
        let ingest_ticks_total = CounterVec::new(
            Opts::new("vidsync_ingest_ticks_total", "Ingestion ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ingest_ticks_total.clone()))?;

        let ingest_items_total = CounterVec::new(
            Opts::new("vidsync_ingest_items_total", "Ingested items by write status"),
            &["status"],
        )?;
        registry.register(Box::new(ingest_items_total.clone()))?;

        let ingest_watermark_seconds = Gauge::with_opts(Opts::new(
            "vidsync_ingest_watermark_seconds",
            "Current publishedAfter watermark as unix seconds",
        ))?;
        registry.register(Box::new(ingest_watermark_seconds.clone()))?;

        let credential_pool_size = Gauge::with_opts(Opts::new(
            "vidsync_credential_pool_size",
            "Number of API credentials in the pool",
        ))?;
        registry.register(Box::new(credential_pool_size.clone()))?;

        let credential_events_total = CounterVec::new(
            Opts::new(
                "vidsync_credential_events_total",
                "Credential pool mutations by kind",
            ),
            &["event"],
        )?;
        registry.register(Box::new(credential_events_total.clone()))?;

        // Upstream metrics
        let upstream_requests_total = CounterVec::new(
            Opts::new("vidsync_upstream_requests_total", "Upstream search requests"),
            &["class"],
        )?;
        registry.register(Box::new(upstream_requests_total.clone()))?;

        let upstream_request_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "vidsync_upstream_request_duration_seconds",
                "Upstream search request duration",
            )
            .buckets(vec![0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        )?;
        registry.register(Box::new(upstream_request_duration_seconds.clone()))?;

        // Writer metrics
        let write_retries_total = Counter::with_opts(Opts::new(
            "vidsync_write_retries_total",
            "Upsert attempts beyond the first",
        ))?;
        registry.register(Box::new(write_retries_total.clone()))?;

        // Cache metrics
        let cache_requests_total = CounterVec::new(
            Opts::new(
                "vidsync_cache_requests_total",
                "Cache-aside lookups by operation and result",
            ),
            &["operation", "result"],
        )?;
        registry.register(Box::new(cache_requests_total.clone()))?;

        let cache_write_errors_total = Counter::with_opts(Opts::new(
            "vidsync_cache_write_errors_total",
            "Failed cache population writes",
        ))?;
        registry.register(Box::new(cache_write_errors_total.clone()))?;

        let cache_invalidated_keys_total = Counter::with_opts(Opts::new(
            "vidsync_cache_invalidated_keys_total",
            "Keys removed by scope invalidation",
        ))?;
        registry.register(Box::new(cache_invalidated_keys_total.clone()))?;

        // Query metrics
        let query_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "vidsync_query_duration_seconds",
                "Read query duration in seconds (cache included)",
            )
            .buckets(vec![
                0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0,
            ]),
            &["operation"],
        )?;
        registry.register(Box::new(query_duration_seconds.clone()))?;

        Ok(Self {
            registry,
            ingest_ticks_total,
            ingest_items_total,
            ingest_watermark_seconds,
            credential_pool_size,
            credential_events_total,
            upstream_requests_total,
            upstream_request_duration_seconds,
            write_retries_total,
            cache_requests_total,
            cache_write_errors_total,
            cache_invalidated_keys_total,
            query_duration_seconds,
        })
    }

    /// Record the outcome of an ingestion tick
    pub fn record_tick(&self, outcome: &str) {
        self.ingest_ticks_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_items(&self, status: &str, count: u64) {
        if count > 0 {
            self.ingest_items_total
                .with_label_values(&[status])
                .inc_by(count as f64);
        }
    }

    /// Record a credential pool mutation and the resulting pool size
    pub fn record_credential_event(&self, event: &str, pool_size: usize) {
        self.credential_events_total
            .with_label_values(&[event])
            .inc();
        self.credential_pool_size.set(pool_size as f64);
    }

    /// Record an upstream request and how its response was classified
    pub fn record_upstream(&self, class: &str, duration_secs: f64) {
        self.upstream_requests_total
            .with_label_values(&[class])
            .inc();
        self.upstream_request_duration_seconds.observe(duration_secs);
    }

    /// Record a cache-aside lookup result (hit, miss, error, decode_error, key_error)
    pub fn record_cache(&self, operation: &str, result: &str) {
        self.cache_requests_total
            .with_label_values(&[operation, result])
            .inc();
    }

    pub fn record_query(&self, operation: &str, duration_secs: f64) {
        self.query_duration_seconds
            .with_label_values(&[operation])
            .observe(duration_secs);
    }

    /// Render metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        match encoder.encode_to_string(&metric_families) {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Failed to encode metrics");
                String::new()
            }
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create metrics")
    }
}

/// Shared metrics instance
pub type SharedMetrics = Arc<Metrics>;

/// Create a shared metrics instance
pub fn create_metrics() -> SharedMetrics {
    Arc::new(Metrics::default())
}
