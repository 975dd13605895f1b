//! vidsync - YouTube ingestion and cached read API
//!
//! A background service that:
//! - Polls the YouTube search API on a fixed interval with a rotating key pool
//! - Stores new videos idempotently in PostgreSQL
//! - Serves paginated reads through a cache-aside layer (Redis or in-process)
//! - Exposes Prometheus metrics and a health endpoint

mod api;
mod cache;
mod config;
mod error;
mod ingest;
mod metrics;
mod model;
mod services;
mod store;
mod utils;

use crate::api::AppState;
use crate::cache::{CacheAside, CacheInvalidator, CacheStore, MemoryCache, RedisCache};
use crate::config::Config;
use crate::ingest::{CredentialPool, Ingestor, UpsertWriter};
use crate::metrics::create_metrics;
use crate::services::videos::VideoService;
use crate::services::youtube::YoutubeApi;
use crate::store::{PgVideoStore, VideoStore};
use crate::utils::ascii::print_startup_banner;
use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// vidsync - YouTube ingestion and cached read API
#[derive(Parser, Debug)]
#[command(name = "vidsync")]
#[command(author, version, about = "YouTube ingestion and cached read API", long_about = None)]
struct Args {
    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging output
    #[arg(long)]
    json_logs: bool,

    /// Enable debug logging for upstream API requests
    #[arg(long)]
    debug_requests: bool,

    /// Server port (overrides PORT env var)
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file first (before parsing args, so env vars are available)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    init_logging(&args.log_level, args.json_logs, args.debug_requests)?;

    print_startup_banner();

    info!("Starting vidsync v{}", env!("CARGO_PKG_VERSION"));

    // Load config (CLI port overrides env var)
    let mut config = Config::from_env()?;
    if let Some(port) = args.port {
        config.server.port = port;
    }

    if args.debug_requests {
        info!("Request debugging enabled");
    }

    let metrics = create_metrics();

    // Relational store
    let store: Arc<dyn VideoStore> = Arc::new(PgVideoStore::connect(&config.database).await?);

    // Cache backend: Redis when configured, in-process otherwise
    let cache_store: Arc<dyn CacheStore> = match &config.cache.redis_url {
        Some(url) => match RedisCache::connect(url).await {
            Ok(redis) => Arc::new(redis),
            Err(e) => {
                error!(error = %e, "Failed to connect to Redis");
                return Err(e.into());
            }
        },
        None => {
            info!("REDIS_URL not set, using in-process cache");
            Arc::new(MemoryCache::new())
        }
    };

    let cache = CacheAside::new(
        cache_store.clone(),
        config.cache.namespace.clone(),
        config.cache.ttl,
        metrics.clone(),
    );
    let invalidator = CacheInvalidator::new(
        cache_store.clone(),
        config.cache.namespace.clone(),
        config.cache.scan_batch,
        metrics.clone(),
    );

    // Credential pool
    let pool = Arc::new(CredentialPool::new(config.youtube.api_keys.clone()));
    let pool_size = pool.len().await;
    metrics.credential_pool_size.set(pool_size as f64);
    if pool_size == 0 {
        warn!("No YouTube API keys configured; ingestion waits until one is added via POST /videos/key");
    } else {
        info!(keys = pool_size, "Credential pool initialized");
    }

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Ingestion loop
    let youtube = YoutubeApi::new(
        &config.youtube.api_url,
        config.youtube.http_timeout,
        metrics.clone(),
    );
    let writer = UpsertWriter::new(store.clone(), config.to_writer_config(), metrics.clone());
    let ingestor = Ingestor::new(
        pool.clone(),
        Arc::new(youtube),
        writer,
        config.to_ingestor_config(),
        metrics.clone(),
        shutdown_rx,
    )
    .with_invalidator(invalidator.clone());
    let watermark = ingestor.watermark();

    let mut ingestor_handle = tokio::spawn(async move {
        ingestor.run().await;
    });

    // Read API
    let videos = VideoService::new(
        store,
        cache,
        invalidator,
        pool,
        config.server.max_pagination_size,
        metrics.clone(),
    );

    let app = api::router(AppState {
        videos,
        metrics,
        watermark,
    });

    // Start Server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!(
        "Listening on http://{} (Videos: /videos, Metrics: /metrics, Health: /health)",
        addr
    );

    // Setup graceful shutdown
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for ctrl-c");
        }
        info!("Shutdown signal received, initiating graceful shutdown...");

        // Signal shutdown to the ingestion loop
        let _ = shutdown_tx.send(true);
    };

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    // Give an in-flight tick time to finish
    if tokio::time::timeout(Duration::from_secs(30), &mut ingestor_handle)
        .await
        .is_err()
    {
        warn!("Ingestion loop did not stop in time, aborting");
        ingestor_handle.abort();
    }

    info!("vidsync shutdown complete");
    Ok(())
}

/// Initialize logging with optional request debugging
fn init_logging(level: &str, json: bool, debug_requests: bool) -> anyhow::Result<()> {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);

    // Build filter: set vidsync to requested level, and optionally enable request debugging
    let filter = if debug_requests {
        EnvFilter::new(format!(
            "vidsync={},vidsync::services::youtube::api=debug,tower_http=debug,hyper=warn,sqlx=warn",
            level
        ))
    } else {
        EnvFilter::new(format!(
            "vidsync={},tower_http=info,hyper=warn,sqlx=warn",
            level
        ))
    };

    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .init();
    }

    Ok(())
}
