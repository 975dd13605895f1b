use crate::ingest::{IngestorConfig, WatermarkPolicy, WriterConfig};
use anyhow::{Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_YOUTUBE_API_URL: &str = "https://www.googleapis.com/youtube/v3/search";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    /// Upper bound accepted for `pagination_size`
    pub max_pagination_size: u32,
}

#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub write_timeout: Duration,
    pub write_max_attempts: u32,
    pub write_backoff: Duration,
}

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Redis URL; the in-process cache is used when unset
    pub redis_url: Option<String>,
    pub ttl: Duration,
    pub namespace: String,
    pub scan_batch: usize,
}

#[derive(Debug, Clone)]
pub struct YoutubeConfig {
    pub api_url: String,
    pub api_keys: Vec<String>,
    pub search_query: String,
    pub fetch_interval: Duration,
    pub lookback: Duration,
    pub http_timeout: Duration,
    pub key_poll_interval: Duration,
    pub watermark_policy: WatermarkPolicy,
    pub invalidate_on_ingest: bool,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub youtube: YoutubeConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let watermark_policy = env::var("WATERMARK_POLICY")
            .ok()
            .map(|v| v.parse::<WatermarkPolicy>())
            .transpose()
            .map_err(|e| anyhow::anyhow!("invalid WATERMARK_POLICY: {}", e))?
            .unwrap_or_default();

        Ok(Self {
            server: ServerConfig {
                port: env_or("PORT", 3000)?,
                max_pagination_size: env_or("MAX_PAGINATION_SIZE", 50)?,
            },
            database: DatabaseConfig {
                url: env::var("DATABASE_URL").context("DATABASE_URL is required")?,
                max_connections: env_or("DB_MAX_CONNECTIONS", 10)?,
                write_timeout: Duration::from_secs(env_or("WRITE_TIMEOUT_SECS", 30)?),
                write_max_attempts: env_or("WRITE_MAX_ATTEMPTS", 3)?,
                write_backoff: Duration::from_millis(env_or("WRITE_BACKOFF_MS", 500)?),
            },
            cache: CacheConfig {
                redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
                ttl: Duration::from_secs(env_or("CACHE_TTL_SECS", 60)?),
                namespace: env::var("CACHE_NAMESPACE").unwrap_or_else(|_| "videos".to_string()),
                scan_batch: env_or("CACHE_SCAN_BATCH", 1000)?,
            },
            youtube: YoutubeConfig {
                api_url: env::var("YOUTUBE_API_URL")
                    .unwrap_or_else(|_| DEFAULT_YOUTUBE_API_URL.to_string()),
                api_keys: collect_api_keys(),
                search_query: env::var("YOUTUBE_SEARCH_QUERY")
                    .unwrap_or_else(|_| "news".to_string()),
                fetch_interval: Duration::from_secs(env_or("FETCH_INTERVAL_SECS", 10)?),
                lookback: Duration::from_secs(env_or::<u64>("LOOKBACK_MINUTES", 100)? * 60),
                http_timeout: Duration::from_secs(env_or("HTTP_TIMEOUT_SECS", 30)?),
                key_poll_interval: Duration::from_secs(env_or("KEY_POLL_INTERVAL_SECS", 10)?),
                watermark_policy,
                invalidate_on_ingest: env_or("INVALIDATE_ON_INGEST", false)?,
            },
        })
    }

    pub fn to_ingestor_config(&self) -> IngestorConfig {
        IngestorConfig {
            search_query: self.youtube.search_query.clone(),
            fetch_interval: self.youtube.fetch_interval,
            lookback: self.youtube.lookback,
            key_poll_interval: self.youtube.key_poll_interval,
            watermark_policy: self.youtube.watermark_policy,
            invalidate_on_ingest: self.youtube.invalidate_on_ingest,
        }
    }

    pub fn to_writer_config(&self) -> WriterConfig {
        WriterConfig {
            max_attempts: self.database.write_max_attempts,
            backoff_unit: self.database.write_backoff,
            deadline: self.database.write_timeout,
        }
    }
}

/// Parse an optional env var, falling back to `default` when unset.
fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid value for {}: {}", name, e)),
        Err(_) => Ok(default),
    }
}

/// Credentials come from `YOUTUBE_API_KEYS` (comma-separated) followed by the
/// numbered `YOUTUBE_API_KEY1..3` variables. Order defines rotation order.
fn collect_api_keys() -> Vec<String> {
    let mut keys: Vec<String> = env::var("YOUTUBE_API_KEYS")
        .map(|raw| split_keys(&raw))
        .unwrap_or_default();

    for idx in 1..=3 {
        if let Ok(key) = env::var(format!("YOUTUBE_API_KEY{}", idx)) {
            let key = key.trim().to_string();
            if !key.is_empty() && !keys.contains(&key) {
                keys.push(key);
            }
        }
    }

    keys
}

fn split_keys(raw: &str) -> Vec<String> {
    let mut keys = Vec::new();
    for key in raw.split(',').map(str::trim).filter(|k| !k.is_empty()) {
        if !keys.iter().any(|k: &String| k == key) {
            keys.push(key.to_string());
        }
    }
    keys
}
