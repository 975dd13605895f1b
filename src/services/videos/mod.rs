//! Read API over stored videos, plus the administrative operations the HTTP
//! layer exposes (credential registration and cache invalidation).

use crate::cache::{CacheAside, CacheInvalidator, InvalidationOutcome};
use crate::error::VidsyncError;
use crate::ingest::CredentialPool;
use crate::metrics::SharedMetrics;
use crate::model::{parse_timestamp, LatestVideosQuery, SortOrder, Video, DATE_FORMAT};
use crate::store::VideoStore;
use chrono::{DateTime, Duration as ChronoDuration, DurationRound, Utc};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, instrument};

/// Cache operation name for the latest-videos query
pub const GET_LATEST_VIDEOS: &str = "get_latest_videos";

/// Window used when the caller gives no `published_after`
const DEFAULT_PUBLISHED_WINDOW_HOURS: i64 = 20;

/// Raw, unvalidated read parameters as they arrive on the query string
#[derive(Deserialize, Debug, Default, Clone)]
pub struct GetLatestVideosRequest {
    pub sort_order: Option<String>,
    pub pagination_page: Option<u32>,
    pub pagination_size: Option<u32>,
    pub published_after: Option<String>,
}

#[derive(Clone)]
pub struct VideoService {
    store: Arc<dyn VideoStore>,
    cache: CacheAside,
    invalidator: CacheInvalidator,
    pool: Arc<CredentialPool>,
    max_pagination_size: u32,
    metrics: SharedMetrics,
}

impl VideoService {
    pub fn new(
        store: Arc<dyn VideoStore>,
        cache: CacheAside,
        invalidator: CacheInvalidator,
        pool: Arc<CredentialPool>,
        max_pagination_size: u32,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            store,
            cache,
            invalidator,
            pool,
            max_pagination_size,
            metrics,
        }
    }

    /// Validate raw parameters into a query
    pub fn validate(&self, req: &GetLatestVideosRequest) -> Result<LatestVideosQuery, VidsyncError> {
        let sort_order = match req.sort_order.as_deref() {
            Some(raw) => raw.parse::<SortOrder>().map_err(VidsyncError::BadRequest)?,
            None => return Err(VidsyncError::BadRequest("sort_order is required".to_string())),
        };

        let page = req.pagination_page.unwrap_or(1);
        if page < 1 {
            return Err(VidsyncError::BadRequest(
                "pagination_page must be at least 1".to_string(),
            ));
        }

        let size = req.pagination_size.unwrap_or(self.max_pagination_size);
        if size < 1 || size > self.max_pagination_size {
            return Err(VidsyncError::BadRequest(format!(
                "pagination_size must be between 1 and {}",
                self.max_pagination_size
            )));
        }

        let published_after = match req.published_after.as_deref() {
            Some(raw) => parse_timestamp(raw).map_err(|_| {
                VidsyncError::BadRequest(format!(
                    "published_after must match {} (got {:?})",
                    DATE_FORMAT, raw
                ))
            })?,
            None => default_published_after(Utc::now()),
        };

        Ok(LatestVideosQuery {
            sort_order,
            page,
            size,
            published_after,
        })
    }

    /// Page of videos published after the requested time, served through the cache
    #[instrument(skip(self))]
    pub async fn get_latest_videos(
        &self,
        req: &GetLatestVideosRequest,
    ) -> Result<Vec<Video>, VidsyncError> {
        let query = self.validate(req)?;
        let store = self.store.clone();

        self.cache
            .execute(GET_LATEST_VIDEOS, query, |query| async move {
                store.latest_videos(&query).await
            })
            .await
    }

    /// Add a credential to the ingestion pool. `Ok(false)` when already present.
    pub async fn register_credential(&self, candidate: &str) -> Result<bool, VidsyncError> {
        let added = self.pool.add(candidate).await?;
        if added {
            self.metrics
                .record_credential_event("added", self.pool.len().await);
        }
        Ok(added)
    }

    /// Drop cached results for one operation, or for the whole namespace
    pub async fn invalidate(&self, scope: Option<&str>) -> InvalidationOutcome {
        info!(scope = scope.unwrap_or("*"), "Invalidating cache");
        self.invalidator.invalidate_scope(scope).await
    }

    pub fn pool(&self) -> Arc<CredentialPool> {
        self.pool.clone()
    }

    pub fn cache_backend(&self) -> &'static str {
        self.cache.store().backend()
    }
}

/// Start of the default read window. Whole seconds, like an explicit
/// `published_after`, so repeated default reads share one cache key.
fn default_published_after(now: DateTime<Utc>) -> DateTime<Utc> {
    let start = now - ChronoDuration::hours(DEFAULT_PUBLISHED_WINDOW_HOURS);
    start.duration_trunc(ChronoDuration::seconds(1)).unwrap_or(start)
}
