//! Persistent video storage.

#[cfg(test)]
pub mod memory;
pub mod postgres;

pub use postgres::PgVideoStore;

use crate::error::VidsyncError;
use crate::model::{LatestVideosQuery, Video};
use async_trait::async_trait;

#[async_trait]
pub trait VideoStore: Send + Sync {
    /// Insert `video` unless a row with the same `video_id` exists.
    /// Returns `true` when a new row was written.
    async fn insert_if_absent(&self, video: &Video) -> Result<bool, VidsyncError>;

    /// Videos published strictly after `query.published_after`, ordered and paginated.
    async fn latest_videos(&self, query: &LatestVideosQuery) -> Result<Vec<Video>, VidsyncError>;
}
