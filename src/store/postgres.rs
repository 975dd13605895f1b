use crate::config::DatabaseConfig;
use crate::error::VidsyncError;
use crate::model::{LatestVideosQuery, Video};
use crate::store::VideoStore;
use async_trait::async_trait;
use futures::stream::TryStreamExt;
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

const INSERT_VIDEO: &str = "INSERT INTO videos \
    (video_id, title, description, published_at, thumbnail_url, channel_title, channel_id) \
    VALUES ($1, $2, $3, $4, $5, $6, $7) \
    ON CONFLICT (video_id) DO NOTHING";

pub struct PgVideoStore {
    pool: PgPool,
}

impl PgVideoStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, VidsyncError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await?;

        info!(max_connections = config.max_connections, "Connected to PostgreSQL");

        Ok(Self { pool })
    }
}

/// Select statement for a page of videos. The direction comes from `SortOrder`
/// and is never taken from raw input.
fn latest_videos_sql(query: &LatestVideosQuery) -> String {
    format!(
        "SELECT video_id, title, description, published_at, thumbnail_url, channel_title, channel_id \
         FROM videos WHERE published_at > $1 ORDER BY published_at {} LIMIT $2 OFFSET $3",
        query.sort_order.as_sql()
    )
}

#[async_trait]
impl VideoStore for PgVideoStore {
    async fn insert_if_absent(&self, video: &Video) -> Result<bool, VidsyncError> {
        let result = sqlx::query(INSERT_VIDEO)
            .bind(&video.video_id)
            .bind(&video.title)
            .bind(&video.description)
            .bind(video.published_at)
            .bind(&video.thumbnail_url)
            .bind(&video.channel_title)
            .bind(&video.channel_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn latest_videos(&self, query: &LatestVideosQuery) -> Result<Vec<Video>, VidsyncError> {
        let sql = latest_videos_sql(query);
        let limit = i64::from(query.size);
        let offset = i64::try_from(query.offset()).unwrap_or(i64::MAX);

        let mut rows = sqlx::query_as::<_, Video>(&sql)
            .bind(query.published_after)
            .bind(limit)
            .bind(offset)
            .fetch(&self.pool);

        let mut videos = Vec::with_capacity(query.size as usize);
        while let Some(video) = rows.try_next().await? {
            videos.push(video);
        }

        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SortOrder;
    use chrono::Utc;

    #[test]
    fn test_sort_direction_is_interpolated_from_enum() {
        let mut query = LatestVideosQuery {
            sort_order: SortOrder::Asc,
            page: 2,
            size: 10,
            published_after: Utc::now(),
        };
        assert!(latest_videos_sql(&query).contains("ORDER BY published_at ASC LIMIT $2 OFFSET $3"));

        query.sort_order = SortOrder::Desc;
        assert!(latest_videos_sql(&query).contains("ORDER BY published_at DESC"));
    }
}
