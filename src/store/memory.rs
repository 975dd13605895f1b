//! In-memory `VideoStore` used by tests, with call counters and failure injection.

use crate::error::VidsyncError;
use crate::model::{LatestVideosQuery, SortOrder, Video};
use crate::store::VideoStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
pub struct MemoryVideoStore {
    rows: Mutex<HashMap<String, Video>>,
    insert_calls: AtomicUsize,
    latest_calls: AtomicUsize,
    failing_inserts: AtomicUsize,
    insert_delay_ms: AtomicU64,
}

impl MemoryVideoStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().unwrap().len()
    }

    pub fn get(&self, video_id: &str) -> Option<Video> {
        self.rows.lock().unwrap().get(video_id).cloned()
    }

    pub fn insert_calls(&self) -> usize {
        self.insert_calls.load(Ordering::SeqCst)
    }

    pub fn latest_calls(&self) -> usize {
        self.latest_calls.load(Ordering::SeqCst)
    }

    /// Make the next `n` inserts fail
    pub fn fail_next_inserts(&self, n: usize) {
        self.failing_inserts.store(n, Ordering::SeqCst);
    }

    pub fn set_insert_delay(&self, delay: Duration) {
        self.insert_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }
}

#[async_trait]
impl VideoStore for MemoryVideoStore {
    async fn insert_if_absent(&self, video: &Video) -> Result<bool, VidsyncError> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let delay = self.insert_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        let failing = self
            .failing_inserts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if failing.is_ok() {
            return Err(VidsyncError::Internal("injected insert failure".into()));
        }

        let mut rows = self.rows.lock().unwrap();
        if rows.contains_key(&video.video_id) {
            return Ok(false);
        }
        rows.insert(video.video_id.clone(), video.clone());
        Ok(true)
    }

    async fn latest_videos(&self, query: &LatestVideosQuery) -> Result<Vec<Video>, VidsyncError> {
        self.latest_calls.fetch_add(1, Ordering::SeqCst);

        let rows = self.rows.lock().unwrap();
        let mut videos: Vec<Video> = rows
            .values()
            .filter(|v| v.published_at > query.published_after)
            .cloned()
            .collect();

        videos.sort_by_key(|v| v.published_at);
        if query.sort_order == SortOrder::Desc {
            videos.reverse();
        }

        Ok(videos
            .into_iter()
            .skip(query.offset() as usize)
            .take(query.size as usize)
            .collect())
    }
}
