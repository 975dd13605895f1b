//! Insert-if-absent writer with bounded retries.

use crate::error::VidsyncError;
use crate::metrics::SharedMetrics;
use crate::model::Video;
use crate::store::VideoStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, warn};

/// Retry and deadline settings for the writer
#[derive(Debug, Clone)]
pub struct WriterConfig {
    pub max_attempts: u32,
    /// Linear backoff unit: attempt `n` waits `n * backoff_unit` before retrying
    pub backoff_unit: Duration,
    /// Shared deadline across all attempts of one write
    pub deadline: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_unit: Duration::from_millis(500),
            deadline: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStatus {
    Inserted,
    /// Row with the same natural key already existed
    Duplicate,
}

impl WriteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStatus::Inserted => "inserted",
            WriteStatus::Duplicate => "duplicate",
        }
    }
}

#[derive(Clone)]
pub struct UpsertWriter {
    store: Arc<dyn VideoStore>,
    config: WriterConfig,
    metrics: SharedMetrics,
}

impl UpsertWriter {
    pub fn new(store: Arc<dyn VideoStore>, config: WriterConfig, metrics: SharedMetrics) -> Self {
        Self {
            store,
            config,
            metrics,
        }
    }

    /// Write `video` unless a row with its id exists.
    pub async fn execute(&self, video: &Video) -> Result<WriteStatus, VidsyncError> {
        let deadline = Instant::now() + self.config.deadline;
        let max_attempts = self.config.max_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=max_attempts {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(VidsyncError::WriteDeadline {
                    attempts: attempt - 1,
                });
            }

            if attempt > 1 {
                self.metrics.write_retries_total.inc();
            }

            match timeout(remaining, self.store.insert_if_absent(video)).await {
                Ok(Ok(true)) => return Ok(WriteStatus::Inserted),
                Ok(Ok(false)) => {
                    debug!(video_id = %video.video_id, "Video already stored");
                    return Ok(WriteStatus::Duplicate);
                }
                Ok(Err(e)) => {
                    warn!(
                        video_id = %video.video_id,
                        attempt = attempt,
                        error = %e,
                        "Insert attempt failed"
                    );
                    last_error = e.to_string();
                }
                Err(_) => {
                    return Err(VidsyncError::WriteDeadline { attempts: attempt });
                }
            }

            if attempt < max_attempts {
                let backoff = self.config.backoff_unit * attempt;
                let remaining = deadline.saturating_duration_since(Instant::now());
                if backoff >= remaining {
                    return Err(VidsyncError::WriteDeadline { attempts: attempt });
                }
                sleep(backoff).await;
            }
        }

        Err(VidsyncError::WriteFailed {
            attempts: max_attempts,
            last: last_error,
        })
    }
}
