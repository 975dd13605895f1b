//! Ingestion watermark: the `publishedAfter` bound for the next upstream search.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// How the watermark moves after a tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum WatermarkPolicy {
    /// Jump to `now + interval` regardless of what was seen
    #[default]
    Sliding,
    /// Move to the newest `published_at` seen in the tick
    LatestItem,
}

impl FromStr for WatermarkPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sliding" => Ok(WatermarkPolicy::Sliding),
            "latest_item" => Ok(WatermarkPolicy::LatestItem),
            other => Err(format!(
                "unknown watermark policy '{}', expected 'sliding' or 'latest_item'",
                other
            )),
        }
    }
}

impl fmt::Display for WatermarkPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WatermarkPolicy::Sliding => write!(f, "sliding"),
            WatermarkPolicy::LatestItem => write!(f, "latest_item"),
        }
    }
}

/// Monotonically non-decreasing timestamp
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Watermark {
    published_after: DateTime<Utc>,
    policy: WatermarkPolicy,
}

impl Watermark {
    /// Start `lookback` before `now`
    pub fn starting_at(now: DateTime<Utc>, lookback: Duration, policy: WatermarkPolicy) -> Self {
        let lookback = chrono::Duration::from_std(lookback).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            published_after: now - lookback,
            policy,
        }
    }

    pub fn get(&self) -> DateTime<Utc> {
        self.published_after
    }

    /// Advance after a completed tick. `latest` is the newest `published_at` the
    /// tick saw, if any. Never moves backwards.
    pub fn advance(
        &mut self,
        now: DateTime<Utc>,
        interval: Duration,
        latest: Option<DateTime<Utc>>,
    ) -> DateTime<Utc> {
        let candidate = match self.policy {
            WatermarkPolicy::Sliding => chrono::Duration::from_std(interval)
                .ok()
                .map(|step| now + step),
            WatermarkPolicy::LatestItem => latest,
        };

        if let Some(candidate) = candidate {
            if candidate > self.published_after {
                self.published_after = candidate;
            }
        }
        self.published_after
    }
}
