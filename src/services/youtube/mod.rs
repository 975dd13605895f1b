//! YouTube Data API search client and payload types.
//!
//! The client only performs the request; deciding what a response means for the
//! credential pool is done by [`classify`], which the ingestion loop acts on.

pub mod api;

pub use api::YoutubeApi;

use crate::error::VidsyncError;
use crate::model::Video;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::warn;

/// Sub-error reason the API reports when a key's daily quota is used up
pub const QUOTA_EXCEEDED_REASON: &str = "quotaExceeded";

#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Search for videos matching `query` published after `published_after`.
    ///
    /// Transport failures (including timeouts) are `UpstreamTransient`; a body that
    /// cannot be decoded despite a success status is `UpstreamMalformed`. Every other
    /// response, error payloads included, is returned for classification.
    async fn search(
        &self,
        credential: &str,
        query: &str,
        published_after: DateTime<Utc>,
    ) -> Result<SearchResponse, VidsyncError>;
}

/// HTTP status plus the decoded body
#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub status: u16,
    pub payload: SearchPayload,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SearchPayload {
    #[serde(default)]
    pub items: Vec<SearchItem>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiError {
    #[serde(default)]
    pub code: u16,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub errors: Vec<ApiErrorDetail>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub domain: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SearchItem {
    #[serde(default)]
    pub id: ItemId,
    #[serde(default)]
    pub snippet: Snippet,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct ItemId {
    #[serde(default)]
    pub video_id: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct Snippet {
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub channel_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub thumbnails: Thumbnails,
    #[serde(default)]
    pub channel_title: String,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Thumbnails {
    #[serde(default)]
    pub default: Option<Thumbnail>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct Thumbnail {
    #[serde(default)]
    pub url: String,
}

/// What a search response means for the credential that made it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseClass {
    Success,
    /// Key is out of quota; rotate past it
    QuotaExceeded,
    /// Key or request rejected; drop the key
    Rejected { code: u16, message: String },
}

impl ResponseClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResponseClass::Success => "success",
            ResponseClass::QuotaExceeded => "quota_exceeded",
            ResponseClass::Rejected { .. } => "rejected",
        }
    }
}

pub fn classify(response: &SearchResponse) -> ResponseClass {
    if let Some(err) = &response.payload.error {
        let quota = err.code == 403
            && err.errors.iter().any(|e| e.reason == QUOTA_EXCEEDED_REASON);
        if quota {
            return ResponseClass::QuotaExceeded;
        }

        let code = if err.code != 0 { err.code } else { response.status };
        return ResponseClass::Rejected {
            code,
            message: err.message.clone(),
        };
    }

    if !(200..300).contains(&response.status) {
        return ResponseClass::Rejected {
            code: response.status,
            message: format!("HTTP {}", response.status),
        };
    }

    ResponseClass::Success
}

impl SearchItem {
    /// Map a search hit to a stored video. Items without an id or publish time are skipped.
    pub fn into_video(self) -> Option<Video> {
        if self.id.video_id.is_empty() {
            warn!("Search item without a video id, skipping");
            return None;
        }

        let published_at = match self.snippet.published_at {
            Some(ts) => ts,
            None => {
                warn!(video_id = %self.id.video_id, "Search item without publishedAt, skipping");
                return None;
            }
        };

        Some(Video {
            video_id: self.id.video_id,
            title: self.snippet.title,
            description: self.snippet.description,
            published_at,
            thumbnail_url: self
                .snippet
                .thumbnails
                .default
                .map(|t| t.url)
                .unwrap_or_default(),
            channel_title: self.snippet.channel_title,
            channel_id: self.snippet.channel_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn response(status: u16, body: &str) -> SearchResponse {
        SearchResponse {
            status,
            payload: serde_json::from_str(body).unwrap(),
        }
    }

    #[test]
    fn test_decode_and_translate_item() {
        let resp = response(
            200,
            r#"{
                "kind": "youtube#searchListResponse",
                "items": [{
                    "id": {"kind": "youtube#video", "videoId": "abc123"},
                    "snippet": {
                        "publishedAt": "2024-05-01T08:30:00Z",
                        "channelId": "UC1",
                        "title": "Morning bulletin",
                        "description": "Top stories",
                        "thumbnails": {"default": {"url": "https://i.ytimg.com/vi/abc123/default.jpg", "width": 120}},
                        "channelTitle": "Daily"
                    }
                }]
            }"#,
        );
        assert_eq!(classify(&resp), ResponseClass::Success);

        let video = resp.payload.items[0].clone().into_video().unwrap();
        assert_eq!(video.video_id, "abc123");
        assert_eq!(video.channel_title, "Daily");
        assert_eq!(video.thumbnail_url, "https://i.ytimg.com/vi/abc123/default.jpg");
        assert_eq!(
            video.published_at,
            Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap()
        );
    }

    #[test]
    fn test_item_without_id_is_skipped() {
        let resp = response(200, r#"{"items": [{"snippet": {"publishedAt": "2024-05-01T08:30:00Z"}}]}"#);
        assert!(resp.payload.items[0].clone().into_video().is_none());
    }

    #[test]
    fn test_quota_exceeded() {
        let resp = response(
            403,
            r#"{"error": {"code": 403, "message": "quota", "errors": [
                {"message": "quota", "domain": "youtube.quota", "reason": "quotaExceeded"}
            ]}}"#,
        );
        assert_eq!(classify(&resp), ResponseClass::QuotaExceeded);
    }

    #[test]
    fn test_forbidden_without_quota_reason_is_rejected() {
        let resp = response(
            403,
            r#"{"error": {"code": 403, "message": "forbidden", "errors": [{"reason": "forbidden"}]}}"#,
        );
        assert!(matches!(classify(&resp), ResponseClass::Rejected { code: 403, .. }));
    }

    #[test]
    fn test_error_codes_are_rejected() {
        for code in [400u16, 404, 500, 503] {
            let body = format!(r#"{{"error": {{"code": {}, "message": "nope"}}}}"#, code);
            let resp = response(code, &body);
            assert_eq!(
                classify(&resp),
                ResponseClass::Rejected {
                    code,
                    message: "nope".into()
                }
            );
        }
    }

    #[test]
    fn test_error_status_without_error_object() {
        let resp = SearchResponse {
            status: 502,
            payload: SearchPayload::default(),
        };
        assert!(matches!(classify(&resp), ResponseClass::Rejected { code: 502, .. }));
    }
}
