use crate::error::VidsyncError;
use crate::ingest::credentials::mask_credential;
use crate::metrics::SharedMetrics;
use crate::model::format_timestamp;
use crate::services::youtube::{SearchClient, SearchPayload, SearchResponse};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use std::time::{Duration, Instant};
use tracing::{debug, instrument, trace};

#[derive(Clone)]
pub struct YoutubeApi {
    client: Client,
    base_url: String,
    metrics: SharedMetrics,
}

impl YoutubeApi {
    pub fn new(base_url: &str, timeout: Duration, metrics: SharedMetrics) -> Self {
        Self {
            client: Client::builder()
                .timeout(timeout)
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: base_url.to_string(),
            metrics,
        }
    }
}

/// Decode a response body. Error statuses may carry a non-JSON body; those still
/// classify by status, so they decode to an empty payload.
fn decode_body(status: u16, body: &[u8]) -> Result<SearchPayload, VidsyncError> {
    match serde_json::from_slice::<SearchPayload>(body) {
        Ok(payload) => Ok(payload),
        Err(e) if (200..300).contains(&status) => Err(VidsyncError::UpstreamMalformed(e.to_string())),
        Err(_) => Ok(SearchPayload::default()),
    }
}

#[async_trait]
impl SearchClient for YoutubeApi {
    #[instrument(skip(self, credential), fields(credential = %mask_credential(credential)))]
    async fn search(
        &self,
        credential: &str,
        query: &str,
        published_after: DateTime<Utc>,
    ) -> Result<SearchResponse, VidsyncError> {
        let published_after = format_timestamp(&published_after);
        let params = [
            ("key", credential),
            ("part", "snippet"),
            ("type", "video"),
            ("order", "date"),
            ("q", query),
            ("publishedAfter", published_after.as_str()),
        ];

        let start = Instant::now();
        debug!(url = %self.base_url, published_after = %published_after, "Sending search request");

        let resp = match self.client.get(&self.base_url).query(&params).send().await {
            Ok(resp) => resp,
            Err(e) => {
                self.metrics
                    .record_upstream("transport_error", start.elapsed().as_secs_f64());
                debug!(error = %e, elapsed_ms = start.elapsed().as_millis() as u64, "Search request failed");
                return Err(VidsyncError::from(e));
            }
        };

        let status = resp.status().as_u16();
        let body = match resp.bytes().await {
            Ok(body) => body,
            Err(e) => {
                self.metrics
                    .record_upstream("transport_error", start.elapsed().as_secs_f64());
                return Err(VidsyncError::from(e));
            }
        };

        let elapsed = start.elapsed();
        debug!(
            status = status,
            elapsed_ms = elapsed.as_millis() as u64,
            "Search response received"
        );
        trace!(response_bytes = body.len(), "Response body received");

        let payload = match decode_body(status, &body) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics
                    .record_upstream("malformed", elapsed.as_secs_f64());
                return Err(e);
            }
        };

        let response = SearchResponse { status, payload };
        self.metrics.record_upstream(
            crate::services::youtube::classify(&response).as_str(),
            elapsed.as_secs_f64(),
        );

        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_success_body() {
        let result = decode_body(200, b"<html>oops</html>");
        assert!(matches!(result, Err(VidsyncError::UpstreamMalformed(_))));
    }

    #[test]
    fn test_non_json_error_body_decodes_empty() {
        let payload = decode_body(502, b"Bad Gateway").unwrap();
        assert!(payload.items.is_empty());
        assert!(payload.error.is_none());
    }

    #[test]
    fn test_empty_success_body() {
        let payload = decode_body(200, b"{}").unwrap();
        assert!(payload.items.is_empty());
    }
}
