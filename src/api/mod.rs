//! HTTP surface: read API, administrative endpoints, health and metrics.
//!
//! Every JSON endpoint answers with the same envelope:
//! `{"error": bool, "message"?: string, "response"?: any}`.

use crate::error::VidsyncError;
use crate::ingest::WatermarkHandle;
use crate::metrics::SharedMetrics;
use crate::model::format_timestamp;
use crate::services::videos::{GetLatestVideosRequest, VideoService};
use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, rejection::QueryRejection, Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub videos: VideoService,
    pub metrics: SharedMetrics,
    pub watermark: WatermarkHandle,
}

#[derive(Serialize, Debug)]
pub struct ApiResponse<T> {
    pub error: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<T>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(response: T) -> Self {
        Self {
            error: false,
            message: None,
            response: Some(response),
        }
    }
}

impl ApiResponse<()> {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            error: false,
            message: Some(message.into()),
            response: None,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            error: true,
            message: Some(message.into()),
            response: None,
        }
    }
}

/// Error wrapper that renders a `VidsyncError` as an enveloped HTTP response
pub struct ApiError(pub VidsyncError);

impl From<VidsyncError> for ApiError {
    fn from(err: VidsyncError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = if self.0.is_client_error() {
            (StatusCode::BAD_REQUEST, self.0.to_string())
        } else {
            error!(error = %self.0, "Request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            )
        };

        (status, Json(ApiResponse::failure(message))).into_response()
    }
}

#[derive(Deserialize, Debug)]
pub struct RegisterKeyRequest {
    pub key: String,
}

#[derive(Deserialize, Debug, Default)]
pub struct InvalidateRequest {
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct InvalidateResponse {
    pub deleted: u64,
    pub batches: usize,
    pub complete: bool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/videos", get(latest_videos_handler))
        .route("/videos/key", post(register_key_handler))
        .route("/cache/invalidate", post(invalidate_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn latest_videos_handler(
    State(state): State<AppState>,
    params: Result<Query<GetLatestVideosRequest>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|e| VidsyncError::BadRequest(e.body_text()))?;
    let videos = state.videos.get_latest_videos(&params).await?;
    Ok(Json(ApiResponse::ok(videos)))
}

async fn register_key_handler(
    State(state): State<AppState>,
    body: Result<Json<RegisterKeyRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(body) = body.map_err(|e| VidsyncError::BadRequest(e.body_text()))?;
    let added = state.videos.register_credential(&body.key).await?;

    let message = if added {
        "Key added to the pool"
    } else {
        "Key already present in the pool"
    };
    Ok(Json(ApiResponse::message(message)))
}

/// The body is optional; an empty body invalidates the whole namespace.
async fn invalidate_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: InvalidateRequest = if body.iter().all(u8::is_ascii_whitespace) {
        InvalidateRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| VidsyncError::BadRequest(e.to_string()))?
    };

    let scope = request.scope.as_deref().filter(|s| !s.is_empty());
    let outcome = state.videos.invalidate(scope).await;
    let response = InvalidateResponse {
        deleted: outcome.deleted,
        batches: outcome.batches,
        complete: outcome.is_complete(),
    };

    match outcome.error {
        None => Ok(Json(ApiResponse::ok(response)).into_response()),
        Some(e) => {
            error!(error = %e, deleted = response.deleted, "Cache invalidation incomplete");
            Ok((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse {
                    error: true,
                    message: Some("Cache invalidation incomplete".to_string()),
                    response: Some(response),
                }),
            )
                .into_response())
        }
    }
}

/// Prometheus metrics endpoint
async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let output = state.metrics.render();

    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        output,
    )
}

/// Health check endpoint
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let pool = state.videos.pool();
    let credentials = pool.snapshot().await;
    let watermark = state.watermark.lock().await.get();

    // Without credentials the ingestion loop is idle
    let status = if credentials.is_empty() { "degraded" } else { "healthy" };

    let body = serde_json::json!({
        "status": status,
        "credentials": credentials.len(),
        "credential_pool": credentials,
        "cache_backend": state.videos.cache_backend(),
        "watermark": format_timestamp(&watermark),
        "version": env!("CARGO_PKG_VERSION"),
    });

    (
        [(header::CONTENT_TYPE, "application/json")],
        body.to_string(),
    )
}
