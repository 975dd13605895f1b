use thiserror::Error;

#[derive(Error, Debug)]
pub enum VidsyncError {
    #[error("No API credentials available")]
    PoolExhausted,

    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Upstream transport error: {0}")]
    UpstreamTransient(String),

    #[error("Upstream quota exceeded")]
    UpstreamQuota,

    #[error("Upstream rejected request ({code}): {message}")]
    UpstreamRejected { code: u16, message: String },

    #[error("Malformed upstream payload: {0}")]
    UpstreamMalformed(String),

    #[error("Write failed after {attempts} attempts: {last}")]
    WriteFailed { attempts: u32, last: String },

    #[error("Write deadline exceeded after {attempts} attempts")]
    WriteDeadline { attempts: u32 },

    #[error("Encoding error: {0}")]
    EncodingFailed(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl VidsyncError {
    /// Whether the error is caused by the caller's input rather than by the service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            VidsyncError::BadRequest(_) | VidsyncError::InvalidCredential(_)
        )
    }
}

impl From<reqwest::Error> for VidsyncError {
    fn from(err: reqwest::Error) -> Self {
        VidsyncError::UpstreamTransient(err.to_string())
    }
}

impl From<redis::RedisError> for VidsyncError {
    fn from(err: redis::RedisError) -> Self {
        VidsyncError::CacheUnavailable(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for VidsyncError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        VidsyncError::EncodingFailed(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for VidsyncError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        VidsyncError::EncodingFailed(err.to_string())
    }
}

impl From<serde_json::Error> for VidsyncError {
    fn from(err: serde_json::Error) -> Self {
        VidsyncError::EncodingFailed(err.to_string())
    }
}
