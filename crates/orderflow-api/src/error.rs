//! REST API error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("HTTP client error: {0}")]
    HttpClient(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ApiError {
    /// True if the server answered with a non-success status.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Status { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
