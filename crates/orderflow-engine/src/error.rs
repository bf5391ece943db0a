//! Engine error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] orderflow_feed::FeedError),

    #[error("API error: {0}")]
    Api(#[from] orderflow_api::ApiError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] orderflow_telemetry::TelemetryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
