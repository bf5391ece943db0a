//! Prometheus metrics and structured logging for the order sync engine.
//!
//! - Prometheus metrics for feed connectivity, snapshot cycles, commands
//! - Structured JSON logging with tracing in production, pretty otherwise

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::init_logging;
pub use metrics::Metrics;
