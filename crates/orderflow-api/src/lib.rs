//! REST client for the order backend.
//!
//! - `GET {snapshot_url}`: full order collection
//! - `POST {status_url}/{id}/status`: status-change command
//!
//! The `OrderApi` trait is the seam the engine depends on, so tests can
//! substitute `MockOrderApi` for the HTTP client.

pub mod client;
pub mod error;

pub use client::{
    BoxFuture, DynOrderApi, MockOrderApi, MockStatusResult, OrderApi, OrderClient, OrderClientConfig,
    SnapshotBatch, StatusUpdateRequest, StatusUpdateResponse,
};
pub use error::{ApiError, ApiResult};
