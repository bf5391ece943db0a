//! Push feed transports for live order updates.
//!
//! Provides:
//! - WebSocket connection manager with exponential backoff and
//!   generation-guarded reconnects
//! - Server-Sent Events adapter speaking the same message contract
//! - Message contract parsing (single event or batch)
//!
//! Both transports forward validated `FeedEvent`s over an mpsc channel.

pub mod backoff;
pub mod connection;
pub mod error;
pub mod message;
pub mod sse;

pub use backoff::Backoff;
pub use connection::{ConnectionConfig, ConnectionManager, ConnectionState};
pub use error::{FeedError, FeedResult};
pub use message::{parse_payload, FeedEvent, ParsedPayload};
pub use sse::{derive_sse_url, SseAdapter, SseConfig, SseDecoder};

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Initialize the TLS crypto provider.
/// Must be called before any feed connections are made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
