//! Server-Sent Events push adapter.
//!
//! Speaks the same message contract as the WebSocket transport over a
//! long-lived `text/event-stream` response. After `max_connect_failures`
//! consecutive failed connects the adapter gives up with
//! `FeedError::AdapterUnrecoverable` so the caller can fall back to the
//! WebSocket transport.

use crate::backoff::Backoff;
use crate::connection::{forward_events, ConnectionState};
use crate::error::{FeedError, FeedResult};
use crate::message::{parse_payload, FeedEvent};
use futures_util::StreamExt;
use orderflow_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use reqwest::header::{ACCEPT, AUTHORIZATION};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Derive an SSE URL from a WebSocket URL (`ws://` → `http://`,
/// `wss://` → `https://`). Other URLs are returned unchanged.
pub fn derive_sse_url(feed_url: &str) -> String {
    for (ws, http) in [("wss://", "https://"), ("ws://", "http://")] {
        if let Some(prefix) = feed_url.get(..ws.len()) {
            if prefix.eq_ignore_ascii_case(ws) {
                return format!("{http}{}", &feed_url[ws.len()..]);
            }
        }
    }
    feed_url.to_string()
}

/// Incremental `text/event-stream` decoder.
///
/// Feed it raw body chunks; it returns the `data` of every event completed
/// by the chunk. Multi-line data is joined with `\n`. Comments and fields
/// other than `data` are ignored.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    data: String,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let mut line: Vec<u8> = self.buffer.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = self.process_line(&line) {
                events.push(event);
            }
        }
        events
    }

    fn process_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if !self.has_data {
                return None;
            }
            self.has_data = false;
            return Some(std::mem::take(&mut self.data));
        }
        if line.starts_with(':') {
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(value);
            self.has_data = true;
        }
        None
    }
}

/// SSE adapter configuration.
#[derive(Debug, Clone)]
pub struct SseConfig {
    pub url: String,
    pub auth_token: Option<String>,
    /// Consecutive failed connects before giving up.
    pub max_connect_failures: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub connect_timeout_ms: u64,
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            auth_token: None,
            max_connect_failures: 3,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
            connect_timeout_ms: 10000,
        }
    }
}

/// Server-Sent Events adapter.
pub struct SseAdapter {
    config: SseConfig,
    client: reqwest::Client,
    state: RwLock<ConnectionState>,
    backoff: Mutex<Backoff>,
    event_tx: mpsc::Sender<FeedEvent>,
    shutdown_token: CancellationToken,
}

impl SseAdapter {
    pub fn new(
        config: SseConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        shutdown_token: CancellationToken,
    ) -> FeedResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        let backoff = Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms);

        Ok(Self {
            config,
            client,
            state: RwLock::new(ConnectionState::Disconnected),
            backoff: Mutex::new(backoff),
            event_tx,
            shutdown_token,
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn shutdown(&self) {
        info!("SseAdapter shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Run until shutdown, or until connecting fails too many times in a row.
    pub async fn run(&self) -> FeedResult<()> {
        let mut failures = 0u32;

        loop {
            if self.shutdown_token.is_cancelled() {
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.open_stream().await {
                Ok(Some(response)) => {
                    failures = 0;
                    self.backoff.lock().reset();
                    self.set_state(ConnectionState::Connected);
                    Metrics::feed_connected();
                    info!(url = %self.config.url, "SSE stream opened");

                    match self.read_stream(response).await {
                        Ok(true) => {
                            self.set_state(ConnectionState::Disconnected);
                            return Ok(());
                        }
                        Ok(false) => info!("SSE stream ended"),
                        Err(e) => warn!(error = %e, "SSE stream error"),
                    }
                    Metrics::feed_disconnected();
                }
                Ok(None) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Err(e) => {
                    failures += 1;
                    warn!(error = %e, failures, "SSE connect failed");
                    if failures >= self.config.max_connect_failures {
                        error!(failures, "SSE adapter giving up");
                        self.set_state(ConnectionState::Disconnected);
                        return Err(FeedError::AdapterUnrecoverable { failures });
                    }
                }
            }

            self.set_state(ConnectionState::Reconnecting);
            Metrics::feed_reconnect("sse");
            let delay = self.backoff.lock().next_delay();
            debug!(delay_ms = delay.as_millis() as u64, "SSE reconnecting");

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    /// Returns `Ok(None)` if shutdown was requested while connecting.
    async fn open_stream(&self) -> FeedResult<Option<reqwest::Response>> {
        let mut request = self
            .client
            .get(&self.config.url)
            .header(ACCEPT, "text/event-stream");
        if let Some(token) = &self.config.auth_token {
            request = request.header(AUTHORIZATION, format!("Bearer {token}"));
        }

        tokio::select! {
            result = request.send() => {
                let response = result?.error_for_status()?;
                Ok(Some(response))
            }
            () = self.shutdown_token.cancelled() => Ok(None),
        }
    }

    /// Returns `Ok(true)` when stopped by shutdown.
    async fn read_stream(&self, response: reqwest::Response) -> FeedResult<bool> {
        let mut stream = response.bytes_stream();
        let mut decoder = SseDecoder::new();

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => return Ok(true),
                chunk = stream.next() => {
                    let Some(chunk) = chunk else {
                        return Ok(false);
                    };
                    for data in decoder.push(&chunk?) {
                        if !self.handle_data(&data).await {
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }

    async fn handle_data(&self, data: &str) -> bool {
        let parsed = match parse_payload(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable SSE payload");
                Metrics::feed_dropped("unparsable");
                return true;
            }
        };
        for _ in 0..parsed.dropped {
            Metrics::feed_dropped("malformed_event");
        }
        forward_events(&self.event_tx, parsed.events, || true).await
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        Metrics::feed_state_set(state.as_str());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header::CONTENT_TYPE;
    use axum::routing::get;
    use axum::Router;
    use tokio::net::TcpListener;

    #[test]
    fn test_derive_sse_url() {
        assert_eq!(derive_sse_url("ws://host/orders"), "http://host/orders");
        assert_eq!(derive_sse_url("WSS://host/orders"), "https://host/orders");
        assert_eq!(derive_sse_url("http://host/orders"), "http://host/orders");
        assert_eq!(derive_sse_url("Ws://host:8080/live"), "http://host:8080/live");
        assert_eq!(derive_sse_url("wsx://host"), "wsx://host");
    }

    #[test]
    fn test_decoder_joins_data_lines() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":\ndata: 1}\n\n");
        assert_eq!(events, vec!["{\"a\":\n1}".to_string()]);
    }

    #[test]
    fn test_decoder_handles_split_chunks_and_crlf() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"event: order\r\nda").is_empty());
        assert!(decoder.push(b"ta: first\r\n").is_empty());
        let events = decoder.push(b"\r\ndata: second\n\n");
        assert_eq!(events, vec!["first".to_string(), "second".to_string()]);
    }

    #[test]
    fn test_decoder_ignores_comments_and_empty_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keep-alive\n\nid: 7\nretry: 100\n\ndata\n\n");
        assert_eq!(events, vec![String::new()]);
    }

    #[tokio::test]
    async fn test_gives_up_after_consecutive_failures() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (tx, _rx) = mpsc::channel(8);
        let config = SseConfig {
            url: format!("http://{addr}/events"),
            max_connect_failures: 3,
            reconnect_base_delay_ms: 1,
            reconnect_max_delay_ms: 2,
            ..Default::default()
        };
        let adapter = SseAdapter::new(config, tx, CancellationToken::new()).unwrap();

        let result = tokio::time::timeout(Duration::from_secs(5), adapter.run())
            .await
            .unwrap();
        assert!(matches!(
            result,
            Err(FeedError::AdapterUnrecoverable { failures: 3 })
        ));
    }

    #[tokio::test]
    async fn test_forwards_events_from_stream() {
        let app = Router::new().route(
            "/events",
            get(|| async {
                (
                    [(CONTENT_TYPE, "text/event-stream")],
                    ": hello\n\ndata: {\"action\":\"upsert\",\"order\":{\"id\":\"A1\",\"status\":\"confirmed\"}}\n\n",
                )
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let (tx, mut rx) = mpsc::channel(8);
        let token = CancellationToken::new();
        let config = SseConfig {
            url: format!("http://{addr}/events"),
            reconnect_base_delay_ms: 50,
            ..Default::default()
        };
        let adapter = SseAdapter::new(config, tx, token.clone()).unwrap();
        let runner = tokio::spawn(async move { adapter.run().await });

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.action(), "upsert");
        assert_eq!(event.order_id().as_str(), "A1");

        token.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }
}
