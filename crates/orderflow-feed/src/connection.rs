//! WebSocket connection manager.
//!
//! Handles connection lifecycle, automatic reconnection with exponential
//! backoff, and forwarding of validated feed events to the engine.

use crate::backoff::Backoff;
use crate::error::{FeedError, FeedResult};
use crate::message::{parse_payload, FeedEvent};
use futures_util::{SinkExt, StreamExt};
use orderflow_telemetry::Metrics;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::{connect_async_tls_with_config, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Maximum consecutive reconnection cycles (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 0, // Infinite
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 30000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
        }
    }
}

/// How a single connection session ended.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// Server closed the stream without an error.
    Closed,
    /// A newer generation took over; reconnect without waiting.
    Superseded,
    Shutdown,
}

/// WebSocket connection manager.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: Arc<RwLock<ConnectionState>>,
    backoff: Mutex<Backoff>,
    /// Connection generation. Bumped per connect attempt and by
    /// `force_reconnect`; sessions from older generations are discarded.
    generation: watch::Sender<u64>,
    /// Consecutive reconnect cycles since the last successful open.
    reconnect_count: AtomicU32,
    event_tx: mpsc::Sender<FeedEvent>,
    /// Cancellation token for graceful shutdown.
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    /// Create a new connection manager.
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<FeedEvent>) -> Self {
        Self::with_shutdown_token(config, event_tx, CancellationToken::new())
    }

    /// Create a connection manager that stops when `shutdown_token` is cancelled.
    pub fn with_shutdown_token(
        config: ConnectionConfig,
        event_tx: mpsc::Sender<FeedEvent>,
        shutdown_token: CancellationToken,
    ) -> Self {
        let backoff = Backoff::new(config.reconnect_base_delay_ms, config.reconnect_max_delay_ms);
        let (generation, _) = watch::channel(0);
        Self {
            config,
            state: Arc::new(RwLock::new(ConnectionState::Disconnected)),
            backoff: Mutex::new(backoff),
            generation,
            reconnect_count: AtomicU32::new(0),
            event_tx,
            shutdown_token,
        }
    }

    /// Get current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Current backoff attempt (0 after a successful connect).
    pub fn reconnect_attempt(&self) -> u32 {
        self.backoff.lock().attempt()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Drop the current session and reconnect immediately.
    ///
    /// Any connect already in flight completes into a stale generation and
    /// is discarded.
    pub fn force_reconnect(&self) {
        let generation = self.bump_generation();
        info!(generation, "Forced reconnect requested");
    }

    /// Signal graceful shutdown.
    ///
    /// Cancels the shutdown token, which will cause both the message loop
    /// and reconnect loop to exit promptly.
    pub fn shutdown(&self) {
        info!("ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    /// Check if shutdown has been requested.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Connect to the feed and run the message loop until shutdown.
    ///
    /// Returns `Err(MaxReconnectAttempts)` only when a reconnect limit is
    /// configured and exhausted.
    pub async fn connect(&self) -> FeedResult<()> {
        loop {
            if self.is_shutdown() {
                info!("Shutdown requested, exiting connect loop");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            self.set_state(ConnectionState::Connecting);

            match self.run_session().await {
                Ok(SessionEnd::Shutdown) => {
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
                Ok(SessionEnd::Superseded) => {
                    debug!("Session superseded, reconnecting immediately");
                    Metrics::feed_reconnect("websocket");
                    continue;
                }
                Ok(SessionEnd::Closed) => {
                    info!("WebSocket connection closed");
                }
                Err(e) => {
                    error!(?e, "WebSocket connection error");
                }
            }
            Metrics::feed_disconnected();

            if self.is_shutdown() {
                info!("Shutdown requested after disconnect, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return Ok(());
            }

            let cycles = self.reconnect_count.fetch_add(1, Ordering::SeqCst) + 1;
            if self.config.max_reconnect_attempts > 0
                && cycles >= self.config.max_reconnect_attempts
            {
                error!(cycles, "Max reconnection attempts reached");
                self.set_state(ConnectionState::Disconnected);
                return Err(FeedError::MaxReconnectAttempts(cycles));
            }

            self.set_state(ConnectionState::Reconnecting);
            Metrics::feed_reconnect("websocket");

            let delay = self.backoff.lock().next_delay();
            warn!(cycles, delay_ms = delay.as_millis() as u64, "Reconnecting");

            // Wait for delay OR shutdown signal (cancellation-aware sleep)
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown requested during backoff, exiting");
                    self.set_state(ConnectionState::Disconnected);
                    return Ok(());
                }
            }
        }
    }

    async fn run_session(&self) -> FeedResult<SessionEnd> {
        let generation = self.bump_generation();
        let mut generation_rx = self.generation.subscribe();
        info!(url = %self.config.url, generation, "Connecting to WebSocket");

        let connected = tokio::select! {
            result = connect_async_tls_with_config(&self.config.url, None, true, None) => result?,
            () = self.shutdown_token.cancelled() => return Ok(SessionEnd::Shutdown),
        };

        if self.generation() != generation {
            debug!(generation, "Discarding stale connection");
            return Ok(SessionEnd::Superseded);
        }

        let (ws_stream, _response) = connected;
        let (mut write, mut read) = ws_stream.split();

        self.set_state(ConnectionState::Connected);
        self.backoff.lock().reset();
        self.reconnect_count.store(0, Ordering::SeqCst);
        Metrics::feed_connected();
        info!(generation, "WebSocket connected");

        loop {
            tokio::select! {
                biased;

                () = self.shutdown_token.cancelled() => {
                    info!("Shutdown signal received in message loop");
                    if let Err(e) = write.send(Message::Close(None)).await {
                        warn!(?e, "Failed to send Close frame during shutdown");
                    }
                    return Ok(SessionEnd::Shutdown);
                }

                _ = generation_rx.changed() => {
                    if let Err(e) = write.send(Message::Close(None)).await {
                        debug!(?e, "Failed to send Close frame for superseded session");
                    }
                    return Ok(SessionEnd::Superseded);
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            if !self.handle_text_message(&text, generation).await {
                                return Ok(SessionEnd::Shutdown);
                            }
                        }
                        Some(Ok(Message::Ping(data))) => {
                            debug!("Received ping, sending pong");
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let (code, reason) = frame
                                .map(|f| (f.code.into(), f.reason.to_string()))
                                .unwrap_or((1000, "Normal close".to_string()));
                            warn!(code, %reason, "WebSocket closed by server");
                            return Err(FeedError::ConnectionClosed { code, reason });
                        }
                        Some(Err(e)) => {
                            error!(?e, "WebSocket read error");
                            return Err(e.into());
                        }
                        None => {
                            warn!("WebSocket stream ended");
                            return Ok(SessionEnd::Closed);
                        }
                        _ => {}
                    }
                }
            }
        }
    }

    /// Parse and forward one text frame.
    ///
    /// Returns false if the event receiver is gone.
    async fn handle_text_message(&self, text: &str, generation: u64) -> bool {
        let parsed = match parse_payload(text) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Dropping unparsable feed payload");
                Metrics::feed_dropped("unparsable");
                return true;
            }
        };
        for _ in 0..parsed.dropped {
            Metrics::feed_dropped("malformed_event");
        }

        forward_events(&self.event_tx, parsed.events, || {
            self.generation() == generation
        })
        .await
    }

    fn bump_generation(&self) -> u64 {
        self.generation.send_modify(|g| *g += 1);
        self.generation()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.write() = state;
        Metrics::feed_state_set(state.as_str());
    }
}

/// Forward events while `is_current` holds.
///
/// Returns false if the receiver has been dropped.
pub(crate) async fn forward_events(
    event_tx: &mpsc::Sender<FeedEvent>,
    events: Vec<FeedEvent>,
    is_current: impl Fn() -> bool,
) -> bool {
    for event in events {
        if !is_current() {
            debug!("Stale session, not forwarding remaining events");
            return true;
        }
        Metrics::feed_event(event.action());
        if event_tx.send(event).await.is_err() {
            warn!("Feed event receiver dropped");
            return false;
        }
    }
    true
}
