//! Engine configuration.

use crate::error::{EngineError, EngineResult};
use orderflow_api::OrderClientConfig;
use orderflow_feed::{derive_sse_url, ConnectionConfig, SseConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ORDERFLOW_CONFIG";

/// Environment variable overriding `auth_token`.
pub const AUTH_TOKEN_ENV: &str = "ORDERFLOW_AUTH_TOKEN";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Push transport selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Websocket,
    /// Server-Sent Events, falling back to WebSocket if it cannot connect.
    Sse,
}

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Push feed URL (WebSocket).
    #[serde(default = "default_feed_url")]
    pub feed_url: String,
    /// Snapshot endpoint (`GET`).
    #[serde(default = "default_snapshot_url")]
    pub snapshot_url: String,
    /// Status-update base URL; requests go to `{status_url}/{id}/status`.
    #[serde(default = "default_status_url")]
    pub status_url: String,
    #[serde(default)]
    pub transport: TransportKind,
    /// SSE endpoint. Derived from `feed_url` when unset.
    #[serde(default)]
    pub sse_url: Option<String>,
    /// Bearer token for REST and SSE requests.
    #[serde(default)]
    pub auth_token: Option<String>,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub websocket: WsConfig,
    #[serde(default)]
    pub sse: SseSettings,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub commands: CommandConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

fn default_feed_url() -> String {
    "ws://localhost:8080/orders/live".to_string()
}

fn default_snapshot_url() -> String {
    "http://localhost:8080/orders".to_string()
}

fn default_status_url() -> String {
    "http://localhost:8080/orders".to_string()
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

/// WebSocket reconnect settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsConfig {
    /// Base delay for reconnection backoff (ms).
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    /// Cap on the reconnection delay (ms).
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    /// Maximum reconnection attempts (0 = infinite).
    #[serde(default)]
    pub max_reconnect_attempts: u32,
}

fn default_reconnect_base_delay_ms() -> u64 {
    1000
}

fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            max_reconnect_attempts: 0,
        }
    }
}

/// SSE adapter settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SseSettings {
    /// Consecutive failed connects before falling back to WebSocket.
    #[serde(default = "default_max_connect_failures")]
    pub max_connect_failures: u32,
}

fn default_max_connect_failures() -> u32 {
    3
}

impl Default for SseSettings {
    fn default() -> Self {
        Self {
            max_connect_failures: default_max_connect_failures(),
        }
    }
}

/// Snapshot poller settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_poll_enabled")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,
}

fn default_poll_enabled() -> bool {
    true
}

fn default_poll_interval_ms() -> u64 {
    5000
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: default_poll_enabled(),
            interval_ms: default_poll_interval_ms(),
        }
    }
}

/// Command dispatcher settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandConfig {
    /// Reject status changes outside the lifecycle graph.
    #[serde(default = "default_enforce_transitions")]
    pub enforce_transitions: bool,
}

fn default_enforce_transitions() -> bool {
    true
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            enforce_transitions: default_enforce_transitions(),
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            feed_url: default_feed_url(),
            snapshot_url: default_snapshot_url(),
            status_url: default_status_url(),
            transport: TransportKind::default(),
            sse_url: None,
            auth_token: None,
            request_timeout_ms: default_request_timeout_ms(),
            websocket: WsConfig::default(),
            sse: SseSettings::default(),
            poll: PollConfig::default(),
            commands: CommandConfig::default(),
            telemetry: TelemetryConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration: `ORDERFLOW_CONFIG` if set, else
    /// `config/default.toml` if present, else defaults.
    pub fn load() -> EngineResult<Self> {
        let config_path =
            std::env::var(CONFIG_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());

        let config = if Path::new(&config_path).exists() {
            Self::from_file(&config_path)?
        } else {
            tracing::warn!(path = %config_path, "Config file not found, using defaults");
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Load configuration from file.
    pub fn from_file(path: &str) -> EngineResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read config: {e}")))?;

        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> EngineResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| EngineError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `ORDERFLOW_AUTH_TOKEN` if set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(token) = std::env::var(AUTH_TOKEN_ENV) {
            if !token.trim().is_empty() {
                self.auth_token = Some(token);
            }
        }
        self
    }

    pub fn validate(&self) -> EngineResult<()> {
        for (name, url) in [
            ("feed_url", &self.feed_url),
            ("snapshot_url", &self.snapshot_url),
            ("status_url", &self.status_url),
        ] {
            if url.trim().is_empty() {
                return Err(EngineError::Config(format!("{name} must not be empty")));
            }
        }
        if self.poll.enabled && self.poll.interval_ms == 0 {
            return Err(EngineError::Config(
                "poll.interval_ms must be positive".to_string(),
            ));
        }
        if self.websocket.reconnect_base_delay_ms > self.websocket.reconnect_max_delay_ms {
            return Err(EngineError::Config(
                "websocket.reconnect_base_delay_ms exceeds reconnect_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    /// Effective SSE URL.
    pub fn sse_url(&self) -> String {
        self.sse_url
            .clone()
            .unwrap_or_else(|| derive_sse_url(&self.feed_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll.interval_ms)
    }

    pub fn connection_config(&self) -> ConnectionConfig {
        ConnectionConfig {
            url: self.feed_url.clone(),
            max_reconnect_attempts: self.websocket.max_reconnect_attempts,
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_ms,
        }
    }

    pub fn sse_config(&self) -> SseConfig {
        SseConfig {
            url: self.sse_url(),
            auth_token: self.auth_token.clone(),
            max_connect_failures: self.sse.max_connect_failures,
            reconnect_base_delay_ms: self.websocket.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.websocket.reconnect_max_delay_ms,
            connect_timeout_ms: self.request_timeout_ms,
        }
    }

    pub fn client_config(&self) -> OrderClientConfig {
        OrderClientConfig {
            snapshot_url: self.snapshot_url.clone(),
            status_url: self.status_url.clone(),
            auth_token: self.auth_token.clone(),
            timeout: self.request_timeout(),
        }
    }
}
