//! Prometheus metrics for the order sync engine.
//!
//! Covers:
//! - Push feed connection state and reconnects
//! - Feed events applied and dropped
//! - Snapshot cycles (scheduled and corrective)
//! - Status-change commands by outcome
//! - Store size and change volume
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a programming error that should
//! crash at startup. These panics only occur during static initialization.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    register_int_gauge, CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, IntGauge,
    TextEncoder,
};

/// Feed connection state (1 = connected, 0 = disconnected).
pub static FEED_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "orderflow_feed_connected",
        "Push feed connection state (1=connected)"
    )
    .unwrap()
});

/// Feed state machine current state.
/// Labels: state (disconnected/connecting/connected/reconnecting)
pub static FEED_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "orderflow_feed_state",
        "Push feed state machine current state (1=active, 0=inactive)",
        &["state"]
    )
    .unwrap()
});

/// Total reconnect cycles scheduled.
pub static FEED_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_feed_reconnect_total",
        "Total push feed reconnect cycles",
        &["transport"]
    )
    .unwrap()
});

/// Feed events forwarded to the store.
pub static FEED_EVENTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_feed_events_total",
        "Push feed events forwarded to the store",
        &["action"]
    )
    .unwrap()
});

/// Feed events or payloads dropped as malformed.
pub static FEED_DROPPED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_feed_dropped_total",
        "Push feed payloads or events dropped",
        &["reason"]
    )
    .unwrap()
});

/// Snapshot cycles by trigger and result.
pub static SNAPSHOT_CYCLES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_snapshot_cycles_total",
        "Snapshot fetch cycles",
        &["trigger", "result"]
    )
    .unwrap()
});

/// Snapshot fetch latency in milliseconds.
pub static SNAPSHOT_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "orderflow_snapshot_latency_ms",
        "Snapshot fetch latency in milliseconds",
        &["trigger"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

/// Status-change commands by outcome.
pub static COMMANDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_commands_total",
        "Status-change commands by outcome",
        &["outcome"]
    )
    .unwrap()
});

/// Orders currently held in the store.
pub static STORE_ORDERS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("orderflow_store_orders", "Orders currently in the store").unwrap()
});

/// Effective store changes by source.
pub static STORE_CHANGES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "orderflow_store_changes_total",
        "Effective store changes",
        &["source"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    /// Record feed connected.
    pub fn feed_connected() {
        FEED_CONNECTED.set(1.0);
    }

    /// Record feed disconnected.
    pub fn feed_disconnected() {
        FEED_CONNECTED.set(0.0);
    }

    /// Set feed state machine state.
    /// Only the active state is set to 1, all others to 0.
    pub fn feed_state_set(state: &str) {
        for s in &["disconnected", "connecting", "connected", "reconnecting"] {
            FEED_STATE.with_label_values(&[s]).set(0.0);
        }
        FEED_STATE.with_label_values(&[state]).set(1.0);
    }

    pub fn feed_reconnect(transport: &str) {
        FEED_RECONNECT_TOTAL.with_label_values(&[transport]).inc();
    }

    pub fn feed_event(action: &str) {
        FEED_EVENTS_TOTAL.with_label_values(&[action]).inc();
    }

    pub fn feed_dropped(reason: &str) {
        FEED_DROPPED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Record a finished snapshot cycle.
    pub fn snapshot_cycle(trigger: &str, ok: bool, latency_ms: f64) {
        let result = if ok { "ok" } else { "failed" };
        SNAPSHOT_CYCLES_TOTAL
            .with_label_values(&[trigger, result])
            .inc();
        SNAPSHOT_LATENCY_MS
            .with_label_values(&[trigger])
            .observe(latency_ms);
    }

    pub fn command(outcome: &str) {
        COMMANDS_TOTAL.with_label_values(&[outcome]).inc();
    }

    pub fn store_size(orders: usize) {
        STORE_ORDERS.set(orders as i64);
    }

    pub fn store_change(source: &str) {
        STORE_CHANGES_TOTAL.with_label_values(&[source]).inc();
    }

    /// Render all registered metrics in the Prometheus text format.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
