//! Integration tests for orderflow-engine.
//!
//! These tests drive a full engine against local mock servers:
//! - push feed lifecycle (connect, events, reconnect, shutdown)
//! - snapshot polling and corrective re-sync over HTTP
//! - optimistic status commands end to end

pub mod common;
