//! Push feed message contract.
//!
//! A payload is either a single event object or an array of them:
//!
//! ```json
//! { "action": "upsert", "order": { "id": "A1", "status": "confirmed" } }
//! [ { "action": "delete", "orderId": "B2" } ]
//! ```
//!
//! Events without an `action` but with an `order` are treated as upserts.
//! A delete may name its target with `orderId`, `order.id` or a bare `id`.

use crate::error::{FeedError, FeedResult};
use orderflow_core::{OrderId, OrderPatch};
use serde_json::Value;
use tracing::warn;

/// Validated feed event, ready to be applied to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedEvent {
    Upsert(OrderPatch),
    Delete(OrderId),
}

impl FeedEvent {
    pub fn order_id(&self) -> &OrderId {
        match self {
            Self::Upsert(patch) => &patch.id,
            Self::Delete(id) => id,
        }
    }

    /// Label used in logs and metrics.
    pub fn action(&self) -> &'static str {
        match self {
            Self::Upsert(_) => "upsert",
            Self::Delete(_) => "delete",
        }
    }
}

/// Result of parsing one payload.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedPayload {
    pub events: Vec<FeedEvent>,
    /// Events in the payload that failed validation.
    pub dropped: usize,
}

/// Parse a raw payload into events.
///
/// Fails only when the payload as a whole is unusable (not JSON, or neither
/// an object nor an array). Malformed events inside a batch are dropped
/// individually and counted.
pub fn parse_payload(text: &str) -> FeedResult<ParsedPayload> {
    let value: Value = serde_json::from_str(text)?;

    let raw_events = match value {
        Value::Array(items) => items,
        obj @ Value::Object(_) => vec![obj],
        other => {
            return Err(FeedError::ParseError(format!(
                "expected event object or array, got {}",
                type_name(&other)
            )))
        }
    };

    let mut parsed = ParsedPayload::default();
    for raw in raw_events {
        match parse_event(raw) {
            Ok(event) => parsed.events.push(event),
            Err(e) => {
                warn!(error = %e, "Dropping malformed feed event");
                parsed.dropped += 1;
            }
        }
    }
    Ok(parsed)
}

fn parse_event(raw: Value) -> FeedResult<FeedEvent> {
    let Value::Object(mut obj) = raw else {
        return Err(FeedError::ParseError(format!(
            "event is {}, not an object",
            type_name(&raw)
        )));
    };

    let action = match obj.get("action") {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(s.to_ascii_lowercase()),
        Some(other) => {
            return Err(FeedError::ParseError(format!(
                "action is {}, not a string",
                type_name(other)
            )))
        }
    };

    match action.as_deref() {
        Some("delete") => delete_target(&obj).map(FeedEvent::Delete),
        Some("upsert") | None => {
            let order = obj
                .remove("order")
                .ok_or_else(|| FeedError::ParseError("upsert without order".to_string()))?;
            let patch: OrderPatch = serde_json::from_value(order)?;
            Ok(FeedEvent::Upsert(patch))
        }
        Some(other) => Err(FeedError::ParseError(format!("unknown action {other:?}"))),
    }
}

fn delete_target(obj: &serde_json::Map<String, Value>) -> FeedResult<OrderId> {
    // Null or blank ids fall through to the next source.
    let candidates = [
        obj.get("orderId"),
        obj.get("order").and_then(|order| order.get("id")),
        obj.get("id"),
    ];
    let candidate = candidates
        .into_iter()
        .flatten()
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
        .ok_or_else(|| FeedError::ParseError("delete without order id".to_string()))?;

    let raw = match candidate {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        other => {
            return Err(FeedError::ParseError(format!(
                "order id is {}",
                type_name(other)
            )))
        }
    };

    OrderId::new(raw).map_err(|e| FeedError::ParseError(e.to_string()))
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
