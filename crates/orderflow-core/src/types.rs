//! Order record shapes.
//!
//! - `OrderRecord`: complete record as returned by the snapshot endpoint.
//! - `OrderPatch`: partial record carried by push upserts and command
//!   responses. Absent fields mean "unchanged", never "cleared".
//! - `Order`: the canonical stored form owned by the order store.

use crate::money::Money;
use crate::order::{OrderId, OrderStatus};
use serde::{Deserialize, Serialize};

/// Complete order record (snapshot endpoint).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub status: OrderStatus,
    pub customer: String,
    pub date: String,
    pub time: String,
    pub amount: Money,
    /// Optional server-side revision, used to discard stale payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

/// Partial order record (push upserts, command responses).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPatch {
    pub id: OrderId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub customer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<Money>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revision: Option<u64>,
}

impl OrderPatch {
    /// A patch that only changes the status.
    pub fn status_only(id: OrderId, status: OrderStatus) -> Self {
        Self {
            id,
            status: Some(status),
            customer: None,
            date: None,
            time: None,
            amount: None,
            revision: None,
        }
    }

    /// Returns true if both sides carry a revision and this patch is older.
    pub fn is_stale_against(&self, current: &Order) -> bool {
        matches!(
            (self.revision, current.revision),
            (Some(incoming), Some(stored)) if incoming < stored
        )
    }
}

impl From<OrderRecord> for OrderPatch {
    fn from(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            status: Some(record.status),
            customer: Some(record.customer),
            date: Some(record.date),
            time: Some(record.time),
            amount: Some(record.amount),
            revision: record.revision,
        }
    }
}

/// Canonical stored order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    pub status: OrderStatus,
    pub customer: String,
    pub date: String,
    pub time: String,
    pub amount: Option<Money>,
    pub revision: Option<u64>,
}

impl Order {
    /// Create an order from its first observed patch.
    ///
    /// Returns `None` if the patch has no status, since a stored order
    /// must always carry one.
    pub fn from_patch(patch: OrderPatch) -> Option<Self> {
        let status = patch.status?;
        Some(Self {
            id: patch.id,
            status,
            customer: patch.customer.unwrap_or_default(),
            date: patch.date.unwrap_or_default(),
            time: patch.time.unwrap_or_default(),
            amount: patch.amount,
            revision: patch.revision,
        })
    }

    /// Shallow-merge the present fields of `patch` into `self`.
    ///
    /// Returns true if any field changed.
    pub fn merge(&mut self, patch: OrderPatch) -> bool {
        let before = self.clone();

        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(customer) = patch.customer {
            self.customer = customer;
        }
        if let Some(date) = patch.date {
            self.date = date;
        }
        if let Some(time) = patch.time {
            self.time = time;
        }
        if let Some(amount) = patch.amount {
            self.amount = Some(amount);
        }
        if let Some(revision) = patch.revision {
            self.revision = Some(revision);
        }

        *self != before
    }
}

impl From<OrderRecord> for Order {
    fn from(record: OrderRecord) -> Self {
        Self {
            id: record.id,
            status: record.status,
            customer: record.customer,
            date: record.date,
            time: record.time,
            amount: Some(record.amount),
            revision: record.revision,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record_json() -> serde_json::Value {
        json!({
            "id": "A1",
            "status": "pending",
            "customer": "X",
            "date": "2025-01-01",
            "time": "10:00",
            "amount": 100
        })
    }

    #[test]
    fn test_record_decodes_numeric_amount() {
        let record: OrderRecord = serde_json::from_value(record_json()).unwrap();
        assert_eq!(record.id.as_str(), "A1");
        assert_eq!(record.status, OrderStatus::Pending);
        assert_eq!(record.amount, Money::new(10_000, "PKR"));
        assert_eq!(record.revision, None);
    }

    #[test]
    fn test_record_requires_all_fields() {
        let mut value = record_json();
        value.as_object_mut().unwrap().remove("customer");
        assert!(serde_json::from_value::<OrderRecord>(value).is_err());
    }

    #[test]
    fn test_patch_allows_missing_fields() {
        let patch: OrderPatch = serde_json::from_value(json!({"id": "A1"})).unwrap();
        assert!(patch.status.is_none());
        assert!(Order::from_patch(patch).is_none());
    }

    #[test]
    fn test_merge_preserves_absent_fields() {
        let record: OrderRecord = serde_json::from_value(record_json()).unwrap();
        let mut order = Order::from(record);

        let patch: OrderPatch =
            serde_json::from_value(json!({"id": "A1", "status": "confirmed"})).unwrap();
        assert!(order.merge(patch.clone()));
        assert_eq!(order.status, OrderStatus::Confirmed);
        assert_eq!(order.customer, "X");
        assert_eq!(order.amount, Some(Money::new(10_000, "PKR")));

        // Same patch again changes nothing.
        assert!(!order.merge(patch));
    }

    #[test]
    fn test_stale_revision() {
        let mut record: OrderRecord = serde_json::from_value(record_json()).unwrap();
        record.revision = Some(5);
        let order = Order::from(record);

        let mut patch = OrderPatch::status_only(order.id.clone(), OrderStatus::Cancelled);
        assert!(!patch.is_stale_against(&order));
        patch.revision = Some(4);
        assert!(patch.is_stale_against(&order));
        patch.revision = Some(5);
        assert!(!patch.is_stale_against(&order));
    }

    #[test]
    fn test_patch_from_record_is_complete() {
        let record: OrderRecord = serde_json::from_value(record_json()).unwrap();
        let patch = OrderPatch::from(record.clone());
        assert_eq!(Order::from_patch(patch), Some(Order::from(record)));
    }
}
