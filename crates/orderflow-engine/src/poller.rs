//! Snapshot poller.
//!
//! Fetches the full order collection on a fixed interval (first cycle
//! immediately) and overwrites each returned record in the store. Polling
//! never deletes: an order missing from a snapshot stays until a push
//! delete removes it. Corrective cycles requested by the dispatcher go
//! through the same fetch and apply path.

use crate::config::PollConfig;
use orderflow_api::{ApiResult, DynOrderApi, SnapshotBatch};
use orderflow_store::{ChangeSource, OrderStore, UpsertOutcome};
use orderflow_telemetry::Metrics;
use std::time::{Duration, Instant};
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, warn};

/// Why a snapshot cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotTrigger {
    Scheduled,
    /// Follow-up to a failed status command.
    Corrective,
}

impl SnapshotTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Scheduled => "scheduled",
            Self::Corrective => "corrective",
        }
    }
}

/// Per-cycle counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SnapshotStats {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub stale: usize,
    pub skipped: usize,
}

/// Poll interval; pends forever when polling is disabled.
pub struct PollSchedule {
    interval: Option<Interval>,
}

impl PollSchedule {
    pub fn new(config: &PollConfig) -> Self {
        let interval = config.enabled.then(|| {
            let mut interval =
                tokio::time::interval(Duration::from_millis(config.interval_ms.max(1)));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });
        Self { interval }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval.is_some()
    }

    /// Wait for the next cycle. The first tick completes immediately.
    pub async fn tick(&mut self) {
        match self.interval.as_mut() {
            Some(interval) => {
                interval.tick().await;
            }
            None => std::future::pending::<()>().await,
        }
    }
}

/// Fetch one snapshot.
pub async fn fetch_snapshot(
    api: DynOrderApi,
    trigger: SnapshotTrigger,
) -> (ApiResult<SnapshotBatch>, Duration) {
    debug!(trigger = trigger.as_str(), "Snapshot cycle started");
    let started = Instant::now();
    let result = api.fetch_orders().await;
    (result, started.elapsed())
}

/// Overwrite each fetched record in the store.
pub fn apply_snapshot(store: &mut OrderStore, batch: SnapshotBatch) -> SnapshotStats {
    let mut stats = SnapshotStats {
        skipped: batch.skipped,
        ..Default::default()
    };

    for record in batch.records {
        match store.replace(record, ChangeSource::Snapshot) {
            UpsertOutcome::Inserted => stats.inserted += 1,
            UpsertOutcome::Updated => stats.updated += 1,
            UpsertOutcome::Unchanged => stats.unchanged += 1,
            UpsertOutcome::Stale => stats.stale += 1,
            UpsertOutcome::Rejected => {}
        }
    }

    for _ in 0..stats.inserted + stats.updated {
        Metrics::store_change(ChangeSource::Snapshot.as_str());
    }
    stats
}

/// Apply a finished cycle. Failures are logged and skipped.
pub fn finish_cycle(
    store: &mut OrderStore,
    trigger: SnapshotTrigger,
    result: ApiResult<SnapshotBatch>,
    elapsed: Duration,
) -> Option<SnapshotStats> {
    let latency_ms = elapsed.as_secs_f64() * 1000.0;
    match result {
        Ok(batch) => {
            let stats = apply_snapshot(store, batch);
            Metrics::snapshot_cycle(trigger.as_str(), true, latency_ms);
            debug!(
                trigger = trigger.as_str(),
                inserted = stats.inserted,
                updated = stats.updated,
                unchanged = stats.unchanged,
                stale = stats.stale,
                skipped = stats.skipped,
                "Snapshot applied"
            );
            Some(stats)
        }
        Err(e) => {
            Metrics::snapshot_cycle(trigger.as_str(), false, latency_ms);
            warn!(trigger = trigger.as_str(), error = %e, "Snapshot fetch failed, skipping cycle");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_api::{ApiError, MockOrderApi};
    use orderflow_core::{Money, OrderId, OrderPatch, OrderRecord, OrderStatus};
    use std::sync::Arc;

    fn record(id: &str, status: OrderStatus, customer: &str) -> OrderRecord {
        OrderRecord {
            id: OrderId::new(id).unwrap(),
            status,
            customer: customer.to_string(),
            date: "2025-01-01".to_string(),
            time: "10:00".to_string(),
            amount: Money::new(10_000, "PKR"),
            revision: None,
        }
    }

    #[test]
    fn test_snapshot_overwrites_but_never_deletes() {
        let mut store = OrderStore::new();
        store.upsert(
            OrderPatch::status_only(OrderId::new("KEEP").unwrap(), OrderStatus::Preparing),
            ChangeSource::Push,
        );
        store.replace(record("A1", OrderStatus::Confirmed, "X"), ChangeSource::Push);

        let stats = apply_snapshot(
            &mut store,
            SnapshotBatch {
                records: vec![
                    record("A1", OrderStatus::Pending, "Y"),
                    record("A2", OrderStatus::Pending, "Z"),
                ],
                skipped: 1,
            },
        );

        assert_eq!(
            stats,
            SnapshotStats {
                inserted: 1,
                updated: 1,
                unchanged: 0,
                stale: 0,
                skipped: 1
            }
        );
        let a1 = store.get(&OrderId::new("A1").unwrap()).unwrap();
        assert_eq!(a1.status, OrderStatus::Pending);
        assert_eq!(a1.customer, "Y");
        assert!(store.contains(&OrderId::new("KEEP").unwrap()));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_failed_cycle_is_skipped() {
        let mut store = OrderStore::new();
        store.replace(record("A1", OrderStatus::Pending, "X"), ChangeSource::Push);

        let stats = finish_cycle(
            &mut store,
            SnapshotTrigger::Scheduled,
            Err(ApiError::HttpClient("down".to_string())),
            Duration::from_millis(3),
        );
        assert!(stats.is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_snapshot_uses_api() {
        let mock = Arc::new(MockOrderApi::new());
        mock.set_snapshot(vec![record("A1", OrderStatus::Pending, "X")]);

        let (result, _elapsed) = fetch_snapshot(mock.clone(), SnapshotTrigger::Corrective).await;
        assert_eq!(result.unwrap().records.len(), 1);
        assert_eq!(mock.snapshot_calls(), 1);
    }

    #[tokio::test]
    async fn test_schedule_first_tick_is_immediate() {
        let mut schedule = PollSchedule::new(&PollConfig {
            enabled: true,
            interval_ms: 60_000,
        });
        assert!(schedule.is_enabled());
        tokio::time::timeout(Duration::from_millis(500), schedule.tick())
            .await
            .expect("first tick should not wait");
    }

    #[tokio::test]
    async fn test_disabled_schedule_never_ticks() {
        let mut schedule = PollSchedule::new(&PollConfig {
            enabled: false,
            interval_ms: 10,
        });
        assert!(!schedule.is_enabled());
        assert!(
            tokio::time::timeout(Duration::from_millis(50), schedule.tick())
                .await
                .is_err()
        );
    }
}
