//! Order store.
//!
//! Single source of truth for order state. Every source (push feed,
//! snapshot poll, optimistic commands) is merged here by order id.
//!
//! Mutation takes `&mut self` and is expected to happen from one task only
//! (the engine loop). Readers share the store through `SharedStore`.

use orderflow_core::{Order, OrderId, OrderPatch, OrderRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

/// Default capacity of the change channel.
const DEFAULT_CHANGE_CAPACITY: usize = 1024;

/// Store shared between the single writer and any number of readers.
pub type SharedStore = Arc<RwLock<OrderStore>>;

/// Origin of a store mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeSource {
    /// Push feed (WebSocket or SSE).
    Push,
    /// Snapshot poll, scheduled or corrective.
    Snapshot,
    /// Local optimistic status change.
    Optimistic,
    /// Record returned by the status-update endpoint.
    CommandResponse,
}

impl ChangeSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "push",
            Self::Snapshot => "snapshot",
            Self::Optimistic => "optimistic",
            Self::CommandResponse => "command_response",
        }
    }
}

/// Change notification published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    /// Order inserted or modified. Carries the post-merge state.
    Upserted { order: Order, source: ChangeSource },
    /// Order removed by an explicit delete.
    Removed { id: OrderId },
    /// The selected order was removed and the selection cleared.
    SelectionCleared { id: OrderId },
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    /// Payload matched the stored state.
    Unchanged,
    /// Payload revision is older than the stored one.
    Stale,
    /// Unknown id and no status to create a record from.
    Rejected,
}

impl UpsertOutcome {
    pub fn is_change(&self) -> bool {
        matches!(self, Self::Inserted | Self::Updated)
    }
}

/// Canonical `id -> Order` map with insertion order and selection.
pub struct OrderStore {
    orders: HashMap<OrderId, Order>,
    /// Ids in insertion order.
    insertion: Vec<OrderId>,
    /// Currently viewed order (weak reference by id).
    selected: Option<OrderId>,
    changes: broadcast::Sender<StoreChange>,
}

impl OrderStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::with_change_capacity(DEFAULT_CHANGE_CAPACITY)
    }

    /// Create an empty store whose change channel buffers `capacity` events.
    pub fn with_change_capacity(capacity: usize) -> Self {
        let (changes, _) = broadcast::channel(capacity.max(1));
        Self {
            orders: HashMap::new(),
            insertion: Vec::new(),
            selected: None,
            changes,
        }
    }

    /// Wrap the store for sharing with readers.
    pub fn into_shared(self) -> SharedStore {
        Arc::new(RwLock::new(self))
    }

    /// Subscribe to change notifications.
    ///
    /// Slow subscribers observe `RecvError::Lagged` rather than blocking
    /// the writer.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    /// Insert or shallow-merge a partial record.
    ///
    /// Fields absent from `patch` are preserved. Applying the same patch
    /// twice yields the same state.
    pub fn upsert(&mut self, patch: OrderPatch, source: ChangeSource) -> UpsertOutcome {
        match self.orders.get_mut(&patch.id) {
            Some(existing) => {
                if patch.is_stale_against(existing) {
                    debug!(
                        id = %patch.id,
                        incoming = ?patch.revision,
                        stored = ?existing.revision,
                        source = source.as_str(),
                        "Ignoring stale order payload"
                    );
                    return UpsertOutcome::Stale;
                }
                if !existing.merge(patch) {
                    return UpsertOutcome::Unchanged;
                }
                let order = existing.clone();
                self.publish(StoreChange::Upserted { order, source });
                UpsertOutcome::Updated
            }
            None => {
                let id = patch.id.clone();
                match Order::from_patch(patch) {
                    Some(order) => {
                        self.insert_new(order, source);
                        UpsertOutcome::Inserted
                    }
                    None => {
                        warn!(
                            %id,
                            source = source.as_str(),
                            "Dropping upsert for unknown order without status"
                        );
                        UpsertOutcome::Rejected
                    }
                }
            }
        }
    }

    /// Overwrite with a complete record.
    pub fn replace(&mut self, record: OrderRecord, source: ChangeSource) -> UpsertOutcome {
        let incoming = Order::from(record);
        match self.orders.get_mut(&incoming.id) {
            Some(existing) => {
                if let (Some(new_rev), Some(old_rev)) = (incoming.revision, existing.revision) {
                    if new_rev < old_rev {
                        debug!(id = %incoming.id, new_rev, old_rev, "Ignoring stale record");
                        return UpsertOutcome::Stale;
                    }
                }
                if *existing == incoming {
                    return UpsertOutcome::Unchanged;
                }
                *existing = incoming.clone();
                self.publish(StoreChange::Upserted {
                    order: incoming,
                    source,
                });
                UpsertOutcome::Updated
            }
            None => {
                self.insert_new(incoming, source);
                UpsertOutcome::Inserted
            }
        }
    }

    /// Remove an order. Removing an unknown id is a no-op.
    ///
    /// Returns true if a record was removed.
    pub fn delete(&mut self, id: &OrderId) -> bool {
        if self.orders.remove(id).is_none() {
            return false;
        }
        self.insertion.retain(|existing| existing != id);
        self.publish(StoreChange::Removed { id: id.clone() });

        if self.selected.as_ref() == Some(id) {
            self.selected = None;
            self.publish(StoreChange::SelectionCleared { id: id.clone() });
        }
        true
    }

    pub fn get(&self, id: &OrderId) -> Option<&Order> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &OrderId) -> bool {
        self.orders.contains_key(id)
    }

    /// Orders in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Order> + '_ {
        self.insertion.iter().filter_map(|id| self.orders.get(id))
    }

    /// Cloned orders in insertion order.
    pub fn list(&self) -> Vec<Order> {
        self.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Select an order for viewing. Fails (returns false) for unknown ids.
    pub fn select(&mut self, id: &OrderId) -> bool {
        if !self.orders.contains_key(id) {
            return false;
        }
        self.selected = Some(id.clone());
        true
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    pub fn selected_id(&self) -> Option<&OrderId> {
        self.selected.as_ref()
    }

    /// Resolve the selection against current state.
    pub fn selected(&self) -> Option<&Order> {
        self.selected.as_ref().and_then(|id| self.orders.get(id))
    }

    fn insert_new(&mut self, order: Order, source: ChangeSource) {
        self.insertion.push(order.id.clone());
        self.orders.insert(order.id.clone(), order.clone());
        self.publish(StoreChange::Upserted { order, source });
    }

    fn publish(&self, change: StoreChange) {
        // No subscribers is fine.
        let _ = self.changes.send(change);
    }
}

impl Default for OrderStore {
    fn default() -> Self {
        Self::new()
    }
}
