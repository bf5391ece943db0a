//! Optimistic status-change commands.
//!
//! A command is validated against the store, applied optimistically, then
//! sent to the backend. Success with a returned order is applied as
//! authoritative; success without one leaves the optimistic state final.
//! Failure never rolls back locally: one corrective snapshot cycle runs
//! and the error reaches the caller once that cycle has completed.

use orderflow_api::ApiError;
use orderflow_core::{Order, OrderId, OrderPatch, OrderStatus};
use orderflow_store::{ChangeSource, OrderStore, UpsertOutcome};
use orderflow_telemetry::Metrics;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Command failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("Unknown order: {0}")]
    UnknownOrder(OrderId),

    #[error("Illegal transition {from} -> {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },

    #[error("Status update rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Status update failed: {0}")]
    Transport(String),

    #[error("Engine stopped")]
    EngineStopped,
}

impl CommandError {
    pub fn label(&self) -> &'static str {
        match self {
            Self::UnknownOrder(_) => "unknown_order",
            Self::IllegalTransition { .. } => "illegal_transition",
            Self::Rejected { .. } => "rejected",
            Self::Transport(_) => "transport",
            Self::EngineStopped => "engine_stopped",
        }
    }
}

impl From<ApiError> for CommandError {
    fn from(e: ApiError) -> Self {
        match e {
            ApiError::Status { status, body } => Self::Rejected { status, body },
            other => Self::Transport(other.to_string()),
        }
    }
}

/// Successful command resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Target equalled the current status; nothing was sent.
    Unchanged,
    /// Backend accepted without returning the order.
    Accepted,
    /// Backend returned the order, now applied to the store.
    Confirmed(Order),
}

impl CommandOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unchanged => "unchanged",
            Self::Accepted => "accepted",
            Self::Confirmed(_) => "confirmed",
        }
    }
}

pub type CommandResult = Result<CommandOutcome, CommandError>;

/// Handle to a command whose optimistic write is already visible.
#[derive(Debug)]
pub struct PendingCommand {
    id: OrderId,
    status: OrderStatus,
    outcome_rx: oneshot::Receiver<CommandResult>,
}

impl PendingCommand {
    fn new(id: OrderId, status: OrderStatus) -> (Self, oneshot::Sender<CommandResult>) {
        let (outcome_tx, outcome_rx) = oneshot::channel();
        let pending = Self {
            id,
            status,
            outcome_rx,
        };
        (pending, outcome_tx)
    }

    pub fn id(&self) -> &OrderId {
        &self.id
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    /// Wait for reconciliation with the backend.
    pub async fn outcome(self) -> CommandResult {
        self.outcome_rx
            .await
            .unwrap_or(Err(CommandError::EngineStopped))
    }
}

/// Command request sent from an `EngineHandle` to the engine loop.
#[derive(Debug)]
pub struct CommandRequest {
    pub id: OrderId,
    pub status: OrderStatus,
    pub reply: oneshot::Sender<Result<PendingCommand, CommandError>>,
}

/// Command applied optimistically and awaiting the backend.
#[derive(Debug)]
pub struct InFlightCommand {
    pub id: OrderId,
    pub status: OrderStatus,
    pub previous: OrderStatus,
    outcome_tx: oneshot::Sender<CommandResult>,
}

impl InFlightCommand {
    /// Deliver the final result to the caller.
    pub fn resolve(self, result: CommandResult) {
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(e) => e.label(),
        };
        Metrics::command(label);
        if self.outcome_tx.send(result).is_err() {
            debug!(order_id = %self.id, "Command caller went away before resolution");
        }
    }
}

/// What the engine should do after `begin`.
#[derive(Debug)]
pub enum Dispatch {
    /// Resolved locally; nothing to send.
    Done(PendingCommand),
    /// Optimistic write applied; send the request.
    Send(PendingCommand, InFlightCommand),
}

/// Backend reaction that requires a corrective snapshot cycle.
#[derive(Debug)]
pub struct CorrectiveCycle {
    pub command: InFlightCommand,
    pub error: CommandError,
}

/// Validates and applies commands against the store.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    enforce_transitions: bool,
}

impl Dispatcher {
    pub fn new(enforce_transitions: bool) -> Self {
        Self {
            enforce_transitions,
        }
    }

    /// Validate a command and apply it optimistically.
    pub fn begin(
        &self,
        store: &mut OrderStore,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<Dispatch, CommandError> {
        let Some(current) = store.get(&id).map(|order| order.status) else {
            Metrics::command("unknown_order");
            return Err(CommandError::UnknownOrder(id));
        };

        if current == status {
            debug!(order_id = %id, %status, "Status unchanged, nothing to send");
            let (pending, outcome_tx) = PendingCommand::new(id, status);
            Metrics::command("unchanged");
            let _ = outcome_tx.send(Ok(CommandOutcome::Unchanged));
            return Ok(Dispatch::Done(pending));
        }

        if self.enforce_transitions && !current.can_transition_to(status) {
            Metrics::command("illegal_transition");
            return Err(CommandError::IllegalTransition {
                from: current,
                to: status,
            });
        }

        let outcome = store.upsert(
            OrderPatch::status_only(id.clone(), status),
            ChangeSource::Optimistic,
        );
        if outcome.is_change() {
            Metrics::store_change(ChangeSource::Optimistic.as_str());
        }
        info!(order_id = %id, from = %current, to = %status, "Applied optimistic status");

        let (pending, outcome_tx) = PendingCommand::new(id.clone(), status);
        let command = InFlightCommand {
            id,
            status,
            previous: current,
            outcome_tx,
        };
        Ok(Dispatch::Send(pending, command))
    }

    /// Apply the backend's answer.
    ///
    /// Returns the corrective cycle to run on failure; the caller is
    /// answered after that cycle completes.
    pub fn complete(
        &self,
        store: &mut OrderStore,
        command: InFlightCommand,
        result: Result<Option<OrderPatch>, ApiError>,
    ) -> Option<CorrectiveCycle> {
        match result {
            Ok(Some(patch)) => {
                let outcome = store.upsert(patch, ChangeSource::CommandResponse);
                if outcome.is_change() {
                    Metrics::store_change(ChangeSource::CommandResponse.as_str());
                }
                match (outcome, store.get(&command.id).cloned()) {
                    (UpsertOutcome::Rejected, _) | (_, None) => {
                        command.resolve(Ok(CommandOutcome::Accepted))
                    }
                    (_, Some(order)) => command.resolve(Ok(CommandOutcome::Confirmed(order))),
                }
                None
            }
            Ok(None) => {
                command.resolve(Ok(CommandOutcome::Accepted));
                None
            }
            Err(e) => {
                warn!(
                    order_id = %command.id,
                    attempted = %command.status,
                    previous = %command.previous,
                    error = %e,
                    "Status update failed, scheduling corrective snapshot"
                );
                Some(CorrectiveCycle {
                    command,
                    error: e.into(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_core::{Money, OrderRecord};

    fn id(s: &str) -> OrderId {
        OrderId::new(s).unwrap()
    }

    fn store_with(id_str: &str, status: OrderStatus) -> OrderStore {
        let mut store = OrderStore::new();
        store.replace(
            OrderRecord {
                id: id(id_str),
                status,
                customer: "X".to_string(),
                date: "2025-01-01".to_string(),
                time: "10:00".to_string(),
                amount: Money::new(10_000, "PKR"),
                revision: None,
            },
            ChangeSource::Snapshot,
        );
        store
    }

    fn expect_send(dispatch: Dispatch) -> (PendingCommand, InFlightCommand) {
        match dispatch {
            Dispatch::Send(pending, command) => (pending, command),
            Dispatch::Done(_) => panic!("expected a request to send"),
        }
    }

    #[test]
    fn test_unknown_order_rejected_locally() {
        let mut store = OrderStore::new();
        let err = Dispatcher::new(true)
            .begin(&mut store, id("Z9"), OrderStatus::Confirmed)
            .unwrap_err();
        assert_eq!(err, CommandError::UnknownOrder(id("Z9")));
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_same_status_is_unchanged() {
        let mut store = store_with("A1", OrderStatus::Pending);
        let dispatch = Dispatcher::new(true)
            .begin(&mut store, id("A1"), OrderStatus::Pending)
            .unwrap();
        let Dispatch::Done(pending) = dispatch else {
            panic!("expected local resolution");
        };
        assert_eq!(pending.outcome().await, Ok(CommandOutcome::Unchanged));
    }

    #[test]
    fn test_illegal_transition_depends_on_enforcement() {
        let mut store = store_with("A1", OrderStatus::Completed);
        let err = Dispatcher::new(true)
            .begin(&mut store, id("A1"), OrderStatus::Pending)
            .unwrap_err();
        assert_eq!(
            err,
            CommandError::IllegalTransition {
                from: OrderStatus::Completed,
                to: OrderStatus::Pending
            }
        );
        assert_eq!(store.get(&id("A1")).unwrap().status, OrderStatus::Completed);

        let dispatch = Dispatcher::new(false)
            .begin(&mut store, id("A1"), OrderStatus::Pending)
            .unwrap();
        assert!(matches!(dispatch, Dispatch::Send(..)));
        assert_eq!(store.get(&id("A1")).unwrap().status, OrderStatus::Pending);
    }

    #[test]
    fn test_optimistic_write_is_immediate() {
        let mut store = store_with("A1", OrderStatus::Pending);
        let mut changes = store.subscribe();

        let (pending, command) = expect_send(
            Dispatcher::new(true)
                .begin(&mut store, id("A1"), OrderStatus::Confirmed)
                .unwrap(),
        );
        assert_eq!(pending.status(), OrderStatus::Confirmed);
        assert_eq!(command.previous, OrderStatus::Pending);
        assert_eq!(store.get(&id("A1")).unwrap().status, OrderStatus::Confirmed);
        assert_eq!(store.get(&id("A1")).unwrap().customer, "X");

        match changes.try_recv().unwrap() {
            orderflow_store::StoreChange::Upserted { source, .. } => {
                assert_eq!(source, ChangeSource::Optimistic)
            }
            other => panic!("unexpected change {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_success_with_order_confirms() {
        let mut store = store_with("A1", OrderStatus::Pending);
        let dispatcher = Dispatcher::new(true);
        let (pending, command) = expect_send(
            dispatcher
                .begin(&mut store, id("A1"), OrderStatus::Confirmed)
                .unwrap(),
        );

        let mut echoed = OrderPatch::status_only(id("A1"), OrderStatus::Confirmed);
        echoed.customer = Some("X (VIP)".to_string());
        assert!(dispatcher
            .complete(&mut store, command, Ok(Some(echoed)))
            .is_none());

        let CommandOutcome::Confirmed(order) = pending.outcome().await.unwrap() else {
            panic!("expected confirmation");
        };
        assert_eq!(order.customer, "X (VIP)");
        assert_eq!(store.get(&id("A1")).unwrap().customer, "X (VIP)");
    }

    #[tokio::test]
    async fn test_success_without_order_accepts() {
        let mut store = store_with("A1", OrderStatus::Pending);
        let dispatcher = Dispatcher::new(true);
        let (pending, command) = expect_send(
            dispatcher
                .begin(&mut store, id("A1"), OrderStatus::Cancelled)
                .unwrap(),
        );

        assert!(dispatcher.complete(&mut store, command, Ok(None)).is_none());
        assert_eq!(pending.outcome().await, Ok(CommandOutcome::Accepted));
        assert_eq!(store.get(&id("A1")).unwrap().status, OrderStatus::Cancelled);
    }

    #[test]
    fn test_failure_keeps_optimistic_state_and_requests_correction() {
        let mut store = store_with("A1", OrderStatus::Pending);
        let dispatcher = Dispatcher::new(true);
        let (_pending, command) = expect_send(
            dispatcher
                .begin(&mut store, id("A1"), OrderStatus::Confirmed)
                .unwrap(),
        );

        let corrective = dispatcher
            .complete(
                &mut store,
                command,
                Err(ApiError::Status {
                    status: 409,
                    body: "conflict".to_string(),
                }),
            )
            .unwrap();
        assert_eq!(
            corrective.error,
            CommandError::Rejected {
                status: 409,
                body: "conflict".to_string()
            }
        );
        // No local rollback before the snapshot arrives.
        assert_eq!(store.get(&id("A1")).unwrap().status, OrderStatus::Confirmed);
    }

    #[test]
    fn test_transport_error_mapping() {
        let err: CommandError = ApiError::HttpClient("timed out".to_string()).into();
        assert!(matches!(err, CommandError::Transport(_)));
        assert_eq!(err.label(), "transport");
    }
}
