//! Engine event loop.
//!
//! One task owns every store mutation. It multiplexes:
//! - feed events from the push transport
//! - status-change commands from `EngineHandle`s
//! - the snapshot poll schedule
//! - completions of in-flight requests (commands, snapshot fetches)
//! - the shutdown token
//!
//! I/O runs in spawned tasks that report back to the loop, so events are
//! applied one at a time in arrival order.

use crate::config::{EngineConfig, TransportKind};
use crate::dispatcher::{
    CommandError, CommandRequest, CorrectiveCycle, Dispatch, Dispatcher, InFlightCommand,
    PendingCommand,
};
use crate::error::EngineResult;
use crate::poller::{fetch_snapshot, finish_cycle, PollSchedule, SnapshotTrigger};
use chrono::NaiveDate;
use orderflow_api::{ApiResult, DynOrderApi, OrderClient, SnapshotBatch};
use orderflow_core::{Order, OrderId, OrderPatch, OrderStatus};
use orderflow_feed::{ConnectionManager, FeedError, FeedEvent, SseAdapter};
use orderflow_store::{view, ChangeSource, OrderStore, SharedStore, StoreChange, ViewQuery};
use orderflow_telemetry::Metrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Feed event channel capacity.
const FEED_CHANNEL_CAPACITY: usize = 1000;

/// Command channel capacity.
const COMMAND_CHANNEL_CAPACITY: usize = 64;

/// Aborts the wrapped task when dropped.
pub struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> AbortOnDrop<T> {
    pub fn new(handle: JoinHandle<T>) -> Self {
        Self(handle)
    }

    pub fn is_finished(&self) -> bool {
        self.0.is_finished()
    }
}

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Completion of a spawned request.
enum TaskDone {
    Command {
        command: InFlightCommand,
        result: ApiResult<Option<OrderPatch>>,
    },
    Snapshot {
        trigger: SnapshotTrigger,
        result: ApiResult<SnapshotBatch>,
        elapsed: Duration,
        /// Command waiting on this corrective cycle.
        followup: Option<CorrectiveCycle>,
    },
}

/// Cloneable handle for reading state and issuing commands.
#[derive(Clone)]
pub struct EngineHandle {
    store: SharedStore,
    command_tx: mpsc::Sender<CommandRequest>,
    shutdown: CancellationToken,
}

impl EngineHandle {
    /// Request a status change.
    ///
    /// Resolves once the optimistic write is visible in the store. Await
    /// `PendingCommand::outcome` for the reconciled result.
    pub async fn set_status(
        &self,
        id: OrderId,
        status: OrderStatus,
    ) -> Result<PendingCommand, CommandError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(CommandRequest { id, status, reply })
            .await
            .map_err(|_| CommandError::EngineStopped)?;
        reply_rx.await.map_err(|_| CommandError::EngineStopped)?
    }

    pub fn store(&self) -> SharedStore {
        self.store.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.store.read().subscribe()
    }

    pub fn get(&self, id: &OrderId) -> Option<Order> {
        self.store.read().get(id).cloned()
    }

    /// All orders in insertion order.
    pub fn orders(&self) -> Vec<Order> {
        self.store.read().list()
    }

    /// Filtered orders, newest first.
    pub fn view(&self, query: &ViewQuery, today: NaiveDate) -> Vec<Order> {
        let store = self.store.read();
        view::select(store.iter(), query, today)
    }

    pub fn select(&self, id: &OrderId) -> bool {
        self.store.write().select(id)
    }

    pub fn clear_selection(&self) {
        self.store.write().clear_selection();
    }

    pub fn selected(&self) -> Option<Order> {
        self.store.read().selected().cloned()
    }

    /// Stop the engine: transport, poller and in-flight requests.
    pub fn shutdown(&self) {
        info!("Engine shutdown requested");
        self.shutdown.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// Order synchronization engine.
pub struct Engine {
    config: EngineConfig,
    store: SharedStore,
    api: DynOrderApi,
    command_tx: mpsc::Sender<CommandRequest>,
    command_rx: mpsc::Receiver<CommandRequest>,
    shutdown: CancellationToken,
}

impl Engine {
    /// Create an engine talking to the configured REST endpoints.
    pub fn new(config: EngineConfig) -> EngineResult<Self> {
        config.validate()?;
        let api: DynOrderApi = Arc::new(OrderClient::new(config.client_config())?);
        Ok(Self::with_api(config, api))
    }

    /// Create an engine with a custom backend.
    pub fn with_api(config: EngineConfig, api: DynOrderApi) -> Self {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        Self {
            config,
            store: OrderStore::new().into_shared(),
            api,
            command_tx,
            command_rx,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            store: self.store.clone(),
            command_tx: self.command_tx.clone(),
            shutdown: self.shutdown.clone(),
        }
    }

    /// Run until shutdown.
    pub async fn run(self) -> EngineResult<()> {
        let Engine {
            config,
            store,
            api,
            command_tx,
            mut command_rx,
            shutdown,
        } = self;
        drop(command_tx);

        info!(
            transport = ?config.transport,
            feed_url = %config.feed_url,
            snapshot_url = %config.snapshot_url,
            poll_enabled = config.poll.enabled,
            "Starting order sync engine"
        );

        let (feed_tx, mut feed_rx) = mpsc::channel::<FeedEvent>(FEED_CHANNEL_CAPACITY);
        let _transport = AbortOnDrop::new(tokio::spawn(run_transport(
            config.clone(),
            feed_tx,
            shutdown.child_token(),
        )));

        let mut state = EngineState {
            store,
            api,
            dispatcher: Dispatcher::new(config.commands.enforce_transitions),
            tasks: JoinSet::new(),
            scheduled_in_flight: false,
        };
        let mut schedule = PollSchedule::new(&config.poll);

        info!("Entering engine event loop");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => {
                    info!("Shutdown signal received");
                    break;
                }

                Some(event) = feed_rx.recv() => {
                    state.apply_feed_event(event);
                }

                Some(request) = command_rx.recv() => {
                    state.handle_command(request);
                }

                Some(joined) = state.tasks.join_next() => {
                    match joined {
                        Ok(done) => state.handle_task(done),
                        Err(e) => error!(?e, "Engine task failed"),
                    }
                }

                () = schedule.tick(), if !state.scheduled_in_flight => {
                    state.spawn_snapshot(SnapshotTrigger::Scheduled, None);
                }
            }
        }

        let in_flight = state.tasks.len();
        state.tasks.abort_all();
        info!(in_flight, "Engine stopped");
        Ok(())
    }
}

/// State owned by the event loop.
struct EngineState {
    store: SharedStore,
    api: DynOrderApi,
    dispatcher: Dispatcher,
    tasks: JoinSet<TaskDone>,
    scheduled_in_flight: bool,
}

impl EngineState {
    fn apply_feed_event(&mut self, event: FeedEvent) {
        let mut store = self.store.write();
        match event {
            FeedEvent::Upsert(patch) => {
                let id = patch.id.clone();
                let outcome = store.upsert(patch, ChangeSource::Push);
                if outcome.is_change() {
                    Metrics::store_change(ChangeSource::Push.as_str());
                }
                debug!(order_id = %id, ?outcome, "Applied push upsert");
            }
            FeedEvent::Delete(id) => {
                if store.delete(&id) {
                    Metrics::store_change(ChangeSource::Push.as_str());
                    debug!(order_id = %id, "Applied push delete");
                } else {
                    debug!(order_id = %id, "Delete for unknown order ignored");
                }
            }
        }
        Metrics::store_size(store.len());
    }

    fn handle_command(&mut self, request: CommandRequest) {
        let CommandRequest { id, status, reply } = request;

        let dispatch = {
            let mut store = self.store.write();
            let dispatch = self.dispatcher.begin(&mut store, id, status);
            Metrics::store_size(store.len());
            dispatch
        };

        match dispatch {
            Ok(Dispatch::Done(pending)) => {
                let _ = reply.send(Ok(pending));
            }
            Ok(Dispatch::Send(pending, command)) => {
                let api = self.api.clone();
                self.tasks.spawn(async move {
                    let result = api.update_status(&command.id, command.status).await;
                    TaskDone::Command { command, result }
                });
                if reply.send(Ok(pending)).is_err() {
                    debug!("Command caller went away before dispatch");
                }
            }
            Err(e) => {
                debug!(error = %e, "Command rejected locally");
                let _ = reply.send(Err(e));
            }
        }
    }

    fn handle_task(&mut self, done: TaskDone) {
        match done {
            TaskDone::Command { command, result } => {
                let corrective = {
                    let mut store = self.store.write();
                    let corrective = self.dispatcher.complete(&mut store, command, result);
                    Metrics::store_size(store.len());
                    corrective
                };
                if let Some(cycle) = corrective {
                    self.spawn_snapshot(SnapshotTrigger::Corrective, Some(cycle));
                }
            }
            TaskDone::Snapshot {
                trigger,
                result,
                elapsed,
                followup,
            } => {
                if trigger == SnapshotTrigger::Scheduled {
                    self.scheduled_in_flight = false;
                }
                {
                    let mut store = self.store.write();
                    finish_cycle(&mut store, trigger, result, elapsed);
                    Metrics::store_size(store.len());
                }
                if let Some(CorrectiveCycle { command, error }) = followup {
                    command.resolve(Err(error));
                }
            }
        }
    }

    fn spawn_snapshot(&mut self, trigger: SnapshotTrigger, followup: Option<CorrectiveCycle>) {
        if trigger == SnapshotTrigger::Scheduled {
            self.scheduled_in_flight = true;
        }
        let api = self.api.clone();
        self.tasks.spawn(async move {
            let (result, elapsed) = fetch_snapshot(api, trigger).await;
            TaskDone::Snapshot {
                trigger,
                result,
                elapsed,
                followup,
            }
        });
    }
}

/// Run the configured push transport until shutdown.
///
/// SSE falls back to WebSocket once it reports itself unrecoverable.
async fn run_transport(
    config: EngineConfig,
    feed_tx: mpsc::Sender<FeedEvent>,
    shutdown: CancellationToken,
) {
    if config.transport == TransportKind::Sse {
        match SseAdapter::new(config.sse_config(), feed_tx.clone(), shutdown.clone()) {
            Ok(adapter) => match adapter.run().await {
                Ok(()) => return,
                Err(FeedError::AdapterUnrecoverable { failures }) => {
                    warn!(failures, "SSE unavailable, falling back to WebSocket");
                }
                Err(e) => {
                    warn!(error = %e, "SSE adapter failed, falling back to WebSocket");
                }
            },
            Err(e) => warn!(error = %e, "Failed to create SSE adapter, using WebSocket"),
        }
    }

    let manager =
        ConnectionManager::with_shutdown_token(config.connection_config(), feed_tx, shutdown);
    if let Err(e) = manager.connect().await {
        error!(?e, "WebSocket connection failed");
    }
}
