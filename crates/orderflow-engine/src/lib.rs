//! Order synchronization engine.
//!
//! Keeps a local order store consistent with a remote backend:
//! - push feed (WebSocket, or SSE with WebSocket fallback)
//! - periodic snapshot polling
//! - optimistic status-change commands with corrective re-sync

pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod poller;

pub use config::{EngineConfig, TransportKind};
pub use dispatcher::{CommandError, CommandOutcome, CommandResult, PendingCommand};
pub use engine::{Engine, EngineHandle};
pub use error::{EngineError, EngineResult};
pub use poller::{SnapshotStats, SnapshotTrigger};
