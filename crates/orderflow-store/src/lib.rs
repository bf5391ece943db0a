//! Canonical order state for the synchronization engine.
//!
//! `OrderStore` holds exactly one record per order id and publishes every
//! effective change to typed subscribers. The `view` module derives
//! filtered, sorted read-only views for presentation.

pub mod store;
pub mod view;

pub use store::{ChangeSource, OrderStore, SharedStore, StoreChange, UpsertOutcome};
pub use view::{DateRange, StatusFilter, ViewQuery};
