//! Core domain types for the order-state synchronization engine.
//!
//! This crate provides the types every other crate agrees on:
//! - `OrderId`, `OrderStatus`: identity and lifecycle of an order
//! - `Money`: minor-unit amount plus currency code
//! - `Order`, `OrderPatch`, `OrderRecord`: stored, partial and complete forms

pub mod error;
pub mod money;
pub mod order;
pub mod types;

pub use error::{CoreError, CoreResult};
pub use money::{Money, DEFAULT_CURRENCY, MINOR_UNIT_EXPONENT};
pub use order::{OrderId, OrderStatus};
pub use types::{Order, OrderPatch, OrderRecord};
