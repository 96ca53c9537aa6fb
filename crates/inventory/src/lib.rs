//! Stock ledger domain module (event-sourced).
//!
//! This crate contains the business rules for physical availability per
//! (book, store), implemented purely as deterministic domain logic (no IO,
//! no locking, no storage). `bindery-infra` serializes access per record
//! and persists the movement log.

pub mod allocation;
pub mod movement;
pub mod stock;

pub use allocation::{StoreCandidate, select_store};
pub use movement::{Movement, MovementKind, net_reserved_by_correlation, net_reserved_for};
pub use stock::{StockAccount, StockCommand, StockKey, StockRecord};
