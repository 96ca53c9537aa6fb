//! `bindery-core` — domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the ledger,
//! reservation and cart crates (no infrastructure concerns).

pub mod aggregate;
pub mod clock;
pub mod error;
pub mod id;
pub mod money;
pub mod policy;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{Actor, BookId, CartId, ReservationId, ShopperId, StoreId, UserId};
pub use money::Money;
pub use policy::Policy;
