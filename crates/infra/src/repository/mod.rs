//! Repository interfaces for reservation and cart aggregates.
//!
//! Saves are optimistic: the caller passes the version it loaded, and a
//! concurrent writer that got there first turns the save into `Conflict`.

mod carts;
mod reservations;

pub use carts::{CartRepository, InMemoryCartRepository};
pub use reservations::{InMemoryReservationRepository, ReservationRepository};
