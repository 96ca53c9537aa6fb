//! Engine services: reservation manager, cart orchestrator, sweeper.

pub mod carts;
pub mod reservations;
pub mod sweeper;

pub use carts::{CartOrchestrator, DiscontinueReport, PaymentConfirmation};
pub use reservations::{EXPIRY_ACTOR, ReservationManager};
pub use sweeper::{ExpirationSweeper, SweepReport, SweeperHandle};
