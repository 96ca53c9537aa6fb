//! Domain events and their distribution.
//!
//! Ledger movements and reservation transitions are facts. They are
//! recorded by their owning store first and then published as envelopes
//! for reporting consumers (projections, reconciliation, audit exports).

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;

pub use bus::{EventBus, Subscription};
pub use envelope::{EventEnvelope, StreamScoped};
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
