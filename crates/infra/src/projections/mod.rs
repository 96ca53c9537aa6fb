//! Read-side projections over published ledger envelopes.

pub mod availability;

pub use availability::{AvailabilityProjection, AvailabilityProjectionError, AvailabilityView};
