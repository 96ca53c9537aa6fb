//! Disposable read models fed by published envelopes.

mod store;

pub use store::{InMemoryReadStore, ReadStore};
