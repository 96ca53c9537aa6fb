use chrono::{DateTime, Utc};

/// A recorded fact about stock, a reservation or a cart.
///
/// The owning store appends it first; publishing a copy comes after.
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Dotted name, `<context>.<stream>.<fact>` (e.g. "ledger.movement.sale").
    fn event_type(&self) -> &'static str;

    /// Payload schema revision. Bumped when a field changes meaning.
    fn schema_version(&self) -> u32 {
        1
    }

    /// Business time of the fact, taken from the engine clock.
    fn occurred_at(&self) -> DateTime<Utc>;
}
