//! Publishing committed facts to reporting consumers.
//!
//! Publishing happens after the owning store accepted the change. A failed
//! publish is logged and never rolls anything back.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::{trace, warn};

use bindery_events::{Event, EventBus, EventEnvelope};

/// Stream kind of per-(book, store) movement envelopes.
pub const LEDGER_STREAM: &str = "ledger.stock";
/// Stream kind of reservation transition envelopes.
pub const RESERVATION_STREAM: &str = "reservations.reservation";
/// Stream kind of cart transition envelopes.
pub const CART_STREAM: &str = "carts.cart";

/// Object-safe publishing seam for JSON envelopes.
pub trait EnvelopeSink: Send + Sync {
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>);
}

impl<B> EnvelopeSink for B
where
    B: EventBus<EventEnvelope<JsonValue>>,
{
    fn publish_envelope(&self, envelope: EventEnvelope<JsonValue>) {
        let event_type = envelope.event_type().to_string();
        match self.publish(envelope) {
            Ok(0) => trace!(event_type = %event_type, "no subscribers for envelope"),
            Ok(_) => {}
            Err(err) => warn!(event_type = %event_type, error = ?err, "failed to publish envelope"),
        }
    }
}

/// Optional sink shared by the ledger and the services.
#[derive(Clone, Default)]
pub struct Publisher {
    sink: Option<Arc<dyn EnvelopeSink>>,
}

impl core::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Publisher")
            .field("attached", &self.sink.is_some())
            .finish()
    }
}

impl Publisher {
    /// Publisher that drops everything.
    pub fn none() -> Self {
        Self::default()
    }

    pub fn new(sink: Arc<dyn EnvelopeSink>) -> Self {
        Self { sink: Some(sink) }
    }

    /// Wrap `event` as the `sequence`-th envelope of a stream and publish it.
    pub fn publish<E>(&self, stream_type: &str, stream_id: impl Into<String>, sequence: u64, event: &E)
    where
        E: Event + Serialize,
    {
        let Some(sink) = &self.sink else {
            return;
        };
        match EventEnvelope::from_typed(stream_type, stream_id, sequence, event) {
            Ok(envelope) => sink.publish_envelope(envelope),
            Err(err) => warn!(
                stream_type,
                event_type = event.event_type(),
                error = %err,
                "failed to serialize event for publishing"
            ),
        }
    }

    /// Publish a batch of events that were appended after `version_before`.
    pub fn publish_all<'a, E>(
        &self,
        stream_type: &str,
        stream_id: impl core::fmt::Display,
        version_before: u64,
        events: impl IntoIterator<Item = &'a E>,
    ) where
        E: Event + Serialize + 'a,
    {
        let stream_id = stream_id.to_string();
        for (offset, event) in events.into_iter().enumerate() {
            self.publish(stream_type, stream_id.clone(), version_before + offset as u64 + 1, event);
        }
    }
}
