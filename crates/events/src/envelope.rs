use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::Event;

/// Envelope for a published event, containing stream metadata.
///
/// Notes:
/// - `stream_type` names the kind of stream ("ledger.stock", "reservations.reservation").
/// - `stream_id` identifies one stream of that kind (one (book, store) record, one reservation).
/// - **Append-only**: `sequence_number` is monotonically increasing per stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope<E> {
    event_id: Uuid,

    stream_type: String,
    stream_id: String,

    /// Monotonically increasing position in the stream.
    sequence_number: u64,

    event_type: String,
    /// Payload schema revision, see [`Event::schema_version`].
    #[serde(default = "first_schema")]
    schema_version: u32,
    occurred_at: DateTime<Utc>,

    payload: E,
}

fn first_schema() -> u32 {
    1
}

impl<E> EventEnvelope<E> {
    pub fn new(
        event_id: Uuid,
        stream_type: impl Into<String>,
        stream_id: impl Into<String>,
        sequence_number: u64,
        event_type: impl Into<String>,
        occurred_at: DateTime<Utc>,
        payload: E,
    ) -> Self {
        Self {
            event_id,
            stream_type: stream_type.into(),
            stream_id: stream_id.into(),
            sequence_number,
            event_type: event_type.into(),
            schema_version: first_schema(),
            occurred_at,
            payload,
        }
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn stream_type(&self) -> &str {
        &self.stream_type
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn sequence_number(&self) -> u64 {
        self.sequence_number
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }

    /// Same metadata, different payload (e.g. after decoding the JSON).
    pub fn map_payload<F, T>(self, f: F) -> EventEnvelope<T>
    where
        F: FnOnce(E) -> T,
    {
        EventEnvelope {
            event_id: self.event_id,
            stream_type: self.stream_type,
            stream_id: self.stream_id,
            sequence_number: self.sequence_number,
            event_type: self.event_type,
            schema_version: self.schema_version,
            occurred_at: self.occurred_at,
            payload: f(self.payload),
        }
    }

    pub fn payload(&self) -> &E {
        &self.payload
    }

    pub fn into_payload(self) -> E {
        self.payload
    }
}

impl EventEnvelope<serde_json::Value> {
    /// Wrap a typed event as a JSON envelope, capturing its metadata.
    pub fn from_typed<E>(
        stream_type: impl Into<String>,
        stream_id: impl Into<String>,
        sequence_number: u64,
        event: &E,
    ) -> Result<Self, serde_json::Error>
    where
        E: Event + Serialize,
    {
        let mut envelope = Self::new(
            Uuid::now_v7(),
            stream_type,
            stream_id,
            sequence_number,
            event.event_type(),
            event.occurred_at(),
            serde_json::to_value(event)?,
        );
        envelope.schema_version = event.schema_version();
        Ok(envelope)
    }

    /// Decode the JSON payload back into its typed event.
    pub fn decode<E>(&self) -> Result<E, serde_json::Error>
    where
        E: serde::de::DeserializeOwned,
    {
        serde_json::from_value(self.payload.clone())
    }
}

/// Messages that belong to a named stream kind.
///
/// Workers use this to ignore traffic for streams they do not project.
pub trait StreamScoped {
    fn stream_type(&self) -> &str;
}

impl<E> StreamScoped for EventEnvelope<E> {
    fn stream_type(&self) -> &str {
        &self.stream_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Restocked {
        units: u32,
        at: DateTime<Utc>,
    }

    impl Event for Restocked {
        fn event_type(&self) -> &'static str {
            "ledger.movement.inbound"
        }

        fn occurred_at(&self) -> DateTime<Utc> {
            self.at
        }
    }

    #[test]
    fn from_typed_captures_metadata_and_payload() {
        let event = Restocked {
            units: 4,
            at: Utc::now(),
        };
        let env = EventEnvelope::from_typed("ledger.stock", "b:s", 3, &event).unwrap();

        assert_eq!(env.stream_type(), "ledger.stock");
        assert_eq!(env.sequence_number(), 3);
        assert_eq!(env.event_type(), "ledger.movement.inbound");
        assert_eq!(env.schema_version(), 1);
        assert_eq!(env.occurred_at(), event.at);
        assert_eq!(env.decode::<Restocked>().unwrap(), event);
    }

    #[test]
    fn missing_schema_version_reads_as_first() {
        let event = Restocked {
            units: 1,
            at: Utc::now(),
        };
        let env = EventEnvelope::from_typed("ledger.stock", "b:s", 1, &event).unwrap();
        let mut json = serde_json::to_value(&env).unwrap();
        json.as_object_mut().unwrap().remove("schema_version");

        let back: EventEnvelope<serde_json::Value> = serde_json::from_value(json).unwrap();
        assert_eq!(back.schema_version(), 1);
        assert_eq!(back.map_payload(|p| p["units"].as_u64()).into_payload(), Some(1));
    }
}
