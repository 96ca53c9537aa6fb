use std::collections::HashMap;
use std::sync::{RwLock, RwLockWriteGuard};

use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

use bindery_core::{BookId, StoreId};
use bindery_events::EventEnvelope;
use bindery_inventory::{Movement, StockKey, StockRecord};

use crate::ledger::StockLedger;
use crate::publish::LEDGER_STREAM;
use crate::read_model::ReadStore;

/// Queryable availability per (book, store).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailabilityView {
    pub book: BookId,
    pub store: StoreId,
    pub record: StockRecord,
}

#[derive(Debug, Error)]
pub enum AvailabilityProjectionError {
    #[error("failed to deserialize movement: {0}")]
    Deserialize(String),

    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },

    #[error("{0} lock poisoned")]
    Poisoned(&'static str),
}

/// Availability projection.
///
/// Consumes ledger movement envelopes (JSON payloads) and maintains
/// per-(book, store) counters for storefront reads, off the ledger's locks.
/// The read model is disposable and rebuildable from the movement history.
#[derive(Debug)]
pub struct AvailabilityProjection<S>
where
    S: ReadStore<StockKey, AvailabilityView>,
{
    store: S,
    cursors: RwLock<HashMap<String, u64>>,
}

impl<S> AvailabilityProjection<S>
where
    S: ReadStore<StockKey, AvailabilityView>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, book: BookId, store: StoreId) -> Option<AvailabilityView> {
        self.store.get(&StockKey::new(book, store))
    }

    /// Units a shopper could reserve right now, across active and inactive stores.
    pub fn available_units(&self, book: BookId) -> u64 {
        self.store
            .list()
            .iter()
            .filter(|v| v.book == book)
            .map(|v| u64::from(v.record.available))
            .sum()
    }

    pub fn list(&self) -> Vec<AvailabilityView> {
        self.store.list()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Ignores envelopes of other streams
    /// - Enforces a gapless sequence per (book, store) stream, starting at 1
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    ///
    /// A projection attached after movements were recorded must be seeded
    /// with [`catch_up`](Self::catch_up) first, or the first envelope of
    /// every older stream is rejected.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), AvailabilityProjectionError> {
        if envelope.stream_type() != LEDGER_STREAM {
            return Ok(());
        }
        let seq = envelope.sequence_number();

        let mut cursors = self.cursors()?;
        let last = cursors.get(envelope.stream_id()).copied().unwrap_or(0);

        if seq == 0 {
            return Err(AvailabilityProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(AvailabilityProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let movement: Movement = envelope
            .decode()
            .map_err(|e| AvailabilityProjectionError::Deserialize(e.to_string()))?;

        let key = StockKey::new(movement.book, movement.store);
        if key.to_string() != envelope.stream_id() {
            return Err(AvailabilityProjectionError::StreamMismatch(format!(
                "movement for {key} published on stream {}",
                envelope.stream_id()
            )));
        }

        let mut view = self.view_or_empty(key);
        view.record.apply_movement(movement.kind, movement.quantity);
        self.store.upsert(key, view);

        // Advance cursor after successful apply.
        cursors.insert(envelope.stream_id().to_string(), seq);
        Ok(())
    }

    /// Bring every record up to date from the ledger's own history.
    ///
    /// Subscribe the consumer before calling this: envelopes published while
    /// the catch-up runs wait on the cursor lock and are then either applied
    /// or ignored as replays. Returns the number of movements applied.
    pub fn catch_up<L>(&self, ledger: &L) -> Result<usize, AvailabilityProjectionError>
    where
        L: StockLedger + ?Sized,
    {
        let mut cursors = self.cursors()?;
        let mut applied = 0;

        for key in ledger.keys() {
            let stream = key.to_string();
            let mut last = cursors.get(&stream).copied().unwrap_or(0);

            // Live first: anything compacted before that read is already in
            // the archive by the time the archive is read.
            let mut history = ledger.movements(key);
            history.extend(ledger.archived_movements(key));
            history.sort_by_key(|m| m.sequence);
            history.dedup_by_key(|m| m.sequence);

            let mut view = self.view_or_empty(key);
            let before = last;
            for movement in history.iter().skip_while(|m| m.sequence <= before) {
                // Stop at a gap; the bus delivers the rest.
                if movement.sequence != last + 1 {
                    break;
                }
                view.record.apply_movement(movement.kind, movement.quantity);
                last = movement.sequence;
            }

            if last > before {
                applied += (last - before) as usize;
                self.store.upsert(key, view);
                cursors.insert(stream, last);
            }
        }

        debug!(applied, "availability projection caught up with the ledger");
        Ok(applied)
    }

    /// Rebuild the read model from scratch by replaying envelopes.
    pub fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), AvailabilityProjectionError> {
        self.cursors()?.clear();
        self.store.clear();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        // Deterministic replay order: stream, sequence.
        envs.sort_by(|a, b| {
            (a.stream_id(), a.sequence_number()).cmp(&(b.stream_id(), b.sequence_number()))
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }

    fn cursors(&self) -> Result<RwLockWriteGuard<'_, HashMap<String, u64>>, AvailabilityProjectionError> {
        self.cursors
            .write()
            .map_err(|_| AvailabilityProjectionError::Poisoned("projection cursors"))
    }

    fn view_or_empty(&self, key: StockKey) -> AvailabilityView {
        self.store.get(&key).unwrap_or(AvailabilityView {
            book: key.book,
            store: key.store,
            record: StockRecord::default(),
        })
    }
}
