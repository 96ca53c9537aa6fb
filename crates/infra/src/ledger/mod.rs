//! Stock ledger: the single source of truth for physical availability.
//!
//! - Counters and the movement log of one (book, store) change together
//!   under that record's exclusive lock.
//! - Operations on different (book, store) pairs never block each other.
//! - Multi-record operations (`commit_sales`) lock in `StockKey` order.

mod in_memory;

pub use in_memory::InMemoryStockLedger;

use std::sync::Arc;

use bindery_core::{Actor, BookId, DomainResult, ReservationId, StoreId};
use bindery_inventory::{Movement, StockKey, StockRecord};

/// One line of an atomic multi-record sale.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SaleLine {
    pub key: StockKey,
    pub quantity: u32,
    pub correlation: ReservationId,
}

/// Ledger operations. Every mutation appends exactly one movement per
/// affected record and returns it.
pub trait StockLedger: Send + Sync {
    /// Inbound units; creates the record on first receipt.
    fn receive(&self, key: StockKey, quantity: u32, actor: &Actor) -> DomainResult<Movement>;

    /// Place a hold: `available -= q`, `reserved += q`.
    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement>;

    /// Return held units to `available`.
    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement>;

    /// Turn held units into a sale: `reserved -= q`, `total -= q`.
    fn commit_sale(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement>;

    /// Commit several sales as one unit: either every line is recorded or none.
    fn commit_sales(&self, lines: &[SaleLine], actor: &Actor) -> DomainResult<Vec<Movement>>;

    /// Sold units came back to the shelf.
    fn record_return(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: Option<ReservationId>,
    ) -> DomainResult<Movement>;

    fn record_loss(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement>;

    fn write_off(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement>;

    /// Current counters, `None` if the store never received the book.
    fn record(&self, key: StockKey) -> Option<StockRecord>;

    /// Every store holding a record for `book`, in `StoreId` order.
    fn records_for_book(&self, book: BookId) -> Vec<(StoreId, StockRecord)>;

    /// All known records.
    fn keys(&self) -> Vec<StockKey>;

    /// Net units still held by `correlation` on one record.
    fn net_reserved_for(&self, key: StockKey, correlation: ReservationId) -> DomainResult<i64>;

    /// Live (not archived) movements of one record, oldest first.
    fn movements(&self, key: StockKey) -> Vec<Movement>;

    /// Live and archived movements attributed to `correlation`, oldest first.
    fn movements_for(&self, correlation: ReservationId) -> Vec<Movement>;

    /// Movements moved out of the live log by `compact`.
    fn archived_movements(&self, key: StockKey) -> Vec<Movement>;

    /// Check the counter invariant and `reserved == Σ net_reserved_for(c)`.
    fn reconcile(&self, key: StockKey) -> DomainResult<()>;

    /// Archive resolved movements of one record; returns how many moved.
    fn compact(&self, key: StockKey) -> DomainResult<usize>;

    /// Compact every record; returns the total number archived.
    fn compact_all(&self) -> DomainResult<usize> {
        let mut archived = 0;
        for key in self.keys() {
            archived += self.compact(key)?;
        }
        Ok(archived)
    }
}

impl<L> StockLedger for Arc<L>
where
    L: StockLedger + ?Sized,
{
    fn receive(&self, key: StockKey, quantity: u32, actor: &Actor) -> DomainResult<Movement> {
        (**self).receive(key, quantity, actor)
    }

    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        (**self).reserve(key, quantity, actor, correlation)
    }

    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        (**self).release(key, quantity, actor, correlation)
    }

    fn commit_sale(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        (**self).commit_sale(key, quantity, actor, correlation)
    }

    fn commit_sales(&self, lines: &[SaleLine], actor: &Actor) -> DomainResult<Vec<Movement>> {
        (**self).commit_sales(lines, actor)
    }

    fn record_return(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: Option<ReservationId>,
    ) -> DomainResult<Movement> {
        (**self).record_return(key, quantity, actor, correlation)
    }

    fn record_loss(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement> {
        (**self).record_loss(key, quantity, actor, note)
    }

    fn write_off(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement> {
        (**self).write_off(key, quantity, actor, note)
    }

    fn record(&self, key: StockKey) -> Option<StockRecord> {
        (**self).record(key)
    }

    fn records_for_book(&self, book: BookId) -> Vec<(StoreId, StockRecord)> {
        (**self).records_for_book(book)
    }

    fn keys(&self) -> Vec<StockKey> {
        (**self).keys()
    }

    fn net_reserved_for(&self, key: StockKey, correlation: ReservationId) -> DomainResult<i64> {
        (**self).net_reserved_for(key, correlation)
    }

    fn movements(&self, key: StockKey) -> Vec<Movement> {
        (**self).movements(key)
    }

    fn movements_for(&self, correlation: ReservationId) -> Vec<Movement> {
        (**self).movements_for(correlation)
    }

    fn archived_movements(&self, key: StockKey) -> Vec<Movement> {
        (**self).archived_movements(key)
    }

    fn reconcile(&self, key: StockKey) -> DomainResult<()> {
        (**self).reconcile(key)
    }

    fn compact(&self, key: StockKey) -> DomainResult<usize> {
        (**self).compact(key)
    }
}

/// Convenience for building keys at call sites.
pub fn key(book: BookId, store: StoreId) -> StockKey {
    StockKey::new(book, store)
}
