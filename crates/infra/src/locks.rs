//! Per-shopper serialization.
//!
//! Reservations and carts are owned by a single shopper, so every
//! multi-step sequence that touches them runs under that shopper's lock.
//! Locks are not reentrant: services take them once at their public entry
//! points and call the `*_locked` internals from there.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bindery_core::{DomainError, DomainResult, ShopperId};

#[derive(Debug, Default)]
pub struct OwnerLocks {
    locks: Mutex<HashMap<ShopperId, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, owner: ShopperId) -> DomainResult<Arc<Mutex<()>>> {
        let mut map = self
            .locks
            .lock()
            .map_err(|_| DomainError::integrity("owner lock table poisoned"))?;
        Ok(map.entry(owner).or_default().clone())
    }

    /// Run `f` while holding `owner`'s lock.
    pub fn with<T>(&self, owner: ShopperId, f: impl FnOnce() -> DomainResult<T>) -> DomainResult<T> {
        let lease = Lease {
            table: self,
            owner,
            slot: self.slot(owner)?,
        };
        // A panic inside another critical section leaves no partial state
        // behind the unit mutex, so a poisoned guard is still usable.
        let _guard = match lease.slot.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        f()
    }
}

/// Holds one reference to an owner's slot; the last lease out removes it.
struct Lease<'a> {
    table: &'a OwnerLocks,
    owner: ShopperId,
    slot: Arc<Mutex<()>>,
}

impl Drop for Lease<'_> {
    fn drop(&mut self) {
        let mut map = match self.table.locks.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        // New leases clone under the table lock, so the count is stable
        // here: the map and this lease are the only holders left.
        if Arc::strong_count(&self.slot) == 2 {
            map.remove(&self.owner);
        }
    }
}
