//! Store directory: which physical stores may back new reservations.

use std::collections::BTreeMap;
use std::sync::RwLock;

use tracing::info;

use bindery_core::{DomainError, DomainResult, StoreId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreInfo {
    pub id: StoreId,
    pub name: String,
    pub active: bool,
}

/// Registered stores and their active flag.
///
/// Stores that were never registered count as inactive.
#[derive(Debug, Default)]
pub struct StoreDirectory {
    inner: RwLock<BTreeMap<StoreId, StoreInfo>>,
}

impl StoreDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an active store and return its id.
    pub fn open(&self, name: impl Into<String>) -> StoreId {
        let id = StoreId::new();
        self.register(StoreInfo {
            id,
            name: name.into(),
            active: true,
        });
        id
    }

    pub fn register(&self, info: StoreInfo) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(info.id, info);
        }
    }

    pub fn activate(&self, store: StoreId) -> DomainResult<()> {
        self.set_active(store, true)
    }

    /// Existing holds at the store stay valid; it just stops being selected.
    pub fn deactivate(&self, store: StoreId) -> DomainResult<()> {
        self.set_active(store, false)
    }

    fn set_active(&self, store: StoreId, active: bool) -> DomainResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DomainError::integrity("store directory lock poisoned"))?;
        let info = map
            .get_mut(&store)
            .ok_or_else(|| DomainError::not_found(format!("store {store}")))?;
        info.active = active;
        info!(store = %store, active, "store availability changed");
        Ok(())
    }

    pub fn is_active(&self, store: StoreId) -> bool {
        self.get(store).is_some_and(|s| s.active)
    }

    pub fn get(&self, store: StoreId) -> Option<StoreInfo> {
        let map = self.inner.read().ok()?;
        map.get(&store).cloned()
    }

    pub fn list(&self) -> Vec<StoreInfo> {
        match self.inner.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }
}
