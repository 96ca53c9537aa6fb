//! Wiring of the in-memory engine.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use bindery_core::Clock;
use bindery_events::{EventEnvelope, InMemoryEventBus};

use crate::catalog::InMemoryCatalog;
use crate::config::EngineConfig;
use crate::ledger::InMemoryStockLedger;
use crate::locks::OwnerLocks;
use crate::publish::Publisher;
use crate::repository::{InMemoryCartRepository, InMemoryReservationRepository};
use crate::services::{CartOrchestrator, ExpirationSweeper, ReservationManager};
use crate::stores::StoreDirectory;

pub type EnvelopeBus = InMemoryEventBus<EventEnvelope<JsonValue>>;

/// Every component of a single-process engine, sharing one clock and bus.
#[derive(Debug, Clone)]
pub struct Engine {
    pub config: EngineConfig,
    pub bus: Arc<EnvelopeBus>,
    pub ledger: Arc<InMemoryStockLedger>,
    pub stores: Arc<StoreDirectory>,
    pub catalog: Arc<InMemoryCatalog>,
    pub reservations: Arc<ReservationManager>,
    pub carts: Arc<CartOrchestrator>,
    pub sweeper: Arc<ExpirationSweeper>,
}

impl Engine {
    pub fn in_memory(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let bus: Arc<EnvelopeBus> = Arc::new(InMemoryEventBus::new());
        let publisher = Publisher::new(bus.clone());

        let ledger = Arc::new(
            InMemoryStockLedger::new(clock.clone()).with_publisher(publisher.clone()),
        );
        let stores = Arc::new(StoreDirectory::new());
        let catalog = Arc::new(InMemoryCatalog::new());

        let reservations = Arc::new(
            ReservationManager::new(
                ledger.clone(),
                stores.clone(),
                Arc::new(InMemoryReservationRepository::new()),
                Arc::new(OwnerLocks::new()),
                clock,
                config.policy,
            )
            .with_publisher(publisher.clone()),
        );
        let carts = Arc::new(
            CartOrchestrator::new(
                reservations.clone(),
                Arc::new(InMemoryCartRepository::new()),
                catalog.clone(),
            )
            .with_publisher(publisher),
        );
        let sweeper = Arc::new(ExpirationSweeper::new(
            reservations.clone(),
            config.compact_after_sweep,
        ));

        Self {
            config,
            bus,
            ledger,
            stores,
            catalog,
            reservations,
            carts,
            sweeper,
        }
    }
}
