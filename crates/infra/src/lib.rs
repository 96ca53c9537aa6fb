//! Infrastructure layer: ledger and repository adapters, engine services,
//! background workers, configuration.

pub mod catalog;
pub mod config;
pub mod engine;
pub mod ledger;
pub mod locks;
pub mod projections;
pub mod publish;
pub mod read_model;
pub mod repository;
pub mod saga;
pub mod services;
pub mod stores;
pub mod workers;

pub use catalog::{Catalog, CatalogEntry, InMemoryCatalog};
pub use config::{ConfigError, EngineConfig};
pub use engine::Engine;
pub use ledger::{InMemoryStockLedger, SaleLine, StockLedger};
pub use services::{
    CartOrchestrator, DiscontinueReport, ExpirationSweeper, PaymentConfirmation,
    ReservationManager, SweepReport, SweeperHandle,
};
pub use stores::{StoreDirectory, StoreInfo};

#[cfg(test)]
mod integration_tests;
