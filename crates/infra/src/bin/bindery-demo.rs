//! Drives one in-memory engine through a short storefront session and logs
//! the resulting stock picture.

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use bindery_core::{Actor, Money, ShopperId, SystemClock};
use bindery_infra::{Engine, EngineConfig, PaymentConfirmation, StockLedger};
use bindery_inventory::StockKey;

fn main() -> anyhow::Result<()> {
    bindery_observability::init();

    let config = EngineConfig::from_env().context("invalid engine configuration")?;
    info!(?config, "starting bindery demo");

    let engine = Engine::in_memory(config, Arc::new(SystemClock));
    let sweeper = engine
        .sweeper
        .clone()
        .spawn(config.sweep_interval)
        .context("failed to start expiration sweeper")?;

    let receiving = Actor::system("receiving");
    let downtown = engine.stores.open("Downtown");
    let harbour = engine.stores.open("Harbour");
    let dune = engine.catalog.add_book("Dune", Money::from_minor(1_899));
    let solaris = engine.catalog.add_book("Solaris", Money::from_minor(1_450));
    for (book, store, units) in [(dune, downtown, 2), (dune, harbour, 5), (solaris, downtown, 1)] {
        engine.ledger.receive(StockKey::new(book, store), units, &receiving)?;
    }

    let shopper = ShopperId::new();
    let cart = engine.carts.open_cart(shopper)?;
    engine.carts.add_item(cart.id_typed(), dune, 2)?;
    engine.carts.add_item(cart.id_typed(), solaris, 1)?;
    engine.carts.update_quantity(cart.id_typed(), dune, 3)?;

    let totals = engine.carts.compute_totals(cart.id_typed())?;
    info!(
        cart = %cart.id_typed(),
        books = totals.distinct_books,
        items = totals.item_count,
        total = %totals.total,
        "cart ready for checkout"
    );

    // A second shopper misses the last copy of Solaris.
    match engine.reservations.create(ShopperId::new(), solaris, 1) {
        Ok(r) => info!(reservation = %r.id_typed(), "unexpected hold on Solaris"),
        Err(err) => info!(code = err.code(), error = %err, "second shopper turned away"),
    }

    let cart = engine
        .carts
        .checkout(cart.id_typed(), &PaymentConfirmation::new("demo-payment-1"))?;
    info!(cart = %cart.id_typed(), state = ?cart.state(), "checkout finished");

    let report = engine.sweeper.run_once(engine.reservations.now());
    info!(report = %serde_json::to_string(&report)?, "manual sweep");

    for key in engine.ledger.keys() {
        engine
            .ledger
            .reconcile(key)
            .with_context(|| format!("ledger out of balance for {key}"))?;
        if let Some(record) = engine.ledger.record(key) {
            info!(
                stock = %key,
                total = record.total,
                available = record.available,
                reserved = record.reserved,
                "stock record"
            );
        }
    }

    sweeper.shutdown();
    Ok(())
}
