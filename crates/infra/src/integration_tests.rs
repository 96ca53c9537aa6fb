//! Cross-component scenarios: ledger, reservations, carts and the sweeper
//! wired together on a manual clock.

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration as StdDuration, Instant};

use chrono::{DateTime, Duration, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Value as JsonValue;

use bindery_carts::{Cart, CartState};
use bindery_core::{
    Actor, BookId, CartId, Clock, DomainError, DomainResult, ExpectedVersion, ManualClock, Money,
    ReservationId, ShopperId, StoreId, UserId,
};
use bindery_events::EventEnvelope;
use bindery_inventory::{MovementKind, StockKey, StockRecord};
use bindery_reservations::ReservationState;

use crate::config::EngineConfig;
use crate::engine::Engine;
use crate::ledger::StockLedger;
use crate::projections::{AvailabilityProjection, AvailabilityView};
use crate::publish::LEDGER_STREAM;
use crate::read_model::InMemoryReadStore;
use crate::repository::{CartRepository, InMemoryCartRepository};
use crate::services::{CartOrchestrator, PaymentConfirmation};
use crate::workers::ProjectionWorker;

fn start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

struct Fixture {
    clock: Arc<ManualClock>,
    engine: Engine,
}

impl Fixture {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(start()));
        let engine = Engine::in_memory(EngineConfig::default(), clock.clone());
        Self { clock, engine }
    }

    fn book(&self, price_minor: u64) -> BookId {
        self.engine
            .catalog
            .add_book("Invisible Cities", Money::from_minor(price_minor))
    }

    /// Open a store holding `units` of `book`.
    fn stock(&self, book: BookId, units: u32) -> StoreId {
        let store = self.engine.stores.open("Branch");
        self.engine
            .ledger
            .receive(StockKey::new(book, store), units, &Actor::system("receiving"))
            .unwrap();
        store
    }

    fn record(&self, book: BookId, store: StoreId) -> StockRecord {
        self.engine.ledger.record(StockKey::new(book, store)).unwrap()
    }

    fn assert_consistent(&self) {
        for key in self.engine.ledger.keys() {
            self.engine.ledger.reconcile(key).unwrap();
        }
    }
}

#[test]
fn scenario_a_allocation_picks_the_store_with_most_available() {
    let f = Fixture::new();
    let book = f.book(1_000);
    let store1 = f.stock(book, 2);
    let store2 = f.stock(book, 5);

    let r = f
        .engine
        .reservations
        .create(ShopperId::new(), book, 3)
        .unwrap();

    assert_eq!(r.store(), Some(store2));
    let rec = f.record(book, store2);
    assert_eq!((rec.available, rec.reserved), (2, 3));
    assert_eq!(f.record(book, store1).reserved, 0);
    f.assert_consistent();
}

#[test]
fn scenario_b_cart_quantity_update_grows_the_hold_by_the_delta() {
    let f = Fixture::new();
    let book = f.book(1_250);
    let store = f.stock(book, 10);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();

    f.engine.carts.add_item(cart.id_typed(), book, 2).unwrap();
    let reserved_before = f.record(book, store).reserved;

    let cart = f
        .engine
        .carts
        .update_quantity(cart.id_typed(), book, 3)
        .unwrap();

    let item = cart.item(book).unwrap();
    assert_eq!(item.quantity, 3);
    assert_eq!(f.engine.reservations.get(item.reservation).unwrap().quantity(), 3);
    assert_eq!(f.record(book, store).reserved - reserved_before, 1);
    assert_eq!(cart.totals().total, Money::from_minor(3_750));
    f.assert_consistent();
}

#[test]
fn scenario_c_sweeper_returns_stale_holds_to_stock() {
    let f = Fixture::new();
    let book = f.book(900);
    let store = f.stock(book, 5);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    let cart = f.engine.carts.add_item(cart.id_typed(), book, 3).unwrap();
    let reservation = cart.item(book).unwrap().reservation;
    let before = f.record(book, store);

    f.clock.advance(Duration::hours(24) + Duration::seconds(1));
    let report = f.engine.sweeper.run_once(f.clock.now());

    assert_eq!(report.visited, 1);
    assert_eq!(report.expired, 1);
    assert_eq!(
        f.engine.reservations.get(reservation).unwrap().state(),
        ReservationState::Expired
    );
    let after = f.record(book, store);
    assert_eq!(after.available, before.available + 3);
    assert_eq!(after.reserved, before.reserved - 3);
    f.assert_consistent();
}

#[test]
fn scenario_d_sixth_distinct_book_is_rejected_without_side_effects() {
    let f = Fixture::new();
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    for _ in 0..5 {
        let book = f.book(500);
        f.stock(book, 3);
        f.engine.carts.add_item(cart.id_typed(), book, 1).unwrap();
    }
    let before = f.engine.carts.cart(cart.id_typed()).unwrap();

    let sixth = f.book(500);
    let store = f.stock(sixth, 3);
    let err = f
        .engine
        .carts
        .add_item(cart.id_typed(), sixth, 1)
        .unwrap_err();

    assert!(matches!(err, DomainError::CapacityExceeded(_)));
    let after = f.engine.carts.cart(cart.id_typed()).unwrap();
    assert_eq!(after.items().len(), 5);
    assert_eq!(after.totals(), before.totals());
    assert_eq!(f.record(sixth, store).reserved, 0);
}

#[test]
fn scenario_e_checkout_aborts_when_a_hold_expired_underneath() {
    let f = Fixture::new();
    let early = f.book(1_000);
    let late = f.book(2_000);
    let early_store = f.stock(early, 4);
    let late_store = f.stock(late, 4);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();

    f.engine.carts.add_item(cart.id_typed(), early, 2).unwrap();
    f.clock.advance(Duration::hours(12));
    f.engine.carts.add_item(cart.id_typed(), late, 1).unwrap();

    // The sweeper runs ahead of the shopper's clock and catches only the
    // older hold.
    let report = f
        .engine
        .sweeper
        .run_once(f.clock.now() + Duration::hours(13));
    assert_eq!(report.expired, 1);

    let early_before = f.record(early, early_store);
    let late_before = f.record(late, late_store);

    let err = f
        .engine
        .carts
        .checkout(cart.id_typed(), &PaymentConfirmation::new("pay_e"))
        .unwrap_err();

    assert!(matches!(err, DomainError::IntegrityViolation(_)));
    assert_eq!(f.record(early, early_store), early_before);
    assert_eq!(f.record(late, late_store), late_before);
    let cart = f.engine.carts.cart(cart.id_typed()).unwrap();
    assert_eq!(cart.state(), CartState::Active);
    assert!(
        f.engine
            .ledger
            .movements(StockKey::new(late, late_store))
            .iter()
            .all(|m| m.kind != MovementKind::Sale)
    );
    f.assert_consistent();
}

#[test]
fn scenario_f_last_unit_goes_to_exactly_one_shopper() {
    let f = Fixture::new();
    let book = f.book(700);
    let store = f.stock(book, 1);
    let key = StockKey::new(book, store);
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = (0..2)
        .map(|_| {
            let ledger = f.engine.ledger.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                let shopper = Actor::Shopper(ShopperId::new());
                barrier.wait();
                ledger.reserve(key, 1, &shopper, ReservationId::new())
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .any(|r| matches!(r, Err(DomainError::InsufficientStock(_))))
    );
    assert_eq!(f.record(book, store).available, 0);
    f.assert_consistent();
}

#[test]
fn racing_shoppers_through_the_manager_never_oversell() {
    let f = Fixture::new();
    let book = f.book(700);
    let store = f.stock(book, 1);
    let barrier = Arc::new(Barrier::new(4));

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let manager = f.engine.reservations.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                manager.create(ShopperId::new(), book, 1)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        assert!(matches!(
            err,
            DomainError::InsufficientStock(_) | DomainError::NoStockAvailable(_)
        ));
    }
    assert_eq!(f.record(book, store).reserved, 1);
}

#[test]
fn create_confirm_sell_round_trip() {
    let f = Fixture::new();
    let book = f.book(1_000);
    let store = f.stock(book, 6);
    let shopper = ShopperId::new();

    let r = f.engine.reservations.create(shopper, book, 2).unwrap();
    f.engine
        .reservations
        .confirm(r.id_typed(), &Actor::Shopper(shopper))
        .unwrap();
    let before = f.record(book, store);
    f.engine
        .ledger
        .commit_sale(StockKey::new(book, store), 2, &Actor::Shopper(shopper), r.id_typed())
        .unwrap();
    let after = f.record(book, store);

    assert_eq!(before.total - after.total, 2);
    assert_eq!(before.reserved - after.reserved, 2);
    assert_eq!(before.available, after.available);
    f.assert_consistent();
}

#[test]
fn expire_twice_is_the_same_as_once() {
    let f = Fixture::new();
    let book = f.book(1_000);
    let store = f.stock(book, 3);
    let r = f.engine.reservations.create(ShopperId::new(), book, 2).unwrap();

    f.clock.advance(Duration::hours(25));
    assert!(f.engine.reservations.expire(r.id_typed()).unwrap());
    let once = (f.engine.reservations.get(r.id_typed()).unwrap(), f.record(book, store));

    assert!(!f.engine.reservations.expire(r.id_typed()).unwrap());
    let twice = (f.engine.reservations.get(r.id_typed()).unwrap(), f.record(book, store));

    assert_eq!(once, twice);
    assert_eq!(twice.1.reserved, 0);
}

#[test]
fn confirm_after_ttl_expires_and_releases() {
    let f = Fixture::new();
    let book = f.book(1_000);
    let store = f.stock(book, 3);
    let shopper = ShopperId::new();
    let r = f.engine.reservations.create(shopper, book, 3).unwrap();

    f.clock.advance(Duration::hours(24));
    let err = f
        .engine
        .reservations
        .confirm(r.id_typed(), &Actor::Shopper(shopper))
        .unwrap_err();

    assert!(matches!(err, DomainError::ReservationExpired(_)));
    assert_eq!(
        f.engine.reservations.get(r.id_typed()).unwrap().state(),
        ReservationState::Expired
    );
    assert_eq!(f.record(book, store).available, 3);
}

#[test]
fn manager_rejects_duplicates_capacity_and_bad_quantities() {
    let f = Fixture::new();
    let shopper = ShopperId::new();
    let book = f.book(100);
    f.stock(book, 10);

    assert!(matches!(
        f.engine.reservations.create(shopper, book, 4),
        Err(DomainError::Validation(_))
    ));
    f.engine.reservations.create(shopper, book, 1).unwrap();
    assert!(matches!(
        f.engine.reservations.create(shopper, book, 1),
        Err(DomainError::DuplicateReservation(_))
    ));

    for _ in 0..4 {
        let other = f.book(100);
        f.stock(other, 1);
        f.engine.reservations.create(shopper, other, 1).unwrap();
    }
    let sixth = f.book(100);
    f.stock(sixth, 1);
    assert!(matches!(
        f.engine.reservations.create(shopper, sixth, 1),
        Err(DomainError::CapacityExceeded(_))
    ));
}

#[test]
fn adjust_beyond_stock_leaves_reservation_unchanged() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 2);
    let shopper = ShopperId::new();
    let actor = Actor::Shopper(shopper);
    let r = f.engine.reservations.create(shopper, book, 2).unwrap();

    let err = f
        .engine
        .reservations
        .adjust_quantity(r.id_typed(), 3, &actor)
        .unwrap_err();
    assert!(matches!(err, DomainError::InsufficientStock(_)));
    assert_eq!(f.engine.reservations.get(r.id_typed()).unwrap().quantity(), 2);

    let cancelled = f
        .engine
        .reservations
        .adjust_quantity(r.id_typed(), 0, &actor)
        .unwrap();
    assert_eq!(cancelled.state(), ReservationState::Cancelled);
    assert_eq!(f.record(book, store).available, 2);
}

#[test]
fn inactive_stores_are_not_allocated() {
    let f = Fixture::new();
    let book = f.book(100);
    let big = f.stock(book, 9);
    let small = f.stock(book, 2);
    f.engine.stores.deactivate(big).unwrap();

    let r = f.engine.reservations.create(ShopperId::new(), book, 1).unwrap();
    assert_eq!(r.store(), Some(small));
}

#[test]
fn missing_price_rolls_back_the_new_hold() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 3);
    f.engine.catalog.set_price(book, None);
    let shopper = ShopperId::new();
    let cart = f.engine.carts.open_cart(shopper).unwrap();

    let err = f
        .engine
        .carts
        .add_item(cart.id_typed(), book, 2)
        .unwrap_err();

    assert!(matches!(err, DomainError::Validation(_)));
    assert_eq!(f.record(book, store).reserved, 0);
    assert!(f.engine.reservations.active_for_owner(shopper).is_empty());
    assert!(f.engine.carts.cart(cart.id_typed()).unwrap().items().is_empty());
    f.assert_consistent();
}

#[test]
fn unknown_and_inactive_books_cannot_be_added() {
    let f = Fixture::new();
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    assert!(matches!(
        f.engine.carts.add_item(cart.id_typed(), BookId::new(), 1),
        Err(DomainError::NotFound(_))
    ));

    let book = f.book(100);
    f.stock(book, 3);
    f.engine.catalog.set_active(book, false);
    assert!(matches!(
        f.engine.carts.add_item(cart.id_typed(), book, 1),
        Err(DomainError::Validation(_))
    ));
}

#[test]
fn merging_past_the_per_book_cap_is_rejected() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 10);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();

    f.engine.carts.add_item(cart.id_typed(), book, 2).unwrap();
    let cart = f.engine.carts.add_item(cart.id_typed(), book, 1).unwrap();
    assert_eq!(cart.item(book).unwrap().quantity, 3);

    let err = f
        .engine
        .carts
        .add_item(cart.id_typed(), book, 1)
        .unwrap_err();
    assert!(matches!(err, DomainError::Validation(_)));
    assert_eq!(f.record(book, store).reserved, 3);
}

#[test]
fn checkout_sells_every_line_and_converts() {
    let f = Fixture::new();
    let a = f.book(1_000);
    let b = f.book(450);
    let sa = f.stock(a, 5);
    let sb = f.stock(b, 5);
    let shopper = ShopperId::new();
    let cart = f.engine.carts.open_cart(shopper).unwrap();
    f.engine.carts.add_item(cart.id_typed(), a, 2).unwrap();
    f.engine.carts.add_item(cart.id_typed(), b, 1).unwrap();

    assert!(matches!(
        f.engine
            .carts
            .checkout(cart.id_typed(), &PaymentConfirmation::new("  ")),
        Err(DomainError::Validation(_))
    ));

    let cart = f
        .engine
        .carts
        .checkout(cart.id_typed(), &PaymentConfirmation::new("pay_42"))
        .unwrap();

    assert_eq!(cart.state(), CartState::Converted);
    assert_eq!(cart.totals().total, Money::from_minor(2_450));
    assert_eq!(
        f.record(a, sa),
        StockRecord {
            total: 3,
            available: 3,
            reserved: 0
        }
    );
    assert_eq!(f.record(b, sb).total, 4);
    for item in cart.items() {
        assert_eq!(
            f.engine.reservations.get(item.reservation).unwrap().state(),
            ReservationState::Confirmed
        );
        let kinds: Vec<_> = f
            .engine
            .ledger
            .movements_for(item.reservation)
            .iter()
            .map(|m| m.kind)
            .collect();
        assert_eq!(kinds, vec![MovementKind::Reservation, MovementKind::Sale]);
    }
    f.assert_consistent();

    // A converted cart is gone; the next interaction opens a fresh one.
    let next = f.engine.carts.open_cart(shopper).unwrap();
    assert_ne!(next.id_typed(), cart.id_typed());
}

#[test]
fn checkout_past_ttl_expires_and_reopens_the_cart() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 2);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(cart.id_typed(), book, 2).unwrap();

    f.clock.advance(Duration::hours(24));
    let err = f
        .engine
        .carts
        .checkout(cart.id_typed(), &PaymentConfirmation::new("pay_late"))
        .unwrap_err();

    assert!(matches!(err, DomainError::ReservationExpired(_)));
    assert_eq!(
        f.engine.carts.cart(cart.id_typed()).unwrap().state(),
        CartState::Active
    );
    assert_eq!(f.record(book, store).available, 2);
}

#[test]
fn stale_line_is_replaced_on_re_add() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 5);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    let first = f.engine.carts.add_item(cart.id_typed(), book, 3).unwrap();
    let old = first.item(book).unwrap().reservation;

    f.clock.advance(Duration::hours(25));
    f.engine.sweeper.run_once(f.clock.now());

    let cart = f.engine.carts.add_item(cart.id_typed(), book, 1).unwrap();
    let item = cart.item(book).unwrap();
    assert_ne!(item.reservation, old);
    assert_eq!(item.quantity, 1);
    assert_eq!(f.record(book, store).reserved, 1);
    f.assert_consistent();
}

#[test]
fn remove_and_clear_release_holds() {
    let f = Fixture::new();
    let a = f.book(100);
    let b = f.book(200);
    let sa = f.stock(a, 3);
    let sb = f.stock(b, 3);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(cart.id_typed(), a, 1).unwrap();
    f.engine.carts.add_item(cart.id_typed(), b, 2).unwrap();

    let cart = f.engine.carts.remove_item(cart.id_typed(), a).unwrap();
    assert!(cart.item(a).is_none());
    assert_eq!(f.record(a, sa).reserved, 0);

    let cart = f.engine.carts.update_quantity(cart.id_typed(), b, 0).unwrap();
    assert!(cart.items().is_empty());
    assert_eq!(f.record(b, sb).available, 3);

    f.engine.carts.add_item(cart.id_typed(), a, 2).unwrap();
    let cart = f.engine.carts.clear(cart.id_typed()).unwrap();
    assert_eq!(f.engine.carts.compute_totals(cart.id_typed()).unwrap().item_count, 0);
    assert_eq!(f.record(a, sa).reserved, 0);
    f.assert_consistent();
}

#[test]
fn idle_carts_are_abandoned_and_release_their_holds() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 3);
    let idle = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(idle.id_typed(), book, 2).unwrap();

    f.clock.advance(Duration::hours(71));
    let busy = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(busy.id_typed(), book, 1).unwrap();
    f.clock.advance(Duration::hours(2));

    assert_eq!(f.engine.carts.abandon_inactive(f.clock.now()), 1);
    assert_eq!(
        f.engine.carts.cart(idle.id_typed()).unwrap().state(),
        CartState::Abandoned
    );
    assert_eq!(
        f.engine.carts.cart(busy.id_typed()).unwrap().state(),
        CartState::Active
    );
    assert_eq!(f.record(book, store).reserved, 1);
    f.assert_consistent();
}

/// Cart store that cannot persist the `Abandoned` transition.
#[derive(Debug, Default)]
struct RefusesAbandon(InMemoryCartRepository);

impl CartRepository for RefusesAbandon {
    fn get(&self, id: CartId) -> Option<Cart> {
        self.0.get(id)
    }

    fn save(&self, cart: &Cart, expected: ExpectedVersion) -> DomainResult<()> {
        if cart.state() == CartState::Abandoned {
            return Err(DomainError::conflict("cart store unavailable"));
        }
        self.0.save(cart, expected)
    }

    fn open_for_owner(&self, owner: ShopperId) -> Option<Cart> {
        self.0.open_for_owner(owner)
    }

    fn list_active(&self) -> Vec<Cart> {
        self.0.list_active()
    }
}

#[test]
fn failed_abandonment_keeps_the_cart_and_its_holds() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 4);
    let carts = CartOrchestrator::new(
        f.engine.reservations.clone(),
        Arc::new(RefusesAbandon::default()),
        f.engine.catalog.clone(),
    );
    let cart = carts.open_cart(ShopperId::new()).unwrap();
    let cart = carts.add_item(cart.id_typed(), book, 2).unwrap();
    let hold = cart.item(book).unwrap().reservation;

    f.clock.advance(Duration::hours(73));
    assert_eq!(carts.abandon_inactive(f.clock.now()), 0);

    assert_eq!(carts.cart(cart.id_typed()).unwrap().state(), CartState::Active);
    assert!(f.engine.reservations.get(hold).unwrap().is_active());
    assert_eq!(f.record(book, store).reserved, 2);
    f.assert_consistent();
}

#[test]
fn discontinuing_a_book_clears_carts_and_holds() {
    let f = Fixture::new();
    let book = f.book(100);
    let keep = f.book(100);
    let store = f.stock(book, 10);
    f.stock(keep, 10);

    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(cart.id_typed(), book, 2).unwrap();
    f.engine.carts.add_item(cart.id_typed(), keep, 1).unwrap();
    let loose = f.engine.reservations.create(ShopperId::new(), book, 1).unwrap();

    let report = f.engine.carts.discontinue_book(book, UserId::new());

    assert_eq!(report.items_removed, 1);
    assert_eq!(report.reservations_cancelled, 2);
    assert_eq!(report.failed, 0);
    let cart = f.engine.carts.cart(cart.id_typed()).unwrap();
    assert!(cart.item(book).is_none());
    assert!(cart.item(keep).is_some());
    assert_eq!(
        f.engine.reservations.get(loose.id_typed()).unwrap().state(),
        ReservationState::Cancelled
    );
    assert_eq!(f.record(book, store).reserved, 0);
    f.assert_consistent();
}

#[test]
fn background_sweeper_expires_and_stops() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 2);
    let r = f.engine.reservations.create(ShopperId::new(), book, 2).unwrap();
    f.clock.advance(Duration::hours(25));

    let handle = f
        .engine
        .sweeper
        .clone()
        .spawn(StdDuration::from_millis(10))
        .unwrap();
    let deadline = Instant::now() + StdDuration::from_secs(5);
    while f.engine.reservations.get(r.id_typed()).unwrap().is_active()
        && Instant::now() < deadline
    {
        thread::sleep(StdDuration::from_millis(5));
    }
    handle.shutdown();

    assert_eq!(
        f.engine.reservations.get(r.id_typed()).unwrap().state(),
        ReservationState::Expired
    );
    assert_eq!(f.record(book, store).available, 2);
}

#[test]
fn availability_projection_follows_the_bus() {
    let f = Fixture::new();
    let projection: Arc<AvailabilityProjection<InMemoryReadStore<StockKey, AvailabilityView>>> =
        Arc::new(AvailabilityProjection::new(InMemoryReadStore::new()));
    let worker = {
        let projection = projection.clone();
        ProjectionWorker::spawn(
            "availability",
            f.engine.bus.clone(),
            Some(LEDGER_STREAM),
            move |env: EventEnvelope<JsonValue>| projection.apply_envelope(&env),
        )
        .unwrap()
    };

    let book = f.book(100);
    let store = f.stock(book, 4);
    let cart = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(cart.id_typed(), book, 3).unwrap();

    let expected = f.record(book, store);
    let deadline = Instant::now() + StdDuration::from_secs(5);
    while projection.get(book, store).map(|v| v.record) != Some(expected)
        && Instant::now() < deadline
    {
        thread::sleep(StdDuration::from_millis(5));
    }
    worker.shutdown();

    assert_eq!(projection.get(book, store).unwrap().record, expected);
    assert_eq!(projection.available_units(book), 1);
}

#[test]
fn availability_projection_attached_late_catches_up() {
    let f = Fixture::new();
    let book = f.book(100);
    let store = f.stock(book, 5);
    let early = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(early.id_typed(), book, 2).unwrap();

    let projection: Arc<AvailabilityProjection<InMemoryReadStore<StockKey, AvailabilityView>>> =
        Arc::new(AvailabilityProjection::new(InMemoryReadStore::new()));
    let worker = {
        let projection = projection.clone();
        ProjectionWorker::spawn(
            "availability",
            f.engine.bus.clone(),
            Some(LEDGER_STREAM),
            move |env: EventEnvelope<JsonValue>| projection.apply_envelope(&env),
        )
        .unwrap()
    };
    projection.catch_up(&f.engine.ledger).unwrap();

    let late = f.engine.carts.open_cart(ShopperId::new()).unwrap();
    f.engine.carts.add_item(late.id_typed(), book, 1).unwrap();

    let expected = f.record(book, store);
    assert_eq!(
        expected,
        StockRecord {
            total: 5,
            available: 2,
            reserved: 3
        }
    );
    let deadline = Instant::now() + StdDuration::from_secs(5);
    while projection.get(book, store).map(|v| v.record) != Some(expected)
        && Instant::now() < deadline
    {
        thread::sleep(StdDuration::from_millis(5));
    }
    worker.shutdown();

    assert_eq!(projection.get(book, store).unwrap().record, expected);
}

#[derive(Debug, Clone)]
enum CartOp {
    Add(usize, usize, u32),
    Update(usize, usize, u32),
    Remove(usize, usize),
    Advance(i64),
    Sweep,
}

fn cart_op() -> impl Strategy<Value = CartOp> {
    prop_oneof![
        4 => (0usize..3, 0usize..7, 1u32..4).prop_map(|(s, b, q)| CartOp::Add(s, b, q)),
        2 => (0usize..3, 0usize..7, 0u32..5).prop_map(|(s, b, q)| CartOp::Update(s, b, q)),
        1 => (0usize..3, 0usize..7).prop_map(|(s, b)| CartOp::Remove(s, b)),
        1 => (1i64..30).prop_map(CartOp::Advance),
        1 => Just(CartOp::Sweep),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 48,
        ..ProptestConfig::default()
    })]

    /// Property: whatever shoppers do, every stock record reconciles and
    /// every cart stays within its limits.
    #[test]
    fn ledger_and_carts_stay_consistent(ops in proptest::collection::vec(cart_op(), 1..40)) {
        let f = Fixture::new();
        let books: Vec<BookId> = (0..7).map(|_| f.book(300)).collect();
        for book in &books {
            f.stock(*book, 4);
        }
        let carts: Vec<_> = (0..3)
            .map(|_| f.engine.carts.open_cart(ShopperId::new()).unwrap().id_typed())
            .collect();

        for op in ops {
            let _ = match op {
                CartOp::Add(s, b, q) => f.engine.carts.add_item(carts[s], books[b], q).map(|_| ()),
                CartOp::Update(s, b, q) => {
                    f.engine.carts.update_quantity(carts[s], books[b], q).map(|_| ())
                }
                CartOp::Remove(s, b) => f.engine.carts.remove_item(carts[s], books[b]).map(|_| ()),
                CartOp::Advance(h) => {
                    f.clock.advance(Duration::hours(h));
                    Ok(())
                }
                CartOp::Sweep => {
                    f.engine.sweeper.run_once(f.clock.now());
                    Ok(())
                }
            };

            for key in f.engine.ledger.keys() {
                prop_assert!(f.engine.ledger.reconcile(key).is_ok());
            }
            for id in &carts {
                let cart = f.engine.carts.cart(*id).unwrap();
                prop_assert!(cart.items().len() <= 5);
                for item in cart.items() {
                    prop_assert!((1..=3).contains(&item.quantity));
                }
            }
        }
    }
}
