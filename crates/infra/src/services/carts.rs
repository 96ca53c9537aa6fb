//! Cart orchestrator: the shopper-facing state machine over reservations.
//!
//! Each operation runs under the shopper's lock and follows the same shape:
//! validate against a working copy of the cart, drive the reservation
//! manager, then save the cart at the version it was loaded with. Steps
//! that already changed the ledger are undone through a `Compensation`
//! log when a later step fails, so a rejected call leaves the persisted
//! cart as it was.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use bindery_carts::{
    AddItem, Cart, CartCommand, CartEvent, CartLimits, CartState, CartTotals, ChangeQuantity,
    RemoveItem,
};
use bindery_core::{
    Actor, Aggregate, AggregateRoot, BookId, CartId, DomainError, DomainResult, ExpectedVersion,
    ReservationId, ShopperId, UserId,
};

use crate::catalog::Catalog;
use crate::ledger::SaleLine;
use crate::publish::{CART_STREAM, Publisher};
use crate::repository::CartRepository;
use crate::saga::Compensation;
use crate::services::reservations::ReservationManager;

/// Signal from the payment collaborator that the order was paid.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentConfirmation {
    pub reference: String,
}

impl PaymentConfirmation {
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
        }
    }
}

/// Outcome of `discontinue_book`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DiscontinueReport {
    pub reservations_cancelled: usize,
    pub items_removed: usize,
    pub failed: usize,
}

pub struct CartOrchestrator {
    manager: Arc<ReservationManager>,
    carts: Arc<dyn CartRepository>,
    catalog: Arc<dyn Catalog>,
    publisher: Publisher,
}

impl core::fmt::Debug for CartOrchestrator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CartOrchestrator")
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

fn owner_of(cart: &Cart) -> DomainResult<ShopperId> {
    cart.owner()
        .ok_or_else(|| DomainError::integrity(format!("cart {} has no owner", cart.id_typed())))
}

impl CartOrchestrator {
    pub fn new(
        manager: Arc<ReservationManager>,
        carts: Arc<dyn CartRepository>,
        catalog: Arc<dyn Catalog>,
    ) -> Self {
        Self {
            manager,
            carts,
            catalog,
            publisher: Publisher::none(),
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn cart(&self, id: CartId) -> DomainResult<Cart> {
        self.carts
            .get(id)
            .ok_or_else(|| DomainError::not_found(format!("cart {id}")))
    }

    /// Return the shopper's open cart, creating one on first interaction.
    pub fn open_cart(&self, shopper: ShopperId) -> DomainResult<Cart> {
        self.manager.locks().with(shopper, || {
            if let Some(cart) = self.carts.open_for_owner(shopper) {
                return Ok(cart);
            }

            let id = CartId::new();
            let mut cart = Cart::empty(id, CartLimits::from(self.manager.policy()));
            let events = cart.execute(&CartCommand::Open {
                cart_id: id,
                owner: shopper,
                occurred_at: self.manager.now(),
            })?;
            self.commit(&cart, 0, &events)?;

            info!(cart = %id, owner = %shopper, "cart opened");
            Ok(cart)
        })
    }

    /// Totals are always recomputed from the stored items.
    pub fn compute_totals(&self, id: CartId) -> DomainResult<CartTotals> {
        Ok(self.cart(id)?.totals())
    }

    /// Add `quantity` units of `book`, merging into an existing line.
    pub fn add_item(&self, cart_id: CartId, book: BookId, quantity: u32) -> DomainResult<Cart> {
        self.with_cart(cart_id, |mut cart, now| {
            let owner = owner_of(&cart)?;
            let actor = Actor::Shopper(owner);
            let actor = &actor;
            let loaded = cart.version();
            let mut events = Vec::new();

            self.catalog.ensure_sellable(book)?;

            // A line whose hold already ended is replaced, not merged.
            let stale = cart
                .item(book)
                .map(|i| i.reservation)
                .filter(|r| !self.hold_is_live(*r, now));
            if let Some(stale) = stale {
                debug!(cart = %cart_id, book = %book, reservation = %stale, "replacing stale cart line");
                events.extend(cart.execute(&CartCommand::RemoveItem(RemoveItem {
                    cart_id,
                    book,
                    occurred_at: now,
                }))?);
            }

            let merged = cart.quantity_after_add(book, quantity)?;
            let mut saga = Compensation::new("add_item");

            let existing = cart.item(book).map(|i| (i.reservation, i.quantity, i.unit_price));
            let (reservation, unit_price) = match existing {
                Some((reservation, previous, unit_price)) => {
                    self.manager.adjust_locked(reservation, merged, actor, now)?;
                    saga.record("grow reservation", move || {
                        self.manager
                            .adjust_locked(reservation, previous, actor, now)
                            .map(|_| ())
                    });
                    (reservation, unit_price)
                }
                None => {
                    let reservation = self
                        .manager
                        .create_locked(owner, book, quantity, now)?
                        .id_typed();
                    saga.record("create reservation", move || {
                        self.manager
                            .cancel_locked(reservation, actor, "cart update rolled back", now)
                            .map(|_| ())
                    });
                    match self.catalog.price_snapshot(book) {
                        Ok(price) => (reservation, price),
                        Err(err) => return Err(saga.fail(err)),
                    }
                }
            };

            let added = cart.execute(&CartCommand::AddItem(AddItem {
                cart_id,
                book,
                quantity,
                unit_price,
                reservation,
                occurred_at: now,
            }));
            let result = added.and_then(|added| {
                events.extend(added);
                self.commit(&cart, loaded, &events)
            });
            if let Err(err) = result {
                return Err(saga.fail(err));
            }
            saga.complete();

            info!(
                cart = %cart_id,
                book = %book,
                quantity = merged,
                reservation = %reservation,
                "cart item added"
            );
            Ok(cart)
        })
    }

    /// Set a line's quantity; 0 removes the line.
    pub fn update_quantity(
        &self,
        cart_id: CartId,
        book: BookId,
        new_quantity: u32,
    ) -> DomainResult<Cart> {
        self.manager.policy().check_target_quantity(new_quantity)?;
        if new_quantity == 0 {
            return self.remove_item(cart_id, book);
        }

        self.with_cart(cart_id, |mut cart, now| {
            let actor = Actor::Shopper(owner_of(&cart)?);
            let loaded = cart.version();
            let cmd = CartCommand::ChangeQuantity(ChangeQuantity {
                cart_id,
                book,
                quantity: new_quantity,
                occurred_at: now,
            });
            if cart.handle(&cmd)?.is_empty() {
                return Ok(cart);
            }
            let item = cart
                .item(book)
                .cloned()
                .ok_or_else(|| DomainError::not_found(format!("book {book} is not in cart")))?;

            // Reservation first; the line only changes if the hold did.
            self.manager
                .adjust_locked(item.reservation, new_quantity, &actor, now)?;
            let mut saga = Compensation::new("update_quantity");
            saga.record("adjust reservation", || {
                self.manager
                    .adjust_locked(item.reservation, item.quantity, &actor, now)
                    .map(|_| ())
            });

            let result = cart
                .execute(&cmd)
                .and_then(|events| self.commit(&cart, loaded, &events));
            if let Err(err) = result {
                return Err(saga.fail(err));
            }
            saga.complete();

            info!(
                cart = %cart_id,
                book = %book,
                from = item.quantity,
                to = new_quantity,
                "cart quantity changed"
            );
            Ok(cart)
        })
    }

    /// Release the line's hold, then drop the line.
    pub fn remove_item(&self, cart_id: CartId, book: BookId) -> DomainResult<Cart> {
        self.with_cart(cart_id, |mut cart, now| {
            let actor = Actor::Shopper(owner_of(&cart)?);
            let loaded = cart.version();
            let events = cart.execute(&CartCommand::RemoveItem(RemoveItem {
                cart_id,
                book,
                occurred_at: now,
            }))?;

            for event in &events {
                if let CartEvent::ItemRemoved { reservation, .. } = event {
                    self.release_hold(*reservation, &actor, "removed from cart", now)?;
                }
            }
            self.commit(&cart, loaded, &events)?;

            info!(cart = %cart_id, book = %book, "cart item removed");
            Ok(cart)
        })
    }

    /// Release every hold, then empty the cart.
    pub fn clear(&self, cart_id: CartId) -> DomainResult<Cart> {
        self.with_cart(cart_id, |mut cart, now| {
            let actor = Actor::Shopper(owner_of(&cart)?);
            let loaded = cart.version();
            let events = cart.execute(&CartCommand::Clear {
                cart_id,
                occurred_at: now,
            })?;

            for event in &events {
                if let CartEvent::ItemRemoved { reservation, .. } = event {
                    self.release_hold(*reservation, &actor, "cart cleared", now)?;
                }
            }
            self.commit(&cart, loaded, &events)?;

            info!(cart = %cart_id, removed = events.len(), "cart cleared");
            Ok(cart)
        })
    }

    /// Turn every held line into a sale and convert the cart.
    ///
    /// All-or-nothing: the sales of every line are committed as one ledger
    /// batch; on any failure the cart returns to `Active` and no line's
    /// stock changes.
    pub fn checkout(&self, cart_id: CartId, payment: &PaymentConfirmation) -> DomainResult<Cart> {
        if payment.reference.trim().is_empty() {
            return Err(DomainError::validation("payment confirmation reference is empty"));
        }

        self.with_cart(cart_id, |mut cart, now| {
            let loaded = cart.version();
            let started = cart.execute(&CartCommand::BeginCheckout {
                cart_id,
                occurred_at: now,
            })?;
            self.commit(&cart, loaded, &started)?;

            if let Err(err) = self.settle(&cart, now) {
                self.abort_checkout(&mut cart, &err, now);
                return Err(err);
            }

            let before = cart.version();
            let converted = cart.execute(&CartCommand::Convert {
                cart_id,
                payment_reference: payment.reference.clone(),
                occurred_at: now,
            })?;
            self.commit(&cart, before, &converted)?;

            let totals = cart.totals();
            info!(
                cart = %cart_id,
                items = totals.item_count,
                total = %totals.total,
                payment = %payment.reference,
                "checkout completed"
            );
            Ok(cart)
        })
    }

    /// Abandon carts idle for longer than the configured inactivity window,
    /// then release their holds. Returns how many carts were abandoned.
    pub fn abandon_inactive(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.manager.policy().cart_inactivity;
        let idle = |cart: &Cart| {
            cart.state() == CartState::Active && cart.last_activity().is_some_and(|t| t <= cutoff)
        };

        let mut abandoned = 0;
        for candidate in self.carts.list_active().into_iter().filter(|c| idle(c)) {
            let cart_id = candidate.id_typed();
            let result = self.with_cart(cart_id, |mut cart, _| {
                if !idle(&cart) {
                    return Ok(false);
                }
                let holds: Vec<ReservationId> = cart.items().iter().map(|i| i.reservation).collect();
                let loaded = cart.version();
                let events = cart.execute(&CartCommand::Abandon {
                    cart_id,
                    occurred_at: now,
                })?;
                self.commit(&cart, loaded, &events)?;

                // The cart is saved as abandoned before any hold ends. A hold
                // that fails to release here stays active until the sweeper
                // expires it.
                let actor = Actor::system("cart-inactivity");
                for reservation in holds {
                    if let Err(err) = self.release_hold(reservation, &actor, "cart abandoned", now) {
                        warn!(
                            cart = %cart_id,
                            reservation = %reservation,
                            error = %err,
                            "failed to release hold of abandoned cart"
                        );
                    }
                }
                Ok(true)
            });

            match result {
                Ok(true) => {
                    abandoned += 1;
                    info!(cart = %cart_id, "cart abandoned after inactivity");
                }
                Ok(false) => {}
                Err(err) => warn!(cart = %cart_id, error = %err, "failed to abandon cart"),
            }
        }
        abandoned
    }

    /// Admin bulk operation: drop `book` from every cart and cancel every
    /// active reservation of it.
    pub fn discontinue_book(&self, book: BookId, admin: UserId) -> DiscontinueReport {
        let actor = Actor::Admin(admin);
        let mut report = DiscontinueReport::default();

        // Lines in carts first, through the normal remove path.
        for candidate in self.carts.list_active() {
            if candidate.item(book).is_none() {
                continue;
            }
            let cart_id = candidate.id_typed();
            let result = self.with_cart(cart_id, |mut cart, now| {
                if cart.state() != CartState::Active || cart.item(book).is_none() {
                    return Ok(false);
                }
                let loaded = cart.version();
                let events = cart.execute(&CartCommand::RemoveItem(RemoveItem {
                    cart_id,
                    book,
                    occurred_at: now,
                }))?;
                let mut cancelled = false;
                for event in &events {
                    if let CartEvent::ItemRemoved { reservation, .. } = event {
                        cancelled |= self.release_hold(*reservation, &actor, "book discontinued", now)?;
                    }
                }
                self.commit(&cart, loaded, &events)?;
                Ok(cancelled)
            });

            match result {
                Ok(cancelled) => {
                    report.items_removed += 1;
                    report.reservations_cancelled += usize::from(cancelled);
                }
                Err(err) => {
                    report.failed += 1;
                    warn!(cart = %cart_id, book = %book, error = %err, "failed to drop discontinued book");
                }
            }
        }

        // Holds not attached to an active cart line.
        for reservation in self.manager.repository().active_for_book(book) {
            let id = reservation.id_typed();
            let Some(owner) = reservation.owner() else {
                report.failed += 1;
                continue;
            };
            let result = self.manager.locks().with(owner, || {
                self.release_hold(id, &actor, "book discontinued", self.manager.now())
            });
            match result {
                Ok(cancelled) => report.reservations_cancelled += usize::from(cancelled),
                Err(err) => {
                    report.failed += 1;
                    warn!(reservation = %id, book = %book, error = %err, "failed to cancel discontinued hold");
                }
            }
        }

        info!(
            book = %book,
            admin = %admin,
            cancelled = report.reservations_cancelled,
            removed = report.items_removed,
            failed = report.failed,
            "book discontinued"
        );
        report
    }

    /// Load the cart, take its owner's lock, reload, then run `f`.
    fn with_cart<T>(
        &self,
        cart_id: CartId,
        f: impl FnOnce(Cart, DateTime<Utc>) -> DomainResult<T>,
    ) -> DomainResult<T> {
        let owner = owner_of(&self.cart(cart_id)?)?;
        self.manager
            .locks()
            .with(owner, || f(self.cart(cart_id)?, self.manager.now()))
    }

    fn hold_is_live(&self, reservation: ReservationId, now: DateTime<Utc>) -> bool {
        self.manager
            .repository()
            .get(reservation)
            .is_some_and(|r| r.is_active() && !r.is_due(now))
    }

    /// Cancel the reservation if it is still active. `Ok(false)` when it
    /// already ended (expired, cancelled, confirmed).
    fn release_hold(
        &self,
        reservation: ReservationId,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<bool> {
        match self.manager.repository().get(reservation) {
            Some(r) if r.is_active() => {
                self.manager.cancel_locked(reservation, actor, reason, now)?;
                Ok(true)
            }
            _ => {
                debug!(reservation = %reservation, "hold already ended; nothing to release");
                Ok(false)
            }
        }
    }

    /// Verify every line is still backed by its hold, then commit all sales
    /// in one batch and confirm the reservations.
    fn settle(&self, cart: &Cart, now: DateTime<Utc>) -> DomainResult<()> {
        let actor = Actor::Shopper(owner_of(cart)?);
        let ledger = self.manager.ledger();

        let mut lines = Vec::with_capacity(cart.items().len());
        for item in cart.items() {
            let reservation = self.manager.get(item.reservation).map_err(|_| {
                DomainError::integrity(format!(
                    "cart line for book {} references unknown reservation {}",
                    item.book, item.reservation
                ))
            })?;
            if reservation.is_due(now) {
                self.manager.expire_locked(item.reservation, now)?;
                return Err(DomainError::reservation_expired(format!(
                    "reservation {} for book {} expired before checkout",
                    item.reservation, item.book
                )));
            }

            let key = ReservationManager::key_of(&reservation)?;
            let net = ledger.net_reserved_for(key, item.reservation)?;
            if net < i64::from(item.quantity) {
                error!(
                    cart = %cart.id_typed(),
                    book = %item.book,
                    reservation = %item.reservation,
                    held = net,
                    quantity = item.quantity,
                    "cart line is no longer backed by its hold"
                );
                return Err(DomainError::integrity(format!(
                    "reservation {} holds {net} of {} unit(s) for book {}",
                    item.reservation, item.quantity, item.book
                )));
            }
            lines.push(SaleLine {
                key,
                quantity: item.quantity,
                correlation: item.reservation,
            });
        }

        ledger.commit_sales(&lines, &actor)?;

        for item in cart.items() {
            if let Err(err) = self.manager.confirm_locked(item.reservation, &actor, now) {
                // The sale is recorded; reconciliation picks this up.
                error!(
                    reservation = %item.reservation,
                    error = %err,
                    "sale committed but reservation not confirmed"
                );
            }
        }
        Ok(())
    }

    fn abort_checkout(&self, cart: &mut Cart, cause: &DomainError, now: DateTime<Utc>) {
        let loaded = cart.version();
        let result = cart
            .execute(&CartCommand::AbortCheckout {
                cart_id: cart.id_typed(),
                reason: cause.to_string(),
                occurred_at: now,
            })
            .and_then(|events| self.commit(cart, loaded, &events));

        match result {
            Ok(()) => warn!(
                cart = %cart.id_typed(),
                code = cause.code(),
                error = %cause,
                "checkout aborted"
            ),
            Err(err) => error!(
                cart = %cart.id_typed(),
                error = %err,
                "checkout aborted but cart could not be reopened"
            ),
        }
    }

    fn commit(&self, cart: &Cart, loaded: u64, events: &[CartEvent]) -> DomainResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        self.carts.save(cart, ExpectedVersion::Exact(loaded))?;
        self.publisher
            .publish_all(CART_STREAM, cart.id_typed(), loaded, events);
        Ok(())
    }
}
