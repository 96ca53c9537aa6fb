//! Reservation manager: time-boxed holds against the stock ledger.
//!
//! Public entry points take the owner's lock; the `*_locked` variants are
//! for callers that already hold it (cart orchestrator, sweeper, admin).

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use bindery_core::{
    Actor, Aggregate, AggregateRoot, BookId, Clock, DomainError, DomainResult, ExpectedVersion,
    Policy, ReservationId, ShopperId, StoreId,
};
use bindery_inventory::{StockKey, StoreCandidate, select_store};
use bindery_reservations::{
    AdjustQuantity, CancelReservation, ConfirmReservation, CreateReservation, ExpireReservation,
    Reservation, ReservationCommand, ReservationEvent,
};

use crate::ledger::StockLedger;
use crate::locks::OwnerLocks;
use crate::publish::{Publisher, RESERVATION_STREAM};
use crate::repository::ReservationRepository;
use crate::saga::Compensation;
use crate::stores::StoreDirectory;

/// Actor recorded on movements caused by TTL expiry.
pub const EXPIRY_ACTOR: &str = "reservation-expiry";

pub struct ReservationManager {
    ledger: Arc<dyn StockLedger>,
    stores: Arc<StoreDirectory>,
    reservations: Arc<dyn ReservationRepository>,
    locks: Arc<OwnerLocks>,
    clock: Arc<dyn Clock>,
    policy: Policy,
    publisher: Publisher,
}

impl core::fmt::Debug for ReservationManager {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ReservationManager")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ReservationManager {
    pub fn new(
        ledger: Arc<dyn StockLedger>,
        stores: Arc<StoreDirectory>,
        reservations: Arc<dyn ReservationRepository>,
        locks: Arc<OwnerLocks>,
        clock: Arc<dyn Clock>,
        policy: Policy,
    ) -> Self {
        Self {
            ledger,
            stores,
            reservations,
            locks,
            clock,
            policy,
            publisher: Publisher::none(),
        }
    }

    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    pub fn policy(&self) -> &Policy {
        &self.policy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub(crate) fn ledger(&self) -> &Arc<dyn StockLedger> {
        &self.ledger
    }

    pub(crate) fn locks(&self) -> &OwnerLocks {
        &self.locks
    }

    pub(crate) fn repository(&self) -> &Arc<dyn ReservationRepository> {
        &self.reservations
    }

    pub fn get(&self, id: ReservationId) -> DomainResult<Reservation> {
        self.reservations
            .get(id)
            .ok_or_else(|| DomainError::not_found(format!("reservation {id}")))
    }

    pub fn active_for_owner(&self, owner: ShopperId) -> Vec<Reservation> {
        self.reservations.active_for_owner(owner)
    }

    fn owner_of(&self, id: ReservationId) -> DomainResult<ShopperId> {
        self.get(id)?
            .owner()
            .ok_or_else(|| DomainError::integrity(format!("reservation {id} has no owner")))
    }

    /// Hold `quantity` units of `book` for `owner` for one TTL.
    pub fn create(&self, owner: ShopperId, book: BookId, quantity: u32) -> DomainResult<Reservation> {
        self.locks
            .with(owner, || self.create_locked(owner, book, quantity, self.clock.now()))
    }

    pub fn confirm(&self, id: ReservationId, actor: &Actor) -> DomainResult<Reservation> {
        let owner = self.owner_of(id)?;
        self.locks
            .with(owner, || self.confirm_locked(id, actor, self.clock.now()))
    }

    pub fn cancel(&self, id: ReservationId, actor: &Actor, reason: &str) -> DomainResult<Reservation> {
        let owner = self.owner_of(id)?;
        self.locks
            .with(owner, || self.cancel_locked(id, actor, reason, self.clock.now()))
    }

    /// Expire if due; `Ok(false)` when there was nothing to do.
    pub fn expire(&self, id: ReservationId) -> DomainResult<bool> {
        self.expire_at(id, self.clock.now())
    }

    pub fn expire_at(&self, id: ReservationId, now: DateTime<Utc>) -> DomainResult<bool> {
        let owner = self.owner_of(id)?;
        self.locks.with(owner, || self.expire_locked(id, now))
    }

    /// Change the held quantity; 0 cancels.
    pub fn adjust_quantity(
        &self,
        id: ReservationId,
        new_quantity: u32,
        actor: &Actor,
    ) -> DomainResult<Reservation> {
        let owner = self.owner_of(id)?;
        self.locks.with(owner, || {
            self.adjust_locked(id, new_quantity, actor, self.clock.now())
        })
    }

    pub(crate) fn create_locked(
        &self,
        owner: ShopperId,
        book: BookId,
        quantity: u32,
        now: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        self.policy.check_quantity(quantity)?;
        self.expire_due_for_owner(owner, now);

        let active = self.reservations.active_for_owner(owner);
        if active.iter().any(|r| r.book() == Some(book)) {
            return Err(DomainError::duplicate_reservation(format!(
                "shopper {owner} already holds book {book}; adjust its quantity instead"
            )));
        }
        let distinct: BTreeSet<BookId> = active.iter().filter_map(Reservation::book).collect();
        if distinct.len() >= self.policy.max_distinct_books {
            return Err(DomainError::capacity_exceeded(format!(
                "shopper {owner} already holds {} distinct books",
                distinct.len()
            )));
        }

        let id = ReservationId::new();
        let actor = Actor::Shopper(owner);
        let store = self.place_hold(book, quantity, &actor, id)?;
        let key = StockKey::new(book, store);

        let mut saga = Compensation::new("create_reservation");
        saga.record("reserve", || {
            self.ledger.release(key, quantity, &actor, id).map(|_| ())
        });

        let mut reservation = Reservation::empty(id);
        let cmd = ReservationCommand::Create(CreateReservation {
            reservation_id: id,
            owner,
            book,
            store,
            quantity,
            expires_at: now + self.policy.reservation_ttl,
            occurred_at: now,
        });
        if let Err(err) = self.apply_and_save(&mut reservation, &cmd) {
            return Err(saga.fail(err));
        }
        saga.complete();

        info!(
            reservation = %id,
            owner = %owner,
            book = %book,
            store = %store,
            quantity,
            "reservation created"
        );
        Ok(reservation)
    }

    pub(crate) fn confirm_locked(
        &self,
        id: ReservationId,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        let mut reservation = self.get(id)?;
        if reservation.is_due(now) {
            self.expire_locked(id, now)?;
            return Err(DomainError::reservation_expired(format!(
                "reservation {id} expired before confirmation"
            )));
        }

        let cmd = ReservationCommand::Confirm(ConfirmReservation {
            reservation_id: id,
            actor: actor.clone(),
            occurred_at: now,
        });
        self.apply_and_save(&mut reservation, &cmd)?;

        // The ledger hold stays in place until the sale consumes it.
        info!(reservation = %id, actor = %actor, "reservation confirmed");
        Ok(reservation)
    }

    pub(crate) fn cancel_locked(
        &self,
        id: ReservationId,
        actor: &Actor,
        reason: &str,
        now: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        let mut reservation = self.get(id)?;
        let cmd = ReservationCommand::Cancel(CancelReservation {
            reservation_id: id,
            actor: actor.clone(),
            reason: reason.to_string(),
            occurred_at: now,
        });
        reservation.handle(&cmd)?;

        self.release_and_record(&mut reservation, &cmd, actor)?;
        info!(reservation = %id, actor = %actor, reason, "reservation cancelled");
        Ok(reservation)
    }

    /// No-op unless the reservation is active and due.
    pub(crate) fn expire_locked(&self, id: ReservationId, now: DateTime<Utc>) -> DomainResult<bool> {
        let mut reservation = self.get(id)?;
        let cmd = ReservationCommand::Expire(ExpireReservation {
            reservation_id: id,
            occurred_at: now,
        });
        if reservation.handle(&cmd)?.is_empty() {
            debug!(reservation = %id, state = ?reservation.state(), "expire skipped");
            return Ok(false);
        }

        self.release_and_record(&mut reservation, &cmd, &Actor::system(EXPIRY_ACTOR))?;
        info!(
            reservation = %id,
            book = ?reservation.book(),
            quantity = reservation.quantity(),
            "reservation expired"
        );
        Ok(true)
    }

    pub(crate) fn adjust_locked(
        &self,
        id: ReservationId,
        new_quantity: u32,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> DomainResult<Reservation> {
        self.policy.check_target_quantity(new_quantity)?;
        if new_quantity == 0 {
            return self.cancel_locked(id, actor, "quantity set to zero", now);
        }

        let mut reservation = self.get(id)?;
        if reservation.is_due(now) {
            self.expire_locked(id, now)?;
            return Err(DomainError::reservation_expired(format!(
                "reservation {id} expired before the quantity change"
            )));
        }

        let cmd = ReservationCommand::AdjustQuantity(AdjustQuantity {
            reservation_id: id,
            actor: actor.clone(),
            new_quantity,
            occurred_at: now,
        });
        if reservation.handle(&cmd)?.is_empty() {
            return Ok(reservation);
        }

        let key = Self::key_of(&reservation)?;
        let current = reservation.quantity();
        let mut saga = Compensation::new("adjust_reservation");
        if new_quantity > current {
            let delta = new_quantity - current;
            // InsufficientStock here leaves the reservation untouched.
            self.ledger.reserve(key, delta, actor, id)?;
            saga.record("reserve delta", move || {
                self.ledger.release(key, delta, actor, id).map(|_| ())
            });
        } else {
            let delta = current - new_quantity;
            self.ledger.release(key, delta, actor, id)?;
            saga.record("release delta", move || {
                self.ledger.reserve(key, delta, actor, id).map(|_| ())
            });
        }

        if let Err(err) = self.apply_and_save(&mut reservation, &cmd) {
            return Err(saga.fail(err));
        }
        saga.complete();

        info!(
            reservation = %id,
            from = current,
            to = new_quantity,
            "reservation quantity adjusted"
        );
        Ok(reservation)
    }

    /// Allocate a store and place the ledger hold.
    ///
    /// A store that loses a race between selection and reserve is excluded
    /// and allocation runs again over the remaining stores.
    fn place_hold(
        &self,
        book: BookId,
        quantity: u32,
        actor: &Actor,
        id: ReservationId,
    ) -> DomainResult<StoreId> {
        let mut excluded: BTreeSet<StoreId> = BTreeSet::new();
        let mut lost_race: Option<DomainError> = None;

        loop {
            let candidates: Vec<StoreCandidate> = self
                .ledger
                .records_for_book(book)
                .into_iter()
                .filter(|(store, _)| !excluded.contains(store))
                .map(|(store, record)| StoreCandidate {
                    store,
                    available: record.available,
                    active: self.stores.is_active(store),
                })
                .collect();

            let store = match select_store(book, quantity, &candidates) {
                Ok(store) => store,
                Err(err) => return Err(lost_race.unwrap_or(err)),
            };

            match self.ledger.reserve(StockKey::new(book, store), quantity, actor, id) {
                Ok(_) => return Ok(store),
                Err(err @ DomainError::InsufficientStock(_)) => {
                    debug!(book = %book, store = %store, "store lost a race; reallocating");
                    excluded.insert(store);
                    lost_race = Some(err);
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Release whatever the ledger still holds for the reservation, then
    /// record the terminal transition; the hold is re-placed if the save fails.
    fn release_and_record(
        &self,
        reservation: &mut Reservation,
        cmd: &ReservationCommand,
        actor: &Actor,
    ) -> DomainResult<()> {
        let id = reservation.id_typed();
        let key = Self::key_of(reservation)?;
        let held = self.ledger.net_reserved_for(key, id)?;
        let held = u32::try_from(held).unwrap_or(0);

        let mut saga = Compensation::new("release_reservation");
        if held > 0 {
            self.ledger.release(key, held, actor, id)?;
            saga.record("release", move || {
                self.ledger.reserve(key, held, actor, id).map(|_| ())
            });
        }
        if held != reservation.quantity() {
            warn!(
                reservation = %id,
                held,
                quantity = reservation.quantity(),
                "ledger hold differs from reservation quantity"
            );
        }

        match self.apply_and_save(reservation, cmd) {
            Ok(_) => {
                saga.complete();
                Ok(())
            }
            Err(err) => Err(saga.fail(err)),
        }
    }

    fn apply_and_save(
        &self,
        reservation: &mut Reservation,
        cmd: &ReservationCommand,
    ) -> DomainResult<Vec<ReservationEvent>> {
        let version_before = reservation.version();
        let events = reservation.execute(cmd)?;
        if events.is_empty() {
            return Ok(events);
        }
        self.reservations
            .save(reservation, ExpectedVersion::Exact(version_before))?;
        self.publisher.publish_all(
            RESERVATION_STREAM,
            reservation.id_typed(),
            version_before,
            &events,
        );
        Ok(events)
    }

    fn expire_due_for_owner(&self, owner: ShopperId, now: DateTime<Utc>) {
        for r in self.reservations.active_for_owner(owner) {
            if r.is_due(now) {
                if let Err(err) = self.expire_locked(r.id_typed(), now) {
                    warn!(reservation = %r.id_typed(), error = %err, "lazy expiry failed");
                }
            }
        }
    }

    pub(crate) fn key_of(reservation: &Reservation) -> DomainResult<StockKey> {
        match (reservation.book(), reservation.store()) {
            (Some(book), Some(store)) => Ok(StockKey::new(book, store)),
            _ => Err(DomainError::integrity(format!(
                "reservation {} has no stock assignment",
                reservation.id_typed()
            ))),
        }
    }
}
