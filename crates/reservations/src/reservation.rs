use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bindery_core::{
    Actor, Aggregate, AggregateRoot, BookId, DomainError, ReservationId, ShopperId, StoreId,
};
use bindery_events::Event;

/// Reservation lifecycle. `Active` is initial; the other three are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReservationState {
    Active,
    Confirmed,
    Expired,
    Cancelled,
}

impl ReservationState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationState::Active)
    }
}

/// Aggregate root: Reservation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    id: ReservationId,
    owner: Option<ShopperId>,
    book: Option<BookId>,
    store: Option<StoreId>,
    quantity: u32,
    created_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
    state: ReservationState,
    event_log: Vec<ReservationEvent>,
    version: u64,
    created: bool,
}

impl Reservation {
    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: ReservationId) -> Self {
        Self {
            id,
            owner: None,
            book: None,
            store: None,
            quantity: 0,
            created_at: None,
            expires_at: None,
            state: ReservationState::Active,
            event_log: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ReservationId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn owner(&self) -> Option<ShopperId> {
        self.owner
    }

    pub fn book(&self) -> Option<BookId> {
        self.book
    }

    pub fn store(&self) -> Option<StoreId> {
        self.store
    }

    pub fn quantity(&self) -> u32 {
        self.quantity
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.expires_at
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.created && self.state == ReservationState::Active
    }

    /// Active but past its TTL (the sweeper has not visited yet).
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.is_active() && self.expires_at.is_some_and(|at| now >= at)
    }

    /// Audit trail: every transition this reservation went through.
    pub fn event_log(&self) -> &[ReservationEvent] {
        &self.event_log
    }
}

impl AggregateRoot for Reservation {
    type Id = ReservationId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateReservation.
///
/// The store has already been chosen by allocation and the ledger hold
/// placed; this records the hold as a reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateReservation {
    pub reservation_id: ReservationId,
    pub owner: ShopperId,
    pub book: BookId,
    pub store: StoreId,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmReservation {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelReservation {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ExpireReservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpireReservation {
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustQuantity {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub new_quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationCommand {
    Create(CreateReservation),
    Confirm(ConfirmReservation),
    Cancel(CancelReservation),
    Expire(ExpireReservation),
    AdjustQuantity(AdjustQuantity),
}

/// Event: ReservationCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCreated {
    pub reservation_id: ReservationId,
    pub owner: ShopperId,
    pub book: BookId,
    pub store: StoreId,
    pub quantity: u32,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationConfirmed {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationCancelled {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ReservationExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationExpired {
    pub reservation_id: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: QuantityAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantityAdjusted {
    pub reservation_id: ReservationId,
    pub actor: Actor,
    pub from: u32,
    pub to: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReservationEvent {
    Created(ReservationCreated),
    Confirmed(ReservationConfirmed),
    Cancelled(ReservationCancelled),
    Expired(ReservationExpired),
    QuantityAdjusted(QuantityAdjusted),
}

impl Event for ReservationEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ReservationEvent::Created(_) => "reservations.reservation.created",
            ReservationEvent::Confirmed(_) => "reservations.reservation.confirmed",
            ReservationEvent::Cancelled(_) => "reservations.reservation.cancelled",
            ReservationEvent::Expired(_) => "reservations.reservation.expired",
            ReservationEvent::QuantityAdjusted(_) => "reservations.reservation.quantity_adjusted",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ReservationEvent::Created(e) => e.occurred_at,
            ReservationEvent::Confirmed(e) => e.occurred_at,
            ReservationEvent::Cancelled(e) => e.occurred_at,
            ReservationEvent::Expired(e) => e.occurred_at,
            ReservationEvent::QuantityAdjusted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Reservation {
    type Command = ReservationCommand;
    type Event = ReservationEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ReservationEvent::Created(e) => {
                self.id = e.reservation_id;
                self.owner = Some(e.owner);
                self.book = Some(e.book);
                self.store = Some(e.store);
                self.quantity = e.quantity;
                self.created_at = Some(e.occurred_at);
                self.expires_at = Some(e.expires_at);
                self.state = ReservationState::Active;
                self.created = true;
            }
            ReservationEvent::Confirmed(_) => {
                self.state = ReservationState::Confirmed;
            }
            ReservationEvent::Cancelled(_) => {
                self.state = ReservationState::Cancelled;
            }
            ReservationEvent::Expired(_) => {
                self.state = ReservationState::Expired;
            }
            ReservationEvent::QuantityAdjusted(e) => {
                self.quantity = e.to;
            }
        }

        self.event_log.push(event.clone());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ReservationCommand::Create(cmd) => self.handle_create(cmd),
            ReservationCommand::Confirm(cmd) => self.handle_confirm(cmd),
            ReservationCommand::Cancel(cmd) => self.handle_cancel(cmd),
            ReservationCommand::Expire(cmd) => self.handle_expire(cmd),
            ReservationCommand::AdjustQuantity(cmd) => self.handle_adjust(cmd),
        }
    }
}

impl Reservation {
    fn ensure_reservation_id(&self, reservation_id: ReservationId) -> Result<(), DomainError> {
        if self.id != reservation_id {
            return Err(DomainError::integrity("reservation_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, reservation_id: ReservationId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("reservation {reservation_id}")));
        }
        self.ensure_reservation_id(reservation_id)?;
        match self.state {
            ReservationState::Active => Ok(()),
            ReservationState::Expired => Err(DomainError::reservation_expired(format!(
                "reservation {reservation_id} has expired"
            ))),
            other => Err(DomainError::conflict(format!(
                "reservation {reservation_id} is {other:?}, not active"
            ))),
        }
    }

    fn handle_create(&self, cmd: &CreateReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("reservation already exists"));
        }
        if cmd.quantity == 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::validation("expires_at must be after creation"));
        }

        Ok(vec![ReservationEvent::Created(ReservationCreated {
            reservation_id: cmd.reservation_id,
            owner: cmd.owner,
            book: cmd.book,
            store: cmd.store,
            quantity: cmd.quantity,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(
        &self,
        cmd: &ConfirmReservation,
    ) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_active(cmd.reservation_id)?;

        if self.is_due(cmd.occurred_at) {
            return Err(DomainError::reservation_expired(format!(
                "reservation {} passed its expiry",
                cmd.reservation_id
            )));
        }

        Ok(vec![ReservationEvent::Confirmed(ReservationConfirmed {
            reservation_id: cmd.reservation_id,
            actor: cmd.actor.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_active(cmd.reservation_id)?;

        Ok(vec![ReservationEvent::Cancelled(ReservationCancelled {
            reservation_id: cmd.reservation_id,
            actor: cmd.actor.clone(),
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_expire(&self, cmd: &ExpireReservation) -> Result<Vec<ReservationEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("reservation {}", cmd.reservation_id)));
        }
        self.ensure_reservation_id(cmd.reservation_id)?;

        // Idempotent: nothing to do unless still active and past its TTL.
        if !self.is_due(cmd.occurred_at) {
            return Ok(vec![]);
        }

        Ok(vec![ReservationEvent::Expired(ReservationExpired {
            reservation_id: cmd.reservation_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustQuantity) -> Result<Vec<ReservationEvent>, DomainError> {
        self.ensure_active(cmd.reservation_id)?;

        if cmd.new_quantity == 0 {
            return Err(DomainError::validation(
                "quantity must be positive (cancel to drop a reservation)",
            ));
        }
        if cmd.new_quantity == self.quantity {
            return Ok(vec![]);
        }

        Ok(vec![ReservationEvent::QuantityAdjusted(QuantityAdjusted {
            reservation_id: cmd.reservation_id,
            actor: cmd.actor.clone(),
            from: self.quantity,
            to: cmd.new_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
