use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bindery_core::{
    Actor, Aggregate, AggregateRoot, BookId, DomainError, DomainResult, ReservationId, StoreId,
};

use crate::movement::{Movement, MovementKind, net_reserved_by_correlation, net_reserved_for};

/// Identity of a stock record: one book at one physical store.
///
/// Ordered so that multi-record operations can lock in a global order.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StockKey {
    pub book: BookId,
    pub store: StoreId,
}

impl StockKey {
    pub fn new(book: BookId, store: StoreId) -> Self {
        Self { book, store }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.book, self.store)
    }
}

/// Live counters of a stock record.
///
/// Invariant: `available + reserved <= total`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub total: u32,
    pub available: u32,
    pub reserved: u32,
}

impl StockRecord {
    pub fn check_invariants(&self) -> DomainResult<()> {
        if u64::from(self.available) + u64::from(self.reserved) > u64::from(self.total) {
            return Err(DomainError::integrity(format!(
                "available ({}) + reserved ({}) exceeds total ({})",
                self.available, self.reserved, self.total
            )));
        }
        Ok(())
    }

    /// Evolve the counters by one movement (saturating; validation happens
    /// before a movement is ever recorded).
    pub fn apply_movement(&mut self, kind: MovementKind, quantity: u32) {
        let q = quantity;
        match kind {
            MovementKind::Inbound | MovementKind::Return => {
                self.total += q;
                self.available += q;
            }
            MovementKind::Reservation => {
                self.available = self.available.saturating_sub(q);
                self.reserved += q;
            }
            MovementKind::Release => {
                self.reserved = self.reserved.saturating_sub(q);
                self.available += q;
            }
            MovementKind::Sale => {
                self.reserved = self.reserved.saturating_sub(q);
                self.total = self.total.saturating_sub(q);
            }
            MovementKind::Loss | MovementKind::Writeoff => {
                self.available = self.available.saturating_sub(q);
                self.total = self.total.saturating_sub(q);
            }
        }
    }
}

/// Command: record one movement against a stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockCommand {
    pub kind: MovementKind,
    pub quantity: u32,
    pub actor: Actor,
    pub correlation: Option<ReservationId>,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl StockCommand {
    fn new(
        kind: MovementKind,
        quantity: u32,
        actor: Actor,
        correlation: Option<ReservationId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            quantity,
            actor,
            correlation,
            note: None,
            occurred_at,
        }
    }

    pub fn receive(quantity: u32, actor: Actor, occurred_at: DateTime<Utc>) -> Self {
        Self::new(MovementKind::Inbound, quantity, actor, None, occurred_at)
    }

    pub fn reserve(
        quantity: u32,
        actor: Actor,
        correlation: ReservationId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(MovementKind::Reservation, quantity, actor, Some(correlation), occurred_at)
    }

    pub fn release(
        quantity: u32,
        actor: Actor,
        correlation: ReservationId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(MovementKind::Release, quantity, actor, Some(correlation), occurred_at)
    }

    pub fn sale(
        quantity: u32,
        actor: Actor,
        correlation: ReservationId,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(MovementKind::Sale, quantity, actor, Some(correlation), occurred_at)
    }

    pub fn return_units(
        quantity: u32,
        actor: Actor,
        correlation: Option<ReservationId>,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self::new(MovementKind::Return, quantity, actor, correlation, occurred_at)
    }

    pub fn loss(quantity: u32, actor: Actor, occurred_at: DateTime<Utc>) -> Self {
        Self::new(MovementKind::Loss, quantity, actor, None, occurred_at)
    }

    pub fn write_off(quantity: u32, actor: Actor, occurred_at: DateTime<Utc>) -> Self {
        Self::new(MovementKind::Writeoff, quantity, actor, None, occurred_at)
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Aggregate root: the stock record of one (book, store) plus its live movement log.
///
/// The counters answer "how much is free right now"; the log answers "who
/// holds what" through `net_reserved_for`. Both evolve only through `apply`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockAccount {
    key: StockKey,
    record: StockRecord,
    movements: Vec<Movement>,
    version: u64,
    created: bool,
}

impl StockAccount {
    /// Create an empty, not-yet-received account.
    pub fn empty(key: StockKey) -> Self {
        Self {
            key,
            record: StockRecord::default(),
            movements: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn key(&self) -> StockKey {
        self.key
    }

    pub fn record(&self) -> StockRecord {
        self.record
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    /// Live (not yet archived) movements, oldest first.
    pub fn movements(&self) -> &[Movement] {
        &self.movements
    }

    pub fn net_reserved_for(&self, correlation: ReservationId) -> i64 {
        net_reserved_for(&self.movements, correlation)
    }

    /// Verify counters against themselves and against the movement log.
    pub fn reconcile(&self) -> DomainResult<()> {
        self.record.check_invariants()?;

        let mut sum = 0i64;
        for (correlation, net) in net_reserved_by_correlation(&self.movements) {
            if net < 0 {
                return Err(DomainError::integrity(format!(
                    "{}: correlation {correlation} nets to {net}",
                    self.key
                )));
            }
            sum += net;
        }

        if sum != i64::from(self.record.reserved) {
            return Err(DomainError::integrity(format!(
                "{}: reserved counter is {} but movements net to {sum}",
                self.key, self.record.reserved
            )));
        }
        Ok(())
    }

    /// Remove every movement that no longer contributes to an open hold.
    ///
    /// Uncorrelated movements and movements of correlations netting to zero
    /// are returned for archival; reconciliation is unaffected.
    pub fn compact(&mut self) -> Vec<Movement> {
        let net = net_reserved_by_correlation(&self.movements);
        let (keep, archived): (Vec<_>, Vec<_>) =
            self.movements.drain(..).partition(|m| match m.correlation {
                Some(c) => net.get(&c).copied().unwrap_or(0) != 0,
                None => false,
            });
        self.movements = keep;
        archived
    }
}

impl AggregateRoot for StockAccount {
    type Id = StockKey;

    fn id(&self) -> &Self::Id {
        &self.key
    }

    fn version(&self) -> u64 {
        self.version
    }
}

impl Aggregate for StockAccount {
    type Command = StockCommand;
    type Event = Movement;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        self.record.apply_movement(event.kind, event.quantity);

        self.created = true;
        self.movements.push(event.clone());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        if command.quantity == 0 {
            return Err(DomainError::validation("movement quantity must be positive"));
        }
        if !self.created && command.kind != MovementKind::Inbound {
            return Err(DomainError::not_found(format!("no stock record for {}", self.key)));
        }
        if command.kind.requires_correlation() && command.correlation.is_none() {
            return Err(DomainError::validation(format!(
                "{} movement requires a correlation id",
                command.kind.as_str()
            )));
        }

        let q = command.quantity;
        let r = self.record;
        match command.kind {
            MovementKind::Inbound | MovementKind::Return => {
                if r.total.checked_add(q).is_none() {
                    return Err(DomainError::validation("stock total overflow"));
                }
            }
            MovementKind::Reservation => {
                if r.available < q {
                    return Err(DomainError::insufficient_stock(format!(
                        "{}: requested {q}, available {}",
                        self.key, r.available
                    )));
                }
            }
            MovementKind::Release | MovementKind::Sale => {
                let correlation = command.correlation.ok_or_else(|| {
                    DomainError::validation("hold movement requires a correlation id")
                })?;
                let net = self.net_reserved_for(correlation);
                if net < i64::from(q) || r.reserved < q {
                    return Err(DomainError::integrity(format!(
                        "{}: cannot {} {q} for {correlation}, net reserved is {net}",
                        self.key,
                        command.kind.as_str()
                    )));
                }
            }
            MovementKind::Loss | MovementKind::Writeoff => {
                if r.available < q {
                    return Err(DomainError::insufficient_stock(format!(
                        "{}: cannot remove {q}, available {}",
                        self.key, r.available
                    )));
                }
            }
        }

        Ok(vec![Movement {
            sequence: self.version + 1,
            book: self.key.book,
            store: self.key.store,
            kind: command.kind,
            quantity: q,
            occurred_at: command.occurred_at,
            actor: command.actor.clone(),
            correlation: command.correlation,
            note: command.note.clone(),
        }])
    }
}
