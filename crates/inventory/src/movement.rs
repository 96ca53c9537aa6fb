use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bindery_core::{Actor, BookId, ReservationId, StoreId};
use bindery_events::Event;

/// What a movement did to a stock record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Physical units received by the store: `total += q`, `available += q`.
    Inbound,
    /// Hold placed: `available -= q`, `reserved += q`.
    Reservation,
    /// Hold returned: `reserved -= q`, `available += q`.
    Release,
    /// Held units sold: `reserved -= q`, `total -= q`.
    Sale,
    /// Sold units came back: `total += q`, `available += q`.
    Return,
    /// Units lost (theft, misplacement): `total -= q`, `available -= q`.
    Loss,
    /// Units written off (damage): `total -= q`, `available -= q`.
    Writeoff,
}

impl MovementKind {
    /// Kinds that must be attributed to a reservation.
    pub fn requires_correlation(self) -> bool {
        matches!(
            self,
            MovementKind::Reservation | MovementKind::Release | MovementKind::Sale
        )
    }

    /// Signed contribution of this kind to a correlation's net reserved quantity.
    ///
    /// A sale consumes the hold it was committed against.
    pub fn reserved_sign(self) -> i64 {
        match self {
            MovementKind::Reservation => 1,
            MovementKind::Release | MovementKind::Sale => -1,
            _ => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Inbound => "inbound",
            MovementKind::Reservation => "reservation",
            MovementKind::Release => "release",
            MovementKind::Sale => "sale",
            MovementKind::Return => "return",
            MovementKind::Loss => "loss",
            MovementKind::Writeoff => "writeoff",
        }
    }
}

/// Immutable, append-only entry recording one change to a stock record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    /// Position in the (book, store) movement stream, starting at 1.
    pub sequence: u64,
    pub book: BookId,
    pub store: StoreId,
    pub kind: MovementKind,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
    pub actor: Actor,
    pub correlation: Option<ReservationId>,
    pub note: Option<String>,
}

impl Movement {
    /// Signed effect on the correlation's net reserved quantity.
    pub fn reserved_delta(&self) -> i64 {
        self.kind.reserved_sign() * i64::from(self.quantity)
    }
}

impl Event for Movement {
    fn event_type(&self) -> &'static str {
        match self.kind {
            MovementKind::Inbound => "ledger.movement.inbound",
            MovementKind::Reservation => "ledger.movement.reservation",
            MovementKind::Release => "ledger.movement.release",
            MovementKind::Sale => "ledger.movement.sale",
            MovementKind::Return => "ledger.movement.return",
            MovementKind::Loss => "ledger.movement.loss",
            MovementKind::Writeoff => "ledger.movement.writeoff",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        self.occurred_at
    }
}

/// Net reserved quantity for one correlation, folded from the log.
pub fn net_reserved_for<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
    correlation: ReservationId,
) -> i64 {
    movements
        .into_iter()
        .filter(|m| m.correlation == Some(correlation))
        .map(Movement::reserved_delta)
        .sum()
}

/// Net reserved quantity for every correlation touching the log.
pub fn net_reserved_by_correlation<'a>(
    movements: impl IntoIterator<Item = &'a Movement>,
) -> BTreeMap<ReservationId, i64> {
    let mut net = BTreeMap::new();
    for m in movements {
        if let Some(c) = m.correlation {
            *net.entry(c).or_insert(0) += m.reserved_delta();
        }
    }
    net
}
