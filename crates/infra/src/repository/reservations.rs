use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use bindery_core::{
    AggregateRoot, BookId, DomainError, DomainResult, ExpectedVersion, ReservationId, ShopperId,
};
use bindery_reservations::Reservation;

pub trait ReservationRepository: Send + Sync {
    fn get(&self, id: ReservationId) -> Option<Reservation>;

    /// Store `reservation` if the stored copy is still at `expected`
    /// (version 0 when absent).
    fn save(&self, reservation: &Reservation, expected: ExpectedVersion) -> DomainResult<()>;

    fn active_for_owner(&self, owner: ShopperId) -> Vec<Reservation>;

    fn active_for_book(&self, book: BookId) -> Vec<Reservation>;

    /// Active reservations whose TTL ended strictly before `now`, oldest first.
    fn due(&self, now: DateTime<Utc>) -> Vec<ReservationId>;
}

impl<R> ReservationRepository for Arc<R>
where
    R: ReservationRepository + ?Sized,
{
    fn get(&self, id: ReservationId) -> Option<Reservation> {
        (**self).get(id)
    }

    fn save(&self, reservation: &Reservation, expected: ExpectedVersion) -> DomainResult<()> {
        (**self).save(reservation, expected)
    }

    fn active_for_owner(&self, owner: ShopperId) -> Vec<Reservation> {
        (**self).active_for_owner(owner)
    }

    fn active_for_book(&self, book: BookId) -> Vec<Reservation> {
        (**self).active_for_book(book)
    }

    fn due(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        (**self).due(now)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryReservationRepository {
    inner: RwLock<HashMap<ReservationId, Reservation>>,
}

impl InMemoryReservationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn select(&self, pred: impl Fn(&Reservation) -> bool) -> Vec<Reservation> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };
        let mut out: Vec<Reservation> = map.values().filter(|r| pred(r)).cloned().collect();
        out.sort_by_key(|r| (r.created_at(), r.id_typed()));
        out
    }
}

impl ReservationRepository for InMemoryReservationRepository {
    fn get(&self, id: ReservationId) -> Option<Reservation> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn save(&self, reservation: &Reservation, expected: ExpectedVersion) -> DomainResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DomainError::integrity("reservation store lock poisoned"))?;
        let id = reservation.id_typed();
        let current = map.get(&id).map(|r| r.version()).unwrap_or(0);
        expected.check(current)?;
        map.insert(id, reservation.clone());
        Ok(())
    }

    fn active_for_owner(&self, owner: ShopperId) -> Vec<Reservation> {
        self.select(|r| r.is_active() && r.owner() == Some(owner))
    }

    fn active_for_book(&self, book: BookId) -> Vec<Reservation> {
        self.select(|r| r.is_active() && r.book() == Some(book))
    }

    fn due(&self, now: DateTime<Utc>) -> Vec<ReservationId> {
        self.select(|r| r.is_active() && r.expires_at().is_some_and(|at| at < now))
            .iter()
            .map(Reservation::id_typed)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bindery_core::{Aggregate, StoreId};
    use bindery_reservations::{CreateReservation, ReservationCommand};
    use chrono::Duration;

    fn created(now: DateTime<Utc>, ttl: Duration) -> Reservation {
        let id = ReservationId::new();
        let mut r = Reservation::empty(id);
        r.execute(&ReservationCommand::Create(CreateReservation {
            reservation_id: id,
            owner: ShopperId::new(),
            book: BookId::new(),
            store: StoreId::new(),
            quantity: 1,
            expires_at: now + ttl,
            occurred_at: now,
        }))
        .unwrap();
        r
    }

    #[test]
    fn stale_writer_gets_conflict() {
        let repo = InMemoryReservationRepository::new();
        let r = created(Utc::now(), Duration::hours(24));
        repo.save(&r, ExpectedVersion::Exact(0)).unwrap();

        let err = repo.save(&r, ExpectedVersion::Exact(0)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
        assert!(repo.save(&r, ExpectedVersion::Exact(1)).is_ok());
    }

    #[test]
    fn due_is_strictly_past_expiry() {
        let repo = InMemoryReservationRepository::new();
        let now = Utc::now();
        let r = created(now, Duration::hours(24));
        repo.save(&r, ExpectedVersion::Any).unwrap();

        assert!(repo.due(now + Duration::hours(24)).is_empty());
        assert_eq!(
            repo.due(now + Duration::hours(24) + Duration::seconds(1)),
            vec![r.id_typed()]
        );
    }
}
