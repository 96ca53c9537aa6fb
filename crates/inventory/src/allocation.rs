//! Allocation: choosing which store's stock backs a reservation.

use serde::{Deserialize, Serialize};

use bindery_core::{BookId, DomainError, DomainResult, StoreId};

/// A store that carries the book, as seen at selection time.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreCandidate {
    pub store: StoreId,
    pub available: u32,
    pub active: bool,
}

/// Pick the store that fulfills a request for `quantity` units of `book`.
///
/// Only active stores with `available >= quantity` qualify. The store with
/// the most available units wins (keeps scarce stock from fragmenting);
/// equal availability is broken by the smallest `StoreId`.
pub fn select_store(
    book: BookId,
    quantity: u32,
    candidates: &[StoreCandidate],
) -> DomainResult<StoreId> {
    if quantity == 0 {
        return Err(DomainError::validation("allocation quantity must be positive"));
    }

    candidates
        .iter()
        .filter(|c| c.active && c.available >= quantity)
        .min_by(|a, b| b.available.cmp(&a.available).then(a.store.cmp(&b.store)))
        .map(|c| c.store)
        .ok_or_else(|| {
            DomainError::no_stock_available(format!(
                "no active store has {quantity} unit(s) of book {book}"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(store: StoreId, available: u32) -> StoreCandidate {
        StoreCandidate {
            store,
            available,
            active: true,
        }
    }

    #[test]
    fn picks_the_store_with_most_available() {
        let s1 = StoreId::new();
        let s2 = StoreId::new();
        let chosen = select_store(BookId::new(), 3, &[candidate(s1, 2), candidate(s2, 5)]).unwrap();
        assert_eq!(chosen, s2);
    }

    #[test]
    fn inactive_and_short_stores_never_qualify() {
        let book = BookId::new();
        let closed = StoreCandidate {
            store: StoreId::new(),
            available: 10,
            active: false,
        };
        let short = candidate(StoreId::new(), 1);

        let err = select_store(book, 2, &[closed, short]).unwrap_err();
        assert!(matches!(err, DomainError::NoStockAvailable(_)));
    }

    #[test]
    fn ties_go_to_the_smallest_store_id() {
        let a = StoreId::new();
        let b = StoreId::new();
        let (low, high) = if a < b { (a, b) } else { (b, a) };

        let chosen = select_store(BookId::new(), 1, &[candidate(high, 4), candidate(low, 4)]).unwrap();
        assert_eq!(chosen, low);
    }

    #[test]
    fn empty_candidate_list_is_no_stock() {
        let err = select_store(BookId::new(), 1, &[]).unwrap_err();
        assert!(matches!(err, DomainError::NoStockAvailable(_)));
    }
}
