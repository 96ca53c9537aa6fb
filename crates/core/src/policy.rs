//! Shopping-policy limits shared by the reservation and cart domains.

use chrono::Duration;

use crate::error::{DomainError, DomainResult};

/// Externally configurable policy constants.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Per-book-per-cart quantity cap.
    pub max_quantity_per_book: u32,
    /// Distinct books a cart (and an owner's active reservations) may hold.
    pub max_distinct_books: usize,
    /// Lifetime of an unconfirmed reservation.
    pub reservation_ttl: Duration,
    /// Idle time after which an active cart is abandoned.
    pub cart_inactivity: Duration,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            max_quantity_per_book: 3,
            max_distinct_books: 5,
            reservation_ttl: Duration::hours(24),
            cart_inactivity: Duration::hours(72),
        }
    }
}

impl Policy {
    /// Reject policies that would make every operation fail.
    pub fn validate(&self) -> DomainResult<()> {
        if self.max_quantity_per_book == 0 {
            return Err(DomainError::validation("max_quantity_per_book must be positive"));
        }
        if self.max_distinct_books == 0 {
            return Err(DomainError::validation("max_distinct_books must be positive"));
        }
        if self.reservation_ttl <= Duration::zero() {
            return Err(DomainError::validation("reservation_ttl must be positive"));
        }
        if self.cart_inactivity <= Duration::zero() {
            return Err(DomainError::validation("cart_inactivity must be positive"));
        }
        Ok(())
    }

    /// Quantity of a held/carted line: `1..=max_quantity_per_book`.
    pub fn check_quantity(&self, quantity: u32) -> DomainResult<()> {
        if quantity == 0 || quantity > self.max_quantity_per_book {
            return Err(DomainError::validation(format!(
                "quantity must be between 1 and {} (got {quantity})",
                self.max_quantity_per_book
            )));
        }
        Ok(())
    }

    /// Target quantity of an adjustment: `0..=max_quantity_per_book` (0 removes).
    pub fn check_target_quantity(&self, quantity: u32) -> DomainResult<()> {
        if quantity > self.max_quantity_per_book {
            return Err(DomainError::validation(format!(
                "quantity must be between 0 and {} (got {quantity})",
                self.max_quantity_per_book
            )));
        }
        Ok(())
    }
}
