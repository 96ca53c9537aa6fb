//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// stock availability, invariants, conflicts). Every rejected cart or ledger
/// operation surfaces exactly one of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Quantity or range violation (malformed input).
    #[error("validation failed: {0}")]
    Validation(String),

    /// The ledger cannot satisfy a reserve (or a loss/write-off).
    #[error("insufficient stock: {0}")]
    InsufficientStock(String),

    /// No candidate store qualifies for an allocation.
    #[error("no stock available: {0}")]
    NoStockAvailable(String),

    /// The owner already holds an active reservation for the book.
    #[error("duplicate reservation: {0}")]
    DuplicateReservation(String),

    /// A per-cart (or per-owner) policy limit was hit.
    #[error("capacity exceeded: {0}")]
    CapacityExceeded(String),

    /// The reservation's TTL elapsed before it could be confirmed.
    #[error("reservation expired: {0}")]
    ReservationExpired(String),

    /// Ledger and reservation state disagree; needs manual reconciliation.
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),

    /// A requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// A concurrent writer won (stale version / illegal state transition).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn insufficient_stock(msg: impl Into<String>) -> Self {
        Self::InsufficientStock(msg.into())
    }

    pub fn no_stock_available(msg: impl Into<String>) -> Self {
        Self::NoStockAvailable(msg.into())
    }

    pub fn duplicate_reservation(msg: impl Into<String>) -> Self {
        Self::DuplicateReservation(msg.into())
    }

    pub fn capacity_exceeded(msg: impl Into<String>) -> Self {
        Self::CapacityExceeded(msg.into())
    }

    pub fn reservation_expired(msg: impl Into<String>) -> Self {
        Self::ReservationExpired(msg.into())
    }

    pub fn integrity(msg: impl Into<String>) -> Self {
        Self::IntegrityViolation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    /// Stable, machine-readable error code (for logs and admin tooling).
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation(_) => "validation_error",
            DomainError::InsufficientStock(_) => "insufficient_stock",
            DomainError::NoStockAvailable(_) => "no_stock_available",
            DomainError::DuplicateReservation(_) => "duplicate_reservation",
            DomainError::CapacityExceeded(_) => "capacity_exceeded",
            DomainError::ReservationExpired(_) => "reservation_expired",
            DomainError::IntegrityViolation(_) => "integrity_violation",
            DomainError::NotFound(_) => "not_found",
            DomainError::Conflict(_) => "conflict",
            DomainError::InvalidId(_) => "invalid_id",
        }
    }
}
