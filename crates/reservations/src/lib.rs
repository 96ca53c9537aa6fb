//! Reservation domain module (event-sourced).
//!
//! A reservation is a time-boxed hold on physical stock. This crate holds
//! its state machine only; the matching ledger movements are issued by the
//! reservation manager in `bindery-infra`.

pub mod reservation;

pub use reservation::{
    AdjustQuantity, CancelReservation, ConfirmReservation, CreateReservation, ExpireReservation,
    QuantityAdjusted, Reservation, ReservationCancelled, ReservationCommand, ReservationConfirmed,
    ReservationCreated, ReservationEvent, ReservationExpired, ReservationState,
};
