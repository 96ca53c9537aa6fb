//! Cart domain module (event-sourced).
//!
//! Pure shopper-facing cart state: items with price snapshots, derived
//! totals, shopping-policy limits and the checkout state machine. Holding
//! stock is the reservation manager's job; the orchestrator in
//! `bindery-infra` keeps both in step.

pub mod cart;

pub use cart::{
    AddItem, Cart, CartCommand, CartEvent, CartItem, CartLimits, CartState, CartTotals,
    ChangeQuantity, RemoveItem,
};
