use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use bindery_core::{
    Aggregate, AggregateRoot, BookId, CartId, DomainError, DomainResult, Money, Policy,
    ReservationId, ShopperId,
};
use bindery_events::Event;

/// Cart lifecycle: `Active → InCheckout → Converted`, `Active → Abandoned`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CartState {
    Active,
    InCheckout,
    Abandoned,
    Converted,
}

impl CartState {
    pub fn is_terminal(self) -> bool {
        matches!(self, CartState::Abandoned | CartState::Converted)
    }
}

/// Per-cart shopping limits (snapshot of the configured policy).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLimits {
    pub max_quantity_per_book: u32,
    pub max_distinct_books: usize,
}

impl From<&Policy> for CartLimits {
    fn from(policy: &Policy) -> Self {
        Self {
            max_quantity_per_book: policy.max_quantity_per_book,
            max_distinct_books: policy.max_distinct_books,
        }
    }
}

impl Default for CartLimits {
    fn default() -> Self {
        Self::from(&Policy::default())
    }
}

/// One book in a cart, backed 1:1 by an active reservation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartItem {
    pub book: BookId,
    pub quantity: u32,
    /// Price snapshot taken when the book was first added.
    pub unit_price: Money,
    pub reservation: ReservationId,
}

impl CartItem {
    pub fn subtotal(&self) -> Money {
        Money::from_minor(self.unit_price.minor().saturating_mul(u64::from(self.quantity)))
    }
}

/// Derived cart figures. Never accepted as input.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartTotals {
    pub distinct_books: usize,
    pub item_count: u32,
    pub total: Money,
}

/// Aggregate root: Cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cart {
    id: CartId,
    owner: Option<ShopperId>,
    limits: CartLimits,
    state: CartState,
    items: Vec<CartItem>,
    last_activity: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Cart {
    /// Create an empty, not-yet-opened aggregate instance.
    pub fn empty(id: CartId, limits: CartLimits) -> Self {
        Self {
            id,
            owner: None,
            limits,
            state: CartState::Active,
            items: Vec::new(),
            last_activity: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> CartId {
        self.id
    }

    pub fn exists(&self) -> bool {
        self.created
    }

    pub fn owner(&self) -> Option<ShopperId> {
        self.owner
    }

    pub fn state(&self) -> CartState {
        self.state
    }

    pub fn limits(&self) -> CartLimits {
        self.limits
    }

    pub fn items(&self) -> &[CartItem] {
        &self.items
    }

    pub fn item(&self, book: BookId) -> Option<&CartItem> {
        self.items.iter().find(|i| i.book == book)
    }

    pub fn last_activity(&self) -> Option<DateTime<Utc>> {
        self.last_activity
    }

    /// Totals recomputed from the current items.
    pub fn totals(&self) -> CartTotals {
        CartTotals {
            distinct_books: self.items.len(),
            item_count: self.items.iter().map(|i| i.quantity).sum(),
            total: Money::from_minor(self.items.iter().map(|i| i.subtotal().minor()).sum()),
        }
    }

    /// Quantity the item for `book` would have after adding `quantity`.
    ///
    /// Side-effect free; lets callers validate before placing any hold.
    pub fn quantity_after_add(&self, book: BookId, quantity: u32) -> DomainResult<u32> {
        self.ensure_open()?;
        self.ensure_quantity(quantity)?;

        match self.item(book) {
            Some(existing) => {
                let merged = existing.quantity.saturating_add(quantity);
                if merged > self.limits.max_quantity_per_book {
                    return Err(DomainError::validation(format!(
                        "book {book} would have {merged} unit(s), limit is {}",
                        self.limits.max_quantity_per_book
                    )));
                }
                Ok(merged)
            }
            None => {
                if self.items.len() >= self.limits.max_distinct_books {
                    return Err(DomainError::capacity_exceeded(format!(
                        "cart already holds {} distinct books",
                        self.items.len()
                    )));
                }
                Ok(quantity)
            }
        }
    }

    fn ensure_open(&self) -> DomainResult<()> {
        if !self.created {
            return Err(DomainError::not_found(format!("cart {}", self.id)));
        }
        if self.state != CartState::Active {
            return Err(DomainError::conflict(format!(
                "cart {} is {:?}, not active",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn ensure_quantity(&self, quantity: u32) -> DomainResult<()> {
        if quantity == 0 || quantity > self.limits.max_quantity_per_book {
            return Err(DomainError::validation(format!(
                "quantity must be between 1 and {} (got {quantity})",
                self.limits.max_quantity_per_book
            )));
        }
        Ok(())
    }

    fn ensure_cart_id(&self, cart_id: CartId) -> DomainResult<()> {
        if self.id != cart_id {
            return Err(DomainError::integrity("cart_id mismatch"));
        }
        Ok(())
    }

    fn existing_item(&self, book: BookId) -> DomainResult<&CartItem> {
        self.item(book)
            .ok_or_else(|| DomainError::not_found(format!("book {book} is not in cart {}", self.id)))
    }
}

impl AggregateRoot for Cart {
    type Id = CartId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: AddItem (merges into an existing line for the same book).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub cart_id: CartId,
    pub book: BookId,
    pub quantity: u32,
    pub unit_price: Money,
    pub reservation: ReservationId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ChangeQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeQuantity {
    pub cart_id: CartId,
    pub book: BookId,
    pub quantity: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub cart_id: CartId,
    pub book: BookId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartCommand {
    Open {
        cart_id: CartId,
        owner: ShopperId,
        occurred_at: DateTime<Utc>,
    },
    AddItem(AddItem),
    ChangeQuantity(ChangeQuantity),
    RemoveItem(RemoveItem),
    Clear {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    BeginCheckout {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    AbortCheckout {
        cart_id: CartId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    Convert {
        cart_id: CartId,
        payment_reference: String,
        occurred_at: DateTime<Utc>,
    },
    Abandon {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CartEvent {
    CartOpened {
        cart_id: CartId,
        owner: ShopperId,
        occurred_at: DateTime<Utc>,
    },
    ItemAdded {
        cart_id: CartId,
        item: CartItem,
        occurred_at: DateTime<Utc>,
    },
    ItemQuantityChanged {
        cart_id: CartId,
        book: BookId,
        from: u32,
        to: u32,
        occurred_at: DateTime<Utc>,
    },
    ItemRemoved {
        cart_id: CartId,
        book: BookId,
        reservation: ReservationId,
        occurred_at: DateTime<Utc>,
    },
    CheckoutStarted {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
    CheckoutAborted {
        cart_id: CartId,
        reason: String,
        occurred_at: DateTime<Utc>,
    },
    CartConverted {
        cart_id: CartId,
        payment_reference: String,
        occurred_at: DateTime<Utc>,
    },
    CartAbandoned {
        cart_id: CartId,
        occurred_at: DateTime<Utc>,
    },
}

impl Event for CartEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CartEvent::CartOpened { .. } => "carts.cart.opened",
            CartEvent::ItemAdded { .. } => "carts.cart.item_added",
            CartEvent::ItemQuantityChanged { .. } => "carts.cart.item_quantity_changed",
            CartEvent::ItemRemoved { .. } => "carts.cart.item_removed",
            CartEvent::CheckoutStarted { .. } => "carts.cart.checkout_started",
            CartEvent::CheckoutAborted { .. } => "carts.cart.checkout_aborted",
            CartEvent::CartConverted { .. } => "carts.cart.converted",
            CartEvent::CartAbandoned { .. } => "carts.cart.abandoned",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            CartEvent::CartOpened { occurred_at, .. }
            | CartEvent::ItemAdded { occurred_at, .. }
            | CartEvent::ItemQuantityChanged { occurred_at, .. }
            | CartEvent::ItemRemoved { occurred_at, .. }
            | CartEvent::CheckoutStarted { occurred_at, .. }
            | CartEvent::CheckoutAborted { occurred_at, .. }
            | CartEvent::CartConverted { occurred_at, .. }
            | CartEvent::CartAbandoned { occurred_at, .. } => *occurred_at,
        }
    }
}

impl Aggregate for Cart {
    type Command = CartCommand;
    type Event = CartEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CartEvent::CartOpened { cart_id, owner, .. } => {
                self.id = *cart_id;
                self.owner = Some(*owner);
                self.state = CartState::Active;
                self.items.clear();
                self.created = true;
            }
            CartEvent::ItemAdded { item, .. } => {
                self.items.push(item.clone());
            }
            CartEvent::ItemQuantityChanged { book, to, .. } => {
                if let Some(item) = self.items.iter_mut().find(|i| i.book == *book) {
                    item.quantity = *to;
                }
            }
            CartEvent::ItemRemoved { book, .. } => {
                self.items.retain(|i| i.book != *book);
            }
            CartEvent::CheckoutStarted { .. } => {
                self.state = CartState::InCheckout;
            }
            CartEvent::CheckoutAborted { .. } => {
                self.state = CartState::Active;
            }
            CartEvent::CartConverted { .. } => {
                self.state = CartState::Converted;
            }
            CartEvent::CartAbandoned { .. } => {
                self.state = CartState::Abandoned;
            }
        }

        self.last_activity = Some(event.occurred_at());

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CartCommand::Open {
                cart_id,
                owner,
                occurred_at,
            } => {
                if self.created {
                    return Err(DomainError::conflict("cart already exists"));
                }
                Ok(vec![CartEvent::CartOpened {
                    cart_id: *cart_id,
                    owner: *owner,
                    occurred_at: *occurred_at,
                }])
            }
            CartCommand::AddItem(cmd) => self.handle_add(cmd),
            CartCommand::ChangeQuantity(cmd) => self.handle_change(cmd),
            CartCommand::RemoveItem(cmd) => {
                self.ensure_open()?;
                self.ensure_cart_id(cmd.cart_id)?;
                let item = self.existing_item(cmd.book)?;
                Ok(vec![CartEvent::ItemRemoved {
                    cart_id: cmd.cart_id,
                    book: cmd.book,
                    reservation: item.reservation,
                    occurred_at: cmd.occurred_at,
                }])
            }
            CartCommand::Clear {
                cart_id,
                occurred_at,
            } => {
                self.ensure_open()?;
                self.ensure_cart_id(*cart_id)?;
                Ok(self
                    .items
                    .iter()
                    .map(|i| CartEvent::ItemRemoved {
                        cart_id: *cart_id,
                        book: i.book,
                        reservation: i.reservation,
                        occurred_at: *occurred_at,
                    })
                    .collect())
            }
            CartCommand::BeginCheckout {
                cart_id,
                occurred_at,
            } => {
                self.ensure_open()?;
                self.ensure_cart_id(*cart_id)?;
                if self.items.is_empty() {
                    return Err(DomainError::validation("cannot check out an empty cart"));
                }
                Ok(vec![CartEvent::CheckoutStarted {
                    cart_id: *cart_id,
                    occurred_at: *occurred_at,
                }])
            }
            CartCommand::AbortCheckout {
                cart_id,
                reason,
                occurred_at,
            } => {
                self.ensure_cart_id(*cart_id)?;
                if self.state != CartState::InCheckout {
                    return Err(DomainError::conflict("cart is not in checkout"));
                }
                Ok(vec![CartEvent::CheckoutAborted {
                    cart_id: *cart_id,
                    reason: reason.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            CartCommand::Convert {
                cart_id,
                payment_reference,
                occurred_at,
            } => {
                self.ensure_cart_id(*cart_id)?;
                if self.state != CartState::InCheckout {
                    return Err(DomainError::conflict("only carts in checkout can convert"));
                }
                Ok(vec![CartEvent::CartConverted {
                    cart_id: *cart_id,
                    payment_reference: payment_reference.clone(),
                    occurred_at: *occurred_at,
                }])
            }
            CartCommand::Abandon {
                cart_id,
                occurred_at,
            } => {
                self.ensure_open()?;
                self.ensure_cart_id(*cart_id)?;
                Ok(vec![CartEvent::CartAbandoned {
                    cart_id: *cart_id,
                    occurred_at: *occurred_at,
                }])
            }
        }
    }
}

impl Cart {
    fn handle_add(&self, cmd: &AddItem) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_cart_id(cmd.cart_id)?;
        let merged = self.quantity_after_add(cmd.book, cmd.quantity)?;

        match self.item(cmd.book) {
            Some(existing) => {
                if existing.reservation != cmd.reservation {
                    return Err(DomainError::integrity(format!(
                        "book {} is held by reservation {}, not {}",
                        cmd.book, existing.reservation, cmd.reservation
                    )));
                }
                Ok(vec![CartEvent::ItemQuantityChanged {
                    cart_id: cmd.cart_id,
                    book: cmd.book,
                    from: existing.quantity,
                    to: merged,
                    occurred_at: cmd.occurred_at,
                }])
            }
            None => Ok(vec![CartEvent::ItemAdded {
                cart_id: cmd.cart_id,
                item: CartItem {
                    book: cmd.book,
                    quantity: cmd.quantity,
                    unit_price: cmd.unit_price,
                    reservation: cmd.reservation,
                },
                occurred_at: cmd.occurred_at,
            }]),
        }
    }

    fn handle_change(&self, cmd: &ChangeQuantity) -> Result<Vec<CartEvent>, DomainError> {
        self.ensure_open()?;
        self.ensure_cart_id(cmd.cart_id)?;
        self.ensure_quantity(cmd.quantity)?;
        let item = self.existing_item(cmd.book)?;

        if item.quantity == cmd.quantity {
            return Ok(vec![]);
        }

        Ok(vec![CartEvent::ItemQuantityChanged {
            cart_id: cmd.cart_id,
            book: cmd.book,
            from: item.quantity,
            to: cmd.quantity,
            occurred_at: cmd.occurred_at,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn open_cart() -> Cart {
        let id = CartId::new();
        let mut cart = Cart::empty(id, CartLimits::default());
        cart.execute(&CartCommand::Open {
            cart_id: id,
            owner: ShopperId::new(),
            occurred_at: test_time(),
        })
        .unwrap();
        cart
    }

    fn add(cart: &mut Cart, book: BookId, quantity: u32, price: u64) -> DomainResult<Vec<CartEvent>> {
        let reservation = cart
            .item(book)
            .map(|i| i.reservation)
            .unwrap_or_else(ReservationId::new);
        cart.execute(&CartCommand::AddItem(AddItem {
            cart_id: cart.id_typed(),
            book,
            quantity,
            unit_price: Money::from_minor(price),
            reservation,
            occurred_at: test_time(),
        }))
    }

    #[test]
    fn totals_are_derived_from_items() {
        let mut cart = open_cart();
        add(&mut cart, BookId::new(), 2, 1_250).unwrap();
        add(&mut cart, BookId::new(), 1, 999).unwrap();

        let totals = cart.totals();
        assert_eq!(totals.distinct_books, 2);
        assert_eq!(totals.item_count, 3);
        assert_eq!(totals.total, Money::from_minor(3_499));
    }

    #[test]
    fn adding_existing_book_merges_quantities() {
        let mut cart = open_cart();
        let book = BookId::new();
        add(&mut cart, book, 2, 500).unwrap();

        let events = add(&mut cart, book, 1, 500).unwrap();
        assert!(matches!(
            events[0],
            CartEvent::ItemQuantityChanged { from: 2, to: 3, .. }
        ));
        assert_eq!(cart.items().len(), 1);

        let err = add(&mut cart, book, 1, 500).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(cart.item(book).unwrap().quantity, 3);
    }

    #[test]
    fn sixth_distinct_book_exceeds_capacity() {
        let mut cart = open_cart();
        for _ in 0..5 {
            add(&mut cart, BookId::new(), 1, 100).unwrap();
        }
        let before = cart.totals();

        let err = add(&mut cart, BookId::new(), 1, 100).unwrap_err();
        assert!(matches!(err, DomainError::CapacityExceeded(_)));
        assert_eq!(cart.totals(), before);
    }

    #[test]
    fn checkout_state_machine() {
        let mut cart = open_cart();
        let id = cart.id_typed();

        let err = cart
            .handle(&CartCommand::BeginCheckout {
                cart_id: id,
                occurred_at: test_time(),
            })
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        add(&mut cart, BookId::new(), 1, 100).unwrap();
        cart.execute(&CartCommand::BeginCheckout {
            cart_id: id,
            occurred_at: test_time(),
        })
        .unwrap();
        assert_eq!(cart.state(), CartState::InCheckout);

        // Items are frozen during checkout.
        assert!(add(&mut cart, BookId::new(), 1, 100).is_err());

        cart.execute(&CartCommand::Convert {
            cart_id: id,
            payment_reference: "pay_123".to_string(),
            occurred_at: test_time(),
        })
        .unwrap();
        assert_eq!(cart.state(), CartState::Converted);
        assert!(cart.state().is_terminal());
    }

    #[test]
    fn clear_removes_every_item() {
        let mut cart = open_cart();
        add(&mut cart, BookId::new(), 1, 100).unwrap();
        add(&mut cart, BookId::new(), 2, 100).unwrap();

        let events = cart
            .execute(&CartCommand::Clear {
                cart_id: cart.id_typed(),
                occurred_at: test_time(),
            })
            .unwrap();
        assert_eq!(events.len(), 2);
        assert!(cart.items().is_empty());
        assert_eq!(cart.totals(), CartTotals::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 128,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of adds breaks the distinct-book or
        /// per-book quantity limits.
        #[test]
        fn limits_hold_for_any_add_sequence(
            adds in proptest::collection::vec((0usize..8, 0u32..5), 1..40)
        ) {
            let books: Vec<BookId> = (0..8).map(|_| BookId::new()).collect();
            let mut cart = open_cart();

            for (b, q) in adds {
                let _ = add(&mut cart, books[b], q, 100);
                prop_assert!(cart.items().len() <= 5);
                for item in cart.items() {
                    prop_assert!((1..=3).contains(&item.quantity));
                }
            }
        }
    }
}
