use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bindery_carts::{Cart, CartState};
use bindery_core::{
    AggregateRoot, CartId, DomainError, DomainResult, ExpectedVersion, ShopperId,
};

pub trait CartRepository: Send + Sync {
    fn get(&self, id: CartId) -> Option<Cart>;

    fn save(&self, cart: &Cart, expected: ExpectedVersion) -> DomainResult<()>;

    /// The shopper's non-terminal cart, if any.
    fn open_for_owner(&self, owner: ShopperId) -> Option<Cart>;

    /// Every cart in the `Active` state.
    fn list_active(&self) -> Vec<Cart>;
}

impl<R> CartRepository for Arc<R>
where
    R: CartRepository + ?Sized,
{
    fn get(&self, id: CartId) -> Option<Cart> {
        (**self).get(id)
    }

    fn save(&self, cart: &Cart, expected: ExpectedVersion) -> DomainResult<()> {
        (**self).save(cart, expected)
    }

    fn open_for_owner(&self, owner: ShopperId) -> Option<Cart> {
        (**self).open_for_owner(owner)
    }

    fn list_active(&self) -> Vec<Cart> {
        (**self).list_active()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryCartRepository {
    inner: RwLock<HashMap<CartId, Cart>>,
}

impl InMemoryCartRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CartRepository for InMemoryCartRepository {
    fn get(&self, id: CartId) -> Option<Cart> {
        let map = self.inner.read().ok()?;
        map.get(&id).cloned()
    }

    fn save(&self, cart: &Cart, expected: ExpectedVersion) -> DomainResult<()> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| DomainError::integrity("cart store lock poisoned"))?;
        let current = map.get(cart.id()).map(|c| c.version()).unwrap_or(0);
        expected.check(current)?;
        map.insert(cart.id_typed(), cart.clone());
        Ok(())
    }

    fn open_for_owner(&self, owner: ShopperId) -> Option<Cart> {
        let map = self.inner.read().ok()?;
        map.values()
            .find(|c| c.owner() == Some(owner) && !c.state().is_terminal())
            .cloned()
    }

    fn list_active(&self) -> Vec<Cart> {
        match self.inner.read() {
            Ok(map) => map
                .values()
                .filter(|c| c.exists() && c.state() == CartState::Active)
                .cloned()
                .collect(),
            Err(_) => vec![],
        }
    }
}
