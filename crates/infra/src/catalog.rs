//! Catalog collaborator: book existence, active flag, current price.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use bindery_core::{BookId, DomainError, DomainResult, Money};

/// What the engine needs to know about a book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub book: BookId,
    pub title: String,
    pub active: bool,
    /// `None` while the book has no sellable price.
    pub price: Option<Money>,
}

/// Read-only view of the catalog.
pub trait Catalog: Send + Sync {
    fn entry(&self, book: BookId) -> Option<CatalogEntry>;

    /// Book must exist and be active to be reserved.
    fn ensure_sellable(&self, book: BookId) -> DomainResult<CatalogEntry> {
        let entry = self
            .entry(book)
            .ok_or_else(|| DomainError::not_found(format!("book {book}")))?;
        if !entry.active {
            return Err(DomainError::validation(format!("book {book} is not active")));
        }
        Ok(entry)
    }

    /// Price snapshot for a cart line.
    fn price_snapshot(&self, book: BookId) -> DomainResult<Money> {
        self.entry(book)
            .and_then(|e| e.price)
            .ok_or_else(|| DomainError::validation(format!("book {book} has no current price")))
    }
}

impl<C> Catalog for Arc<C>
where
    C: Catalog + ?Sized,
{
    fn entry(&self, book: BookId) -> Option<CatalogEntry> {
        (**self).entry(book)
    }
}

/// In-memory catalog for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryCatalog {
    inner: RwLock<HashMap<BookId, CatalogEntry>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active, priced book; returns its id.
    pub fn add_book(&self, title: impl Into<String>, price: Money) -> BookId {
        let book = BookId::new();
        self.upsert(CatalogEntry {
            book,
            title: title.into(),
            active: true,
            price: Some(price),
        });
        book
    }

    pub fn upsert(&self, entry: CatalogEntry) {
        if let Ok(mut map) = self.inner.write() {
            map.insert(entry.book, entry);
        }
    }

    pub fn set_active(&self, book: BookId, active: bool) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(e) = map.get_mut(&book) {
                e.active = active;
            }
        }
    }

    pub fn set_price(&self, book: BookId, price: Option<Money>) {
        if let Ok(mut map) = self.inner.write() {
            if let Some(e) = map.get_mut(&book) {
                e.price = price;
            }
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn entry(&self, book: BookId) -> Option<CatalogEntry> {
        let map = self.inner.read().ok()?;
        map.get(&book).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_inactive_and_unpriced_books() {
        let catalog = InMemoryCatalog::new();
        assert!(matches!(
            catalog.ensure_sellable(BookId::new()),
            Err(DomainError::NotFound(_))
        ));

        let book = catalog.add_book("The Name of the Rose", Money::from_minor(1_499));
        assert_eq!(catalog.price_snapshot(book).unwrap(), Money::from_minor(1_499));

        catalog.set_price(book, None);
        assert!(matches!(catalog.price_snapshot(book), Err(DomainError::Validation(_))));

        catalog.set_active(book, false);
        assert!(matches!(
            catalog.ensure_sellable(book),
            Err(DomainError::Validation(_))
        ));
    }
}
