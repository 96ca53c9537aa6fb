//! Saga-style compensation for multi-step reservation and cart operations.
//!
//! A ledger hold, a reservation save and a cart save are separate writes.
//! Each completed step records how to undo itself; if a later step fails
//! the recorded steps run in reverse order before the error surfaces.

use tracing::{error, warn};

use bindery_core::{DomainError, DomainResult};

type Undo<'a> = Box<dyn FnOnce() -> DomainResult<()> + 'a>;

/// Ordered list of compensating actions for one operation.
#[must_use = "call `complete` or `fail` to resolve the compensation log"]
pub struct Compensation<'a> {
    operation: &'static str,
    steps: Vec<(&'static str, Undo<'a>)>,
}

impl core::fmt::Debug for Compensation<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let steps: Vec<_> = self.steps.iter().map(|(name, _)| *name).collect();
        f.debug_struct("Compensation")
            .field("operation", &self.operation)
            .field("steps", &steps)
            .finish()
    }
}

impl<'a> Compensation<'a> {
    pub fn new(operation: &'static str) -> Self {
        Self {
            operation,
            steps: Vec::new(),
        }
    }

    /// Record the undo action of a step that just succeeded.
    pub fn record(&mut self, step: &'static str, undo: impl FnOnce() -> DomainResult<()> + 'a) {
        self.steps.push((step, Box::new(undo)));
    }

    /// Every step succeeded; drop the undo actions.
    pub fn complete(self) {}

    /// Undo recorded steps (newest first) and return `cause` to the caller.
    ///
    /// A failing undo is logged and does not stop the remaining ones; the
    /// state it leaves behind is picked up by reconciliation or the sweeper.
    pub fn fail(self, cause: DomainError) -> DomainError {
        warn!(
            operation = self.operation,
            steps = self.steps.len(),
            error = %cause,
            "rolling back"
        );
        for (step, undo) in self.steps.into_iter().rev() {
            if let Err(err) = undo() {
                error!(
                    operation = self.operation,
                    step,
                    error = %err,
                    "compensating action failed"
                );
            }
        }
        cause
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn undo_runs_newest_first_and_survives_failures() {
        let log = RefCell::new(Vec::new());
        let mut saga = Compensation::new("test");
        saga.record("reserve", || {
            log.borrow_mut().push("release");
            Ok(())
        });
        saga.record("save", || {
            log.borrow_mut().push("unsave");
            Err(DomainError::conflict("already gone"))
        });
        assert_eq!(format!("{saga:?}"), r#"Compensation { operation: "test", steps: ["reserve", "save"] }"#);

        let err = saga.fail(DomainError::validation("no price"));
        assert!(matches!(err, DomainError::Validation(_)));
        assert_eq!(*log.borrow(), vec!["unsave", "release"]);
    }

    #[test]
    fn complete_discards_undo_actions() {
        let ran = RefCell::new(false);
        let mut saga = Compensation::new("test");
        saga.record("reserve", || {
            *ran.borrow_mut() = true;
            Ok(())
        });
        saga.complete();
        assert!(!*ran.borrow());
    }
}
