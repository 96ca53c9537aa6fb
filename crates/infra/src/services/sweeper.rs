//! Expiration sweeper: turns stale holds back into free stock.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use crate::services::reservations::ReservationManager;
use crate::workers::{WorkerHandle, spawn_periodic};

/// Outcome of one sweep.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// Reservations selected as past their TTL.
    pub visited: usize,
    pub expired: usize,
    /// Already left `Active` (a concurrent confirm/cancel won).
    pub skipped: usize,
    pub failed: usize,
    /// Ledger movements archived after the sweep.
    pub compacted: usize,
}

#[derive(Debug)]
pub struct ExpirationSweeper {
    manager: Arc<ReservationManager>,
    compact_after_sweep: bool,
}

impl ExpirationSweeper {
    pub fn new(manager: Arc<ReservationManager>, compact_after_sweep: bool) -> Self {
        Self {
            manager,
            compact_after_sweep,
        }
    }

    /// Expire every active reservation whose TTL ended before `now`.
    ///
    /// Each reservation is handled on its own; one failure never aborts the run.
    pub fn run_once(&self, now: DateTime<Utc>) -> SweepReport {
        let due = self.manager.repository().due(now);
        let mut report = SweepReport {
            visited: due.len(),
            ..SweepReport::default()
        };

        for id in due {
            match self.manager.expire_at(id, now) {
                Ok(true) => report.expired += 1,
                Ok(false) => report.skipped += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(reservation = %id, code = err.code(), error = %err, "sweep could not expire reservation");
                }
            }
        }

        if self.compact_after_sweep {
            match self.manager.ledger().compact_all() {
                Ok(n) => report.compacted = n,
                Err(err) => warn!(error = %err, "ledger compaction after sweep failed"),
            }
        }

        info!(
            visited = report.visited,
            expired = report.expired,
            skipped = report.skipped,
            failed = report.failed,
            compacted = report.compacted,
            "expiration sweep finished"
        );
        report
    }

    /// Run `run_once` every `interval` on a background thread.
    pub fn spawn(self: Arc<Self>, interval: Duration) -> std::io::Result<SweeperHandle> {
        let worker = spawn_periodic("expiration-sweeper", interval, move || {
            let now = self.manager.now();
            self.run_once(now);
        })?;
        Ok(SweeperHandle { worker })
    }
}

/// Cancellable handle of a running sweeper.
#[derive(Debug)]
pub struct SweeperHandle {
    worker: WorkerHandle,
}

impl SweeperHandle {
    /// Stop after the current sweep (if any) and join the thread.
    pub fn shutdown(self) {
        self.worker.shutdown();
    }
}
