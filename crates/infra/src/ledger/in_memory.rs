use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tracing::{debug, warn};

use bindery_core::{
    Actor, Aggregate, BookId, Clock, DomainError, DomainResult, ReservationId, StoreId,
};
use bindery_inventory::{Movement, MovementKind, StockAccount, StockCommand, StockKey, StockRecord};

use super::{SaleLine, StockLedger};
use crate::publish::{LEDGER_STREAM, Publisher};

type AccountCell = Arc<Mutex<StockAccount>>;

/// In-memory ledger for tests/dev and single-process deployments.
///
/// The outer map lock is held only long enough to find (or create) a
/// record's cell; all validation and mutation happens under the cell's own
/// mutex, so unrelated (book, store) pairs proceed in parallel.
pub struct InMemoryStockLedger {
    accounts: RwLock<BTreeMap<StockKey, AccountCell>>,
    archive: Mutex<BTreeMap<StockKey, Vec<Movement>>>,
    clock: Arc<dyn Clock>,
    publisher: Publisher,
}

impl core::fmt::Debug for InMemoryStockLedger {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryStockLedger")
            .field("records", &self.keys().len())
            .field("publisher", &self.publisher)
            .finish()
    }
}

fn poisoned(what: &str) -> DomainError {
    DomainError::integrity(format!("{what} lock poisoned"))
}

impl InMemoryStockLedger {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            accounts: RwLock::new(BTreeMap::new()),
            archive: Mutex::new(BTreeMap::new()),
            clock,
            publisher: Publisher::none(),
        }
    }

    /// Publish every recorded movement through `publisher`.
    pub fn with_publisher(mut self, publisher: Publisher) -> Self {
        self.publisher = publisher;
        self
    }

    fn cell(&self, key: StockKey) -> DomainResult<Option<AccountCell>> {
        let map = self.accounts.read().map_err(|_| poisoned("ledger map"))?;
        Ok(map.get(&key).cloned())
    }

    fn existing_cell(&self, key: StockKey) -> DomainResult<AccountCell> {
        self.cell(key)?
            .ok_or_else(|| DomainError::not_found(format!("no stock record for {key}")))
    }

    fn cell_or_create(&self, key: StockKey) -> DomainResult<AccountCell> {
        if let Some(cell) = self.cell(key)? {
            return Ok(cell);
        }
        let mut map = self.accounts.write().map_err(|_| poisoned("ledger map"))?;
        Ok(map
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(StockAccount::empty(key))))
            .clone())
    }

    fn cells(&self) -> Vec<AccountCell> {
        match self.accounts.read() {
            Ok(map) => map.values().cloned().collect(),
            Err(_) => vec![],
        }
    }

    fn lock(cell: &AccountCell) -> DomainResult<MutexGuard<'_, StockAccount>> {
        cell.lock().map_err(|_| poisoned("stock record"))
    }

    fn record_movement(&self, key: StockKey, command: StockCommand) -> DomainResult<Movement> {
        let cell = if command.kind == MovementKind::Inbound {
            self.cell_or_create(key)?
        } else {
            self.existing_cell(key)?
        };

        let mut account = Self::lock(&cell)?;
        let movement = account
            .execute(&command)?
            .into_iter()
            .next()
            .ok_or_else(|| DomainError::integrity(format!("{key}: no movement recorded")))?;

        // Published under the record lock so subscribers see per-stream order.
        self.publisher
            .publish(LEDGER_STREAM, key.to_string(), movement.sequence, &movement);
        drop(account);

        debug!(
            book = %key.book,
            store = %key.store,
            kind = movement.kind.as_str(),
            quantity = movement.quantity,
            correlation = ?movement.correlation,
            "ledger movement recorded"
        );
        Ok(movement)
    }

    fn read_account<T>(&self, key: StockKey, f: impl FnOnce(&StockAccount) -> T) -> Option<T> {
        let cell = self.cell(key).ok().flatten()?;
        let account = cell.lock().ok()?;
        account.exists().then(|| f(&account))
    }
}

impl StockLedger for InMemoryStockLedger {
    fn receive(&self, key: StockKey, quantity: u32, actor: &Actor) -> DomainResult<Movement> {
        let cmd = StockCommand::receive(quantity, actor.clone(), self.clock.now());
        self.record_movement(key, cmd)
    }

    fn reserve(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::reserve(quantity, actor.clone(), correlation, self.clock.now());
        self.record_movement(key, cmd)
    }

    fn release(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::release(quantity, actor.clone(), correlation, self.clock.now());
        self.record_movement(key, cmd)
    }

    fn commit_sale(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: ReservationId,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::sale(quantity, actor.clone(), correlation, self.clock.now());
        self.record_movement(key, cmd)
    }

    fn commit_sales(&self, lines: &[SaleLine], actor: &Actor) -> DomainResult<Vec<Movement>> {
        if lines.is_empty() {
            return Ok(vec![]);
        }
        let now = self.clock.now();

        // Global lock order: StockKey.
        let keys: BTreeSet<StockKey> = lines.iter().map(|l| l.key).collect();
        let mut cells = Vec::with_capacity(keys.len());
        for key in keys {
            cells.push((key, self.existing_cell(key)?));
        }
        let mut guards = Vec::with_capacity(cells.len());
        for (key, cell) in &cells {
            guards.push((*key, Self::lock(cell)?));
        }

        // Stage every line on copies; nothing is installed unless all pass.
        let mut staged: BTreeMap<StockKey, StockAccount> = guards
            .iter()
            .map(|(key, account)| (*key, (**account).clone()))
            .collect();
        let mut movements = Vec::with_capacity(lines.len());
        for line in lines {
            let account = staged
                .get_mut(&line.key)
                .ok_or_else(|| DomainError::integrity(format!("{}: not locked", line.key)))?;
            let cmd = StockCommand::sale(line.quantity, actor.clone(), line.correlation, now);
            match account.execute(&cmd) {
                Ok(events) => movements.extend(events),
                Err(err) => {
                    warn!(
                        key = %line.key,
                        correlation = %line.correlation,
                        quantity = line.quantity,
                        error = %err,
                        "batch sale rejected; nothing committed"
                    );
                    return Err(err);
                }
            }
        }

        for (key, account) in guards.iter_mut() {
            if let Some(next) = staged.remove(key) {
                **account = next;
            }
        }
        for m in &movements {
            let key = StockKey::new(m.book, m.store);
            self.publisher
                .publish(LEDGER_STREAM, key.to_string(), m.sequence, m);
        }
        drop(guards);

        debug!(lines = lines.len(), "batch sale committed");
        Ok(movements)
    }

    fn record_return(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        correlation: Option<ReservationId>,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::return_units(quantity, actor.clone(), correlation, self.clock.now());
        self.record_movement(key, cmd)
    }

    fn record_loss(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::loss(quantity, actor.clone(), self.clock.now()).with_note(note);
        self.record_movement(key, cmd)
    }

    fn write_off(
        &self,
        key: StockKey,
        quantity: u32,
        actor: &Actor,
        note: &str,
    ) -> DomainResult<Movement> {
        let cmd = StockCommand::write_off(quantity, actor.clone(), self.clock.now()).with_note(note);
        self.record_movement(key, cmd)
    }

    fn record(&self, key: StockKey) -> Option<StockRecord> {
        self.read_account(key, StockAccount::record)
    }

    fn records_for_book(&self, book: BookId) -> Vec<(StoreId, StockRecord)> {
        let cells: Vec<AccountCell> = match self.accounts.read() {
            Ok(map) => map
                .iter()
                .filter(|(k, _)| k.book == book)
                .map(|(_, cell)| cell.clone())
                .collect(),
            Err(_) => return vec![],
        };

        cells
            .iter()
            .filter_map(|cell| {
                let account = cell.lock().ok()?;
                account
                    .exists()
                    .then(|| (account.key().store, account.record()))
            })
            .collect()
    }

    fn keys(&self) -> Vec<StockKey> {
        self.cells()
            .iter()
            .filter_map(|cell| {
                let account = cell.lock().ok()?;
                account.exists().then(|| account.key())
            })
            .collect()
    }

    fn net_reserved_for(&self, key: StockKey, correlation: ReservationId) -> DomainResult<i64> {
        let cell = self.existing_cell(key)?;
        let account = Self::lock(&cell)?;
        Ok(account.net_reserved_for(correlation))
    }

    fn movements(&self, key: StockKey) -> Vec<Movement> {
        self.read_account(key, |a| a.movements().to_vec())
            .unwrap_or_default()
    }

    fn movements_for(&self, correlation: ReservationId) -> Vec<Movement> {
        let mut out: Vec<Movement> = Vec::new();
        for cell in self.cells() {
            if let Ok(account) = cell.lock() {
                out.extend(
                    account
                        .movements()
                        .iter()
                        .filter(|m| m.correlation == Some(correlation))
                        .cloned(),
                );
            }
        }
        if let Ok(archive) = self.archive.lock() {
            out.extend(
                archive
                    .values()
                    .flatten()
                    .filter(|m| m.correlation == Some(correlation))
                    .cloned(),
            );
        }
        out.sort_by_key(|m| (m.occurred_at, m.sequence));
        out
    }

    fn archived_movements(&self, key: StockKey) -> Vec<Movement> {
        match self.archive.lock() {
            Ok(archive) => archive.get(&key).cloned().unwrap_or_default(),
            Err(_) => vec![],
        }
    }

    fn reconcile(&self, key: StockKey) -> DomainResult<()> {
        let cell = self.existing_cell(key)?;
        let account = Self::lock(&cell)?;
        account.reconcile().inspect_err(|err| {
            warn!(book = %key.book, store = %key.store, error = %err, "reconciliation failed");
        })
    }

    fn compact(&self, key: StockKey) -> DomainResult<usize> {
        let cell = self.existing_cell(key)?;
        let mut account = Self::lock(&cell)?;
        let archived = account.compact();
        let count = archived.len();
        if count > 0 {
            let mut archive = self.archive.lock().map_err(|_| poisoned("ledger archive"))?;
            archive.entry(key).or_default().extend(archived);
            debug!(book = %key.book, store = %key.store, archived = count, "ledger compacted");
        }
        Ok(count)
    }
}
