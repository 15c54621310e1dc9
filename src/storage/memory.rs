use super::engine::{Query, Store, StoreStats};
use super::{Table, TableSchema};
use crate::core::{Record, StoreError, StoreResult};
use crate::transaction::{Change, Transaction, TransactionId};
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

#[derive(Default)]
struct StatCounters {
    selects: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
    commits: AtomicU64,
    rollbacks: AtomicU64,
}

impl StatCounters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> StoreStats {
        StoreStats {
            selects: self.selects.load(Ordering::Relaxed),
            inserts: self.inserts.load(Ordering::Relaxed),
            updates: self.updates.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            commits: self.commits.load(Ordering::Relaxed),
            rollbacks: self.rollbacks.load(Ordering::Relaxed),
        }
    }
}

/// In-memory relational store behaving as a single connection.
///
/// Writes go straight to the tables; while a transaction is open each write
/// is also recorded as a [`Change`] so ROLLBACK can undo it.
///
/// Lock order is always transaction, then tables.
pub struct MemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    transaction: Mutex<Option<Transaction>>,
    stats: StatCounters,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            transaction: Mutex::new(None),
            stats: StatCounters::default(),
        }
    }

    /// Store with the `sections` and `fields` tables already created.
    pub fn with_section_schema() -> StoreResult<Self> {
        let store = Self::new();
        for schema in super::schema::section_tables() {
            store.create_table(schema)?;
        }
        Ok(store)
    }

    pub fn create_table(&self, schema: TableSchema) -> StoreResult<()> {
        let mut tables = self.tables.write()?;
        let name = schema.name().to_string();
        if tables.contains_key(&name) {
            return Err(StoreError::TableExists(name));
        }
        tables.insert(name, Table::new(schema));
        Ok(())
    }

    pub fn table_exists(&self, name: &str) -> StoreResult<bool> {
        Ok(self.tables.read()?.contains_key(name))
    }

    pub fn stats(&self) -> StoreStats {
        self.stats.snapshot()
    }

    fn record_change(
        transaction: &mut Option<Transaction>,
        change: Change,
    ) -> StoreResult<()> {
        match transaction.as_mut() {
            Some(txn) => txn.record_change(change),
            None => Ok(()),
        }
    }

    fn undo(tables: &mut HashMap<String, Table>, change: Change) {
        let Some(table) = tables.get_mut(change.table_name()) else {
            return;
        };
        match change {
            Change::InsertRow { row_id, .. } => {
                table.delete(row_id);
            }
            Change::UpdateRow { row_id, old_row, .. } | Change::DeleteRow { row_id, old_row, .. } => {
                table.restore(row_id, old_row);
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Store for MemoryStore {
    fn select(&self, query: &Query) -> StoreResult<Vec<Record>> {
        StatCounters::bump(&self.stats.selects);
        let tables = self.tables.read()?;
        let table = tables
            .get(query.table_name())
            .ok_or_else(|| StoreError::TableNotFound(query.table_name().to_string()))?;

        Ok(table
            .scan(query.filters())?
            .into_iter()
            .map(|(_, row)| table.to_record(&row))
            .collect())
    }

    fn count(&self, table: &str) -> StoreResult<usize> {
        let tables = self.tables.read()?;
        tables
            .get(table)
            .map(Table::row_count)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))
    }

    fn insert(&self, table: &str, record: Record) -> StoreResult<Option<i64>> {
        StatCounters::bump(&self.stats.inserts);
        let mut transaction = self.transaction.lock()?;
        let mut tables = self.tables.write()?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::TableNotFound(table.to_string()))?;

        let (row_id, generated) = target.insert(record)?;
        Self::record_change(
            &mut transaction,
            Change::InsertRow {
                table: table.to_string(),
                row_id,
            },
        )?;
        Ok(generated)
    }

    fn update(&self, query: &Query, values: Record) -> StoreResult<usize> {
        StatCounters::bump(&self.stats.updates);
        let mut transaction = self.transaction.lock()?;
        let mut tables = self.tables.write()?;
        let table_name = query.table_name();
        let target = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;

        let matched = target.scan(query.filters())?;
        let mut applied = Vec::with_capacity(matched.len());
        for (row_id, _) in &matched {
            match target.update(*row_id, &values) {
                Ok(old_row) => applied.push((*row_id, old_row)),
                Err(err) => {
                    // keep multi-row updates all-or-nothing even outside a transaction
                    for (row_id, old_row) in applied.into_iter().rev() {
                        target.restore(row_id, old_row);
                    }
                    return Err(err);
                }
            }
        }

        let affected = applied.len();
        for (row_id, old_row) in applied {
            Self::record_change(
                &mut transaction,
                Change::UpdateRow {
                    table: table_name.to_string(),
                    row_id,
                    old_row,
                },
            )?;
        }
        Ok(affected)
    }

    fn delete(&self, query: &Query) -> StoreResult<usize> {
        StatCounters::bump(&self.stats.deletes);
        let mut transaction = self.transaction.lock()?;
        let mut tables = self.tables.write()?;
        let table_name = query.table_name();
        let target = tables
            .get_mut(table_name)
            .ok_or_else(|| StoreError::TableNotFound(table_name.to_string()))?;

        let matched = target.scan(query.filters())?;
        let mut affected = 0;
        for (row_id, _) in matched {
            if let Some(old_row) = target.delete(row_id) {
                affected += 1;
                Self::record_change(
                    &mut transaction,
                    Change::DeleteRow {
                        table: table_name.to_string(),
                        row_id,
                        old_row,
                    },
                )?;
            }
        }
        Ok(affected)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        let mut transaction = self.transaction.lock()?;
        if let Some(open) = transaction.as_ref() {
            return Err(StoreError::TransactionError(format!(
                "Transaction {} is already open",
                open.id()
            )));
        }
        let txn = Transaction::new(TransactionId::new());
        debug!("BEGIN {}", txn.id());
        *transaction = Some(txn);
        Ok(())
    }

    fn commit(&self) -> StoreResult<()> {
        let mut transaction = self.transaction.lock()?;
        let mut txn = transaction
            .take()
            .ok_or_else(|| StoreError::TransactionError("No open transaction to commit".into()))?;
        txn.commit()?;
        StatCounters::bump(&self.stats.commits);
        debug!("COMMIT {} after {:?}", txn.id(), txn.duration());
        Ok(())
    }

    fn rollback(&self) -> StoreResult<()> {
        let mut transaction = self.transaction.lock()?;
        let mut txn = transaction
            .take()
            .ok_or_else(|| StoreError::TransactionError("No open transaction to roll back".into()))?;
        let undo = txn.rollback()?;
        let undone = undo.len();

        let mut tables = self.tables.write()?;
        for change in undo {
            Self::undo(&mut tables, change);
        }
        StatCounters::bump(&self.stats.rollbacks);
        debug!("ROLLBACK {} ({} change(s) undone)", txn.id(), undone);
        Ok(())
    }

    /// A poisoned lock still reports the open transaction so callers go on
    /// to attempt the rollback.
    fn in_transaction(&self) -> bool {
        match self.transaction.lock() {
            Ok(txn) => txn.is_some(),
            Err(poisoned) => {
                warn!("Transaction lock poisoned: {}", poisoned);
                poisoned.into_inner().is_some()
            }
        }
    }
}
