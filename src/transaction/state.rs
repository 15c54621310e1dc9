// ============================================================================
// Transaction State Management
// ============================================================================
//
// Each transaction moves through defined states: Active -> Committed/Aborted
//
// ============================================================================

use super::Change;
use crate::core::{StoreError, StoreResult};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TXN_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Generate a new unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TXN_ID.fetch_add(1, Ordering::SeqCst))
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction state
///
/// ```text
/// Active ──commit──> Committed
///   │
///   └──rollback──> Aborted
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Active,
    Committed,
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, TransactionState::Active)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::Aborted
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Active => write!(f, "ACTIVE"),
            TransactionState::Committed => write!(f, "COMMITTED"),
            TransactionState::Aborted => write!(f, "ABORTED"),
        }
    }
}

/// An open transaction and its undo log
#[derive(Debug)]
pub struct Transaction {
    id: TransactionId,
    state: TransactionState,
    changes: Vec<Change>,
    start_time: std::time::Instant,
}

impl Transaction {
    pub fn new(id: TransactionId) -> Self {
        Self {
            id,
            state: TransactionState::Active,
            changes: Vec::new(),
            start_time: std::time::Instant::now(),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn change_count(&self) -> usize {
        self.changes.len()
    }

    pub fn duration(&self) -> std::time::Duration {
        self.start_time.elapsed()
    }

    /// Record a change in this transaction
    ///
    /// # Errors
    /// Returns error if transaction is not active
    pub fn record_change(&mut self, change: Change) -> StoreResult<()> {
        if !self.state.is_active() {
            return Err(StoreError::TransactionError(format!(
                "Cannot record change: transaction {} is {}",
                self.id, self.state
            )));
        }

        self.changes.push(change);
        Ok(())
    }

    /// Mark transaction as committed and drop the undo log
    pub fn commit(&mut self) -> StoreResult<()> {
        if !self.state.is_active() {
            return Err(StoreError::TransactionError(format!(
                "Cannot commit: transaction {} is already {}",
                self.id, self.state
            )));
        }

        self.changes.clear();
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Mark transaction as aborted and hand back its changes newest-first,
    /// ready to be undone in order.
    pub fn rollback(&mut self) -> StoreResult<Vec<Change>> {
        if !self.state.is_active() {
            return Err(StoreError::TransactionError(format!(
                "Cannot rollback: transaction {} is already {}",
                self.id, self.state
            )));
        }

        let mut undo: Vec<Change> = self.changes.drain(..).collect();
        undo.reverse();
        self.state = TransactionState::Aborted;
        Ok(undo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(row_id: usize) -> Change {
        Change::InsertRow {
            table: "test".to_string(),
            row_id,
        }
    }

    #[test]
    fn test_transaction_id_generation() {
        let id1 = TransactionId::new();
        let id2 = TransactionId::new();
        assert!(id2.as_u64() > id1.as_u64());
    }

    #[test]
    fn test_transaction_lifecycle() {
        let mut txn = Transaction::new(TransactionId::new());

        assert_eq!(txn.state(), TransactionState::Active);
        assert!(!txn.state().is_terminal());

        txn.commit().unwrap();
        assert_eq!(txn.state(), TransactionState::Committed);
        assert!(txn.state().is_terminal());
    }

    #[test]
    fn test_cannot_commit_twice() {
        let mut txn = Transaction::new(TransactionId::new());

        txn.commit().unwrap();
        assert!(txn.commit().is_err());
    }

    #[test]
    fn test_rollback_returns_changes_newest_first() {
        let mut txn = Transaction::new(TransactionId::new());
        txn.record_change(insert(0)).unwrap();
        txn.record_change(insert(1)).unwrap();

        let undo = txn.rollback().unwrap();
        assert_eq!(undo.iter().map(Change::row_id).collect::<Vec<_>>(), vec![1, 0]);
        assert_eq!(txn.change_count(), 0);
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_cannot_record_change_after_commit() {
        let mut txn = Transaction::new(TransactionId::new());
        txn.commit().unwrap();
        assert!(txn.record_change(insert(0)).is_err());
    }
}
