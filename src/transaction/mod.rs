// ============================================================================
// Transaction Module
// ============================================================================
//
// Single-connection transactions for the in-memory store.
//
// Writes are applied to tables immediately and recorded as reversible
// `Change` entries (Command Pattern). COMMIT forgets the log, ROLLBACK
// replays it newest-first.
//
// ============================================================================

pub mod change;
pub mod state;

pub use change::Change;
pub use state::{Transaction, TransactionId, TransactionState};
