// ============================================================================
// Transaction Change Tracking
// ============================================================================

use crate::core::Row;

/// A single reversible write recorded inside a transaction
///
/// Each variant carries what is needed to undo it:
/// - inserts remember the slot they filled
/// - updates and deletes remember the previous row image
#[derive(Debug, Clone)]
pub enum Change {
    InsertRow {
        table: String,
        row_id: usize,
    },

    UpdateRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },

    DeleteRow {
        table: String,
        row_id: usize,
        old_row: Row,
    },
}

impl Change {
    /// Get the table name affected by this change
    pub fn table_name(&self) -> &str {
        match self {
            Change::InsertRow { table, .. } => table,
            Change::UpdateRow { table, .. } => table,
            Change::DeleteRow { table, .. } => table,
        }
    }

    pub fn row_id(&self) -> usize {
        match self {
            Change::InsertRow { row_id, .. }
            | Change::UpdateRow { row_id, .. }
            | Change::DeleteRow { row_id, .. } => *row_id,
        }
    }
}
