use crate::core::{Record, StoreResult, Value};

/// Row filter understood by every store.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    /// Matches nothing when the list is empty.
    In(String, Vec<Value>),
}

impl Filter {
    pub fn column(&self) -> &str {
        match self {
            Filter::Eq(column, _) | Filter::In(column, _) => column,
        }
    }

    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Filter::Eq(_, expected) => value == expected,
            Filter::In(_, candidates) => candidates.iter().any(|c| c == value),
        }
    }
}

/// A table plus conjunctive filters; the `where`/`whereIn` surface the
/// mapper needs and nothing more.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    table: String,
    filters: Vec<Filter>,
}

impl Query {
    pub fn table(name: impl Into<String>) -> Self {
        Self {
            table: name.into(),
            filters: Vec::new(),
        }
    }

    pub fn where_eq(mut self, column: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(column.into(), value.into()));
        self
    }

    pub fn where_in<I, V>(mut self, column: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter::In(
            column.into(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn table_name(&self) -> &str {
        &self.table
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

/// Transactional relational store consumed by the repository.
///
/// One store handle behaves like one connection: at most one transaction is
/// open at a time and every write issued while it is open belongs to it.
pub trait Store: Send + Sync {
    /// Rows matching the query, in insertion order.
    fn select(&self, query: &Query) -> StoreResult<Vec<Record>>;

    /// Number of live rows in a table.
    fn count(&self, table: &str) -> StoreResult<usize>;

    /// Inserts a row, returning the generated key when the table has one.
    fn insert(&self, table: &str, record: Record) -> StoreResult<Option<i64>>;

    /// Applies `values` to every matching row, returning the affected count.
    fn update(&self, query: &Query, values: Record) -> StoreResult<usize>;

    /// Deletes every matching row, returning the affected count.
    fn delete(&self, query: &Query) -> StoreResult<usize>;

    fn begin_transaction(&self) -> StoreResult<()>;

    fn commit(&self) -> StoreResult<()>;

    fn rollback(&self) -> StoreResult<()>;

    fn in_transaction(&self) -> bool;
}

/// Operation counters kept by [`MemoryStore`](super::MemoryStore).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub selects: u64,
    pub inserts: u64,
    pub updates: u64,
    pub deletes: u64,
    pub commits: u64,
    pub rollbacks: u64,
}

impl StoreStats {
    /// Inserts, updates and deletes issued.
    pub fn writes(&self) -> u64 {
        self.inserts + self.updates + self.deletes
    }
}
