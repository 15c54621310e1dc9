pub mod engine;
pub mod memory;
pub mod schema;
pub mod table;

pub use engine::{Filter, Query, Store, StoreStats};
pub use memory::MemoryStore;
pub use table::{Table, TableSchema};
