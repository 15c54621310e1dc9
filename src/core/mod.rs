pub mod error;
pub mod types;
pub mod value;

pub use error::{MapperError, Result, StoreError, StoreResult};
pub use types::{Column, IdentityKey, Record, Row, Schema};
pub use value::{DataType, Value};
