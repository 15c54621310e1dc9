use crate::validation::ValidationErrors;
use thiserror::Error;

/// Failures raised by a [`Store`](crate::storage::Store) implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("Column '{0}' not found in table '{1}'")]
    ColumnNotFound(String, String),

    #[error("Type mismatch: {0}")]
    TypeMismatch(String),

    #[error("Constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("Execution error: {0}")]
    ExecutionError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

/// Failures surfaced by the mapper layer (entities, registry, repository).
#[derive(Error, Debug)]
pub enum MapperError {
    #[error("Validation failed: {0}")]
    ValidationFailed(ValidationErrors),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Create failed: {0}")]
    CreateFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl MapperError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Structured validation detail, if this is a validation failure.
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::ValidationFailed(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, MapperError>;
