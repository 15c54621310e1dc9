use super::{DataType, StoreError, StoreResult, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Positional row as kept inside a table.
pub type Row = Vec<Value>;

/// Named row exchanged between the mapper and a store.
pub type Record = BTreeMap<String, Value>;

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub primary_key: bool,
    pub unique: bool,
    pub auto_increment: bool,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
            primary_key: false,
            unique: false,
            auto_increment: false,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Integer primary key assigned by the table on insert.
    pub fn auto_increment_key(mut self) -> Self {
        self.primary_key = true;
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    pub fn validate(&self, value: &Value) -> StoreResult<()> {
        if matches!(value, Value::Null) {
            if !self.nullable {
                return Err(StoreError::ConstraintViolation(format!(
                    "Column '{}' cannot be NULL",
                    self.name
                )));
            }
            return Ok(());
        }

        if !self.data_type.is_compatible(value) {
            return Err(StoreError::TypeMismatch(format!(
                "Column '{}' expects type {}, got {}",
                self.name,
                self.data_type,
                value.type_name()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Schema {
    columns: Vec<Column>,
}

impl Schema {
    pub fn new(columns: Vec<Column>) -> Self {
        Self { columns }
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }
}

/// Registry key of an entity: `uuid` text for sections, integer `id` for fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IdentityKey {
    Int(i64),
    Text(String),
}

impl IdentityKey {
    /// Reads a key out of an attribute value. Null, empty text and
    /// non-scalar values carry no identity.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(i) => Some(Self::Int(*i)),
            Value::Text(s) if !s.is_empty() => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            Self::Int(i) => Value::Integer(*i),
            Self::Text(s) => Value::Text(s.clone()),
        }
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(i) => write!(f, "{}", i),
            Self::Text(s) => write!(f, "{}", s),
        }
    }
}

impl From<&str> for IdentityKey {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for IdentityKey {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for IdentityKey {
    fn from(i: i64) -> Self {
        Self::Int(i)
    }
}
