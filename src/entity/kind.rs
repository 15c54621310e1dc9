use crate::core::{DataType, Record, StoreResult};
use std::fmt::Debug;

/// Static description of one entity type.
///
/// Key sets are fixed per type and checked at the accessor boundary
/// (`Entity::set`), so no runtime reflection is involved.
pub trait EntityKind: Debug + 'static {
    /// Registry / log name.
    const NAME: &'static str;

    /// Attribute holding the identity key.
    const IDENTITY: &'static str;

    /// Attributes the setter accepts.
    const ASSIGNABLE: &'static [&'static str];

    /// Attributes frozen once the entity has an identity.
    const IMMUTABLE: &'static [&'static str];

    /// Persisted columns and the type incoming payload values are coerced to.
    const COLUMNS: &'static [(&'static str, DataType)];

    /// Has-many attributes, resolved lazily.
    const RELATIONS: &'static [&'static str] = &[];

    /// Attributes children are ordered by when a relation is materialized.
    const ORDER_BY: &'static [&'static str] = &[];

    /// Entity type reached through `RELATIONS`.
    type Related: EntityKind<Related = Self::Related>;

    fn attribute_type(attr: &str) -> Option<DataType> {
        Self::COLUMNS
            .iter()
            .find(|(name, _)| *name == attr)
            .map(|(_, data_type)| *data_type)
    }

    fn is_column(attr: &str) -> bool {
        Self::attribute_type(attr).is_some()
    }

    fn is_relation(attr: &str) -> bool {
        Self::RELATIONS.contains(&attr)
    }

    /// Row as read from the store -> attribute values.
    fn from_storage(record: Record) -> Record {
        record
    }

    /// Attribute values -> row as written to the store.
    fn to_storage(record: Record) -> StoreResult<Record> {
        Ok(record)
    }
}
