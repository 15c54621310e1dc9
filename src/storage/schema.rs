//! Table layouts for the section aggregate.

use super::TableSchema;
use crate::core::{Column, DataType};

pub const SECTIONS_TABLE: &str = "sections";
pub const FIELDS_TABLE: &str = "fields";

pub fn sections_table(name: &str) -> TableSchema {
    TableSchema::new(
        name,
        vec![
            Column::new("id", DataType::Integer).auto_increment_key(),
            Column::new("uuid", DataType::Text).not_null().unique(),
            Column::new("name", DataType::Text).not_null(),
            Column::new("handle", DataType::Text).not_null(),
            Column::new("versionable", DataType::Boolean),
            Column::new("created_at", DataType::Timestamp),
            Column::new("updated_at", DataType::Timestamp),
        ],
    )
}

pub fn fields_table(name: &str) -> TableSchema {
    TableSchema::new(
        name,
        vec![
            Column::new("id", DataType::Integer).auto_increment_key(),
            Column::new("section_uuid", DataType::Text).not_null(),
            Column::new("type_id", DataType::Integer),
            Column::new("sorting", DataType::Integer),
            Column::new("label", DataType::Text).not_null(),
            Column::new("handle", DataType::Text),
            Column::new("position", DataType::Text),
            // JSON-encoded
            Column::new("settings", DataType::Text),
            Column::new("created_at", DataType::Timestamp),
            Column::new("updated_at", DataType::Timestamp),
        ],
    )
}

/// Both tables under their default names.
pub fn section_tables() -> Vec<TableSchema> {
    vec![sections_table(SECTIONS_TABLE), fields_table(FIELDS_TABLE)]
}
