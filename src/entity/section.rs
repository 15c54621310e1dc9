use super::{Entity, EntityKind, Field};
use crate::core::{DataType, Result};

/// Aggregate root: a section owning an ordered list of fields.
#[derive(Debug)]
pub struct Section;

impl EntityKind for Section {
    const NAME: &'static str = "section";
    const IDENTITY: &'static str = "uuid";
    const ASSIGNABLE: &'static [&'static str] = &[
        "id",
        "uuid",
        "entity",
        "name",
        "handle",
        "versionable",
        "entries",
        "fields",
        "created_at",
        "updated_at",
    ];
    const IMMUTABLE: &'static [&'static str] = &["id", "uuid", "entity", "created_at"];
    const COLUMNS: &'static [(&'static str, DataType)] = &[
        ("id", DataType::Integer),
        ("uuid", DataType::Text),
        ("name", DataType::Text),
        ("handle", DataType::Text),
        ("versionable", DataType::Boolean),
        ("created_at", DataType::Timestamp),
        ("updated_at", DataType::Timestamp),
    ];
    const RELATIONS: &'static [&'static str] = &["fields"];

    type Related = Field;
}

impl Entity<Section> {
    pub fn uuid(&self) -> Option<&str> {
        self.value("uuid").and_then(|v| v.as_str())
    }

    pub fn handle(&self) -> Option<&str> {
        self.value("handle").and_then(|v| v.as_str())
    }

    /// Number of fields, loading them if still lazy.
    pub fn count_fields(&mut self) -> Result<usize> {
        Ok(self.relation("fields")?.map_or(0, |fields| fields.len()))
    }
}
