use super::{Entity, EntityKind};
use crate::core::{DataType, Record, StoreError, StoreResult, Value};
use serde_json::Value as JsonValue;

/// Child record of a section.
#[derive(Debug)]
pub struct Field;

impl EntityKind for Field {
    const NAME: &'static str = "field";
    const IDENTITY: &'static str = "id";
    const ASSIGNABLE: &'static [&'static str] = &[
        "id",
        "section_uuid",
        "type_id",
        "sorting",
        "label",
        "handle",
        "position",
        "settings",
        "created_at",
        "updated_at",
    ];
    const IMMUTABLE: &'static [&'static str] = &["id", "section_uuid", "created_at"];
    const COLUMNS: &'static [(&'static str, DataType)] = &[
        ("id", DataType::Integer),
        ("section_uuid", DataType::Text),
        ("type_id", DataType::Integer),
        ("sorting", DataType::Integer),
        ("label", DataType::Text),
        ("handle", DataType::Text),
        ("position", DataType::Text),
        ("settings", DataType::Json),
        ("created_at", DataType::Timestamp),
        ("updated_at", DataType::Timestamp),
    ];
    const ORDER_BY: &'static [&'static str] = &["sorting", "id"];

    type Related = Field;

    /// `settings` is stored as JSON text; undecodable text is kept verbatim.
    fn from_storage(mut record: Record) -> Record {
        if let Some(Value::Text(raw)) = record.get("settings") {
            let decoded = serde_json::from_str::<JsonValue>(raw)
                .map(Value::Json)
                .unwrap_or_else(|_| Value::Text(raw.clone()));
            record.insert("settings".into(), decoded);
        }
        record
    }

    fn to_storage(mut record: Record) -> StoreResult<Record> {
        if let Some(Value::Json(settings)) = record.get("settings") {
            let encoded = serde_json::to_string(settings)
                .map_err(|err| StoreError::TypeMismatch(format!("settings: {}", err)))?;
            record.insert("settings".into(), Value::Text(encoded));
        }
        Ok(record)
    }
}

impl Entity<Field> {
    pub fn id(&self) -> Option<i64> {
        self.value("id").and_then(Value::as_i64)
    }

    pub fn section_uuid(&self) -> Option<&str> {
        self.value("section_uuid").and_then(|v| v.as_str())
    }
}
