//! Payload validation contract and the default section/field rules.

use crate::core::{DataType, Result, Value};
use crate::storage::{Query, Store};
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Messages per attribute name.
pub type AttributeErrors = BTreeMap<String, Vec<String>>;

/// Structured failure detail: errors on the section itself plus one entry per
/// submitted field payload, in submission order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ValidationErrors {
    pub root: AttributeErrors,
    pub fields: Vec<AttributeErrors>,
}

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.root.is_empty() && self.fields.iter().all(BTreeMap::is_empty)
    }

    /// Number of messages across root and field items.
    pub fn len(&self) -> usize {
        let count = |errors: &AttributeErrors| errors.values().map(Vec::len).sum::<usize>();
        count(&self.root) + self.fields.iter().map(count).sum::<usize>()
    }

    pub fn add_root(&mut self, attr: impl Into<String>, message: impl Into<String>) {
        self.root.entry(attr.into()).or_default().push(message.into());
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failing_items = self.fields.iter().filter(|item| !item.is_empty()).count();
        write!(
            f,
            "{} message(s); section attributes: [{}]; failing field items: {}",
            self.len(),
            self.root.keys().cloned().collect::<Vec<_>>().join(", "),
            failing_items
        )
    }
}

/// Pass/fail contract consumed by the repository. An empty map means the
/// payload passed.
pub trait Validator {
    /// `ignore_uuid` names the section being updated so its own values do not
    /// trip uniqueness checks.
    fn validate_section(
        &self,
        data: &Map<String, JsonValue>,
        ignore_uuid: Option<&str>,
    ) -> Result<AttributeErrors>;

    fn validate_field(&self, data: &Map<String, JsonValue>) -> Result<AttributeErrors>;
}

const POSITIONS: &[&str] = &["left", "right"];

/// Default rules backed by a store for uniqueness lookups.
pub struct RuleValidator<S: Store> {
    store: Arc<S>,
    sections_table: String,
}

impl<S: Store> RuleValidator<S> {
    pub fn new(store: Arc<S>, sections_table: impl Into<String>) -> Self {
        Self {
            store,
            sections_table: sections_table.into(),
        }
    }

    fn check_unique(
        &self,
        errors: &mut AttributeErrors,
        data: &Map<String, JsonValue>,
        attr: &str,
        ignore_uuid: Option<&str>,
    ) -> Result<()> {
        let Some(JsonValue::String(candidate)) = data.get(attr) else {
            return Ok(());
        };
        let rows = self
            .store
            .select(&Query::table(&self.sections_table).where_eq(attr, candidate.as_str()))?;
        let taken = rows.iter().any(|row| match (row.get("uuid"), ignore_uuid) {
            (Some(Value::Text(uuid)), Some(own)) => uuid != own,
            _ => true,
        });
        if taken {
            push(errors, attr, format!("The {} has already been taken.", attr));
        }
        Ok(())
    }
}

impl<S: Store> Validator for RuleValidator<S> {
    fn validate_section(
        &self,
        data: &Map<String, JsonValue>,
        ignore_uuid: Option<&str>,
    ) -> Result<AttributeErrors> {
        let mut errors = AttributeErrors::new();

        for attr in ["name", "handle"] {
            if require_text(&mut errors, data, attr) {
                self.check_unique(&mut errors, data, attr, ignore_uuid)?;
            }
        }
        check_type(&mut errors, data, "versionable", DataType::Boolean);

        Ok(errors)
    }

    fn validate_field(&self, data: &Map<String, JsonValue>) -> Result<AttributeErrors> {
        let mut errors = AttributeErrors::new();

        require_text(&mut errors, data, "label");
        require_text(&mut errors, data, "handle");
        if is_blank(data.get("type_id")) {
            push(&mut errors, "type_id", "The type_id field is required.");
        } else {
            check_type(&mut errors, data, "type_id", DataType::Integer);
        }
        check_type(&mut errors, data, "sorting", DataType::Integer);

        match data.get("position") {
            None | Some(JsonValue::Null) => {}
            Some(JsonValue::String(position)) if POSITIONS.contains(&position.as_str()) => {}
            Some(_) => push(
                &mut errors,
                "position",
                format!("The position must be one of: {}.", POSITIONS.join(", ")),
            ),
        }

        if !matches!(
            data.get("settings"),
            None | Some(JsonValue::Null) | Some(JsonValue::Object(_))
        ) {
            push(&mut errors, "settings", "The settings must be an object.");
        }

        Ok(errors)
    }
}

fn push(errors: &mut AttributeErrors, attr: &str, message: impl Into<String>) {
    errors.entry(attr.to_string()).or_default().push(message.into());
}

fn is_blank(value: Option<&JsonValue>) -> bool {
    match value {
        None | Some(JsonValue::Null) => true,
        Some(JsonValue::String(s)) => s.trim().is_empty(),
        _ => false,
    }
}

/// Records a "required" error when blank; returns whether a value is present.
fn require_text(errors: &mut AttributeErrors, data: &Map<String, JsonValue>, attr: &str) -> bool {
    if is_blank(data.get(attr)) {
        push(errors, attr, format!("The {} field is required.", attr));
        return false;
    }
    if !data.get(attr).is_some_and(JsonValue::is_string) {
        push(errors, attr, format!("The {} must be a string.", attr));
        return false;
    }
    true
}

fn check_type(errors: &mut AttributeErrors, data: &Map<String, JsonValue>, attr: &str, data_type: DataType) {
    if let Some(value) = data.get(attr) {
        if Value::from_json(value, &data_type).is_err() {
            push(
                errors,
                attr,
                format!("The {} must be of type {}.", attr, data_type.to_string().to_lowercase()),
            );
        }
    }
}
