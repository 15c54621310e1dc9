//! Diff of a section's stored fields against an incoming field list.
//!
//! Planning works on detached copies, so canonical entities stay untouched
//! until the writes are committed and the children are reloaded.

use crate::core::{DataType, IdentityKey, MapperError, Result, StoreError, StoreResult, Value};
use crate::entity::{Collection, Entity, EntityKind, Field};
use crate::storage::{Query, Store};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value as JsonValue};
use std::collections::HashSet;

/// Payload keys never taken from the caller for an existing or new field.
const PROTECTED: &[&str] = &["id", "section_uuid", "created_at", "updated_at"];

/// Writes needed to bring stored fields in line with a payload.
#[derive(Debug, Default)]
pub struct ReconcilePlan {
    pub inserts: Vec<Entity<Field>>,
    pub updates: Vec<Entity<Field>>,
    pub deletes: Vec<i64>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.inserts.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Executes updates, then deletes, then inserts. Runs inside the
    /// caller's transaction; returns the keys generated for inserted rows.
    pub fn apply<S: Store + ?Sized>(&self, store: &S, table: &str) -> StoreResult<Vec<i64>> {
        for draft in &self.updates {
            let id = draft
                .id()
                .ok_or_else(|| StoreError::ExecutionError("field update without id".into()))?;
            let mut values = Field::to_storage(draft.own_attributes())?;
            values.remove("id");
            let affected = store.update(&Query::table(table).where_eq("id", id), values)?;
            if affected == 0 {
                return Err(StoreError::ExecutionError(format!(
                    "field {} no longer exists",
                    id
                )));
            }
        }

        if !self.deletes.is_empty() {
            store.delete(&Query::table(table).where_in("id", self.deletes.iter().copied()))?;
        }

        let mut generated = Vec::with_capacity(self.inserts.len());
        for child in &self.inserts {
            let mut values = Field::to_storage(child.own_attributes())?;
            values.remove("id");
            if let Some(id) = store.insert(table, values)? {
                generated.push(id);
            }
        }
        Ok(generated)
    }
}

/// Builds a not-yet-persisted field from a payload item. `sorting` defaults
/// to the item's position in the list.
pub fn new_child(
    payload: &Map<String, JsonValue>,
    index: usize,
    parent_uuid: &str,
    now: DateTime<Utc>,
) -> Result<Entity<Field>> {
    let mut child = Entity::<Field>::new();
    child.set("created_at", now);
    child.set("updated_at", now);
    child.fill_except(payload, PROTECTED)?;
    child.set("section_uuid", parent_uuid);
    if child.value("sorting").is_none_or(Value::is_null) {
        child.set("sorting", index as i64);
    }
    Ok(child)
}

/// Classifies every incoming item as new, updated, or unchanged, and every
/// stored field not referenced by the payload as deleted.
///
/// Items without an `id` are always new. An `id` that is not among
/// `existing`, names a field of another section, or appears twice, is
/// rejected.
pub fn plan(
    existing: &Collection<Field>,
    incoming: &[JsonValue],
    parent_uuid: &str,
    now: DateTime<Utc>,
) -> Result<ReconcilePlan> {
    let mut plan = ReconcilePlan::default();
    let mut referenced = HashSet::new();
    let parent = Value::from(parent_uuid);

    for (index, item) in incoming.iter().enumerate() {
        let payload = item.as_object().ok_or_else(|| {
            MapperError::invalid_argument(format!("field #{} must be an object", index))
        })?;

        let Some(id) = payload_id(payload)? else {
            plan.inserts.push(new_child(payload, index, parent_uuid, now)?);
            continue;
        };

        if !referenced.insert(id) {
            return Err(MapperError::invalid_argument(format!(
                "field {} is referenced more than once",
                id
            )));
        }
        let canonical = existing
            .find_by("id", &Value::Integer(id))
            .filter(|child| child.borrow().value("section_uuid") == Some(&parent))
            .ok_or_else(|| {
                MapperError::invalid_argument(format!(
                    "field {} does not belong to section {}",
                    id, parent_uuid
                ))
            })?;

        let mut draft = canonical.borrow().detached();
        draft.fill_except(payload, PROTECTED)?;
        if draft.is_dirty() {
            draft.set("updated_at", now);
            plan.updates.push(draft);
        }
    }

    plan.deletes = existing
        .keys()
        .into_iter()
        .filter_map(|key| match key {
            IdentityKey::Int(id) if !referenced.contains(&id) => Some(id),
            _ => None,
        })
        .collect();

    Ok(plan)
}

/// Identity carried by a payload item; null and empty mean "none".
pub fn payload_id(payload: &Map<String, JsonValue>) -> Result<Option<i64>> {
    match payload.get(Field::IDENTITY) {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::String(s)) if s.trim().is_empty() => Ok(None),
        Some(raw) => Value::from_json(raw, &DataType::Integer)
            .map(|value| value.as_i64())
            .map_err(|err| MapperError::invalid_argument(format!("field id: {}", err))),
    }
}
