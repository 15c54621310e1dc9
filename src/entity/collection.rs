use super::{EntityKind, EntityRef};
use crate::core::{IdentityKey, Value};
use serde_json::Value as JsonValue;
use std::fmt;
use std::rc::Rc;

/// Ordered list of entity handles of one kind.
///
/// Order is significant: it is the order children were loaded or submitted
/// in, which is what `sorting` defaults are derived from.
pub struct Collection<K: EntityKind> {
    items: Vec<EntityRef<K>>,
}

impl<K: EntityKind> Collection<K> {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, EntityRef<K>> {
        self.items.iter()
    }

    pub fn get(&self, index: usize) -> Option<&EntityRef<K>> {
        self.items.get(index)
    }

    pub fn first(&self) -> Option<&EntityRef<K>> {
        self.items.first()
    }

    pub fn push(&mut self, entity: EntityRef<K>) {
        self.items.push(entity);
    }

    /// Swaps the backing sequence for `items`.
    pub fn replace(&mut self, items: Vec<EntityRef<K>>) {
        self.items = items;
    }

    /// Values of `attr` in collection order; missing attributes yield null.
    pub fn pluck(&self, attr: &str) -> Vec<Value> {
        self.items
            .iter()
            .map(|entity| entity.borrow().value(attr).cloned().unwrap_or(Value::Null))
            .collect()
    }

    pub fn find_by(&self, attr: &str, value: &Value) -> Option<EntityRef<K>> {
        self.items
            .iter()
            .find(|entity| entity.borrow().value(attr) == Some(value))
            .cloned()
    }

    /// Identity keys of the members that have one.
    pub fn keys(&self) -> Vec<IdentityKey> {
        self.items
            .iter()
            .filter_map(|entity| entity.borrow().identity())
            .collect()
    }

    /// Same instance, not just same identity.
    pub fn contains(&self, entity: &EntityRef<K>) -> bool {
        self.items.iter().any(|item| Rc::ptr_eq(item, entity))
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Array(
            self.items
                .iter()
                .map(|entity| entity.borrow().to_json())
                .collect(),
        )
    }

    pub fn into_vec(self) -> Vec<EntityRef<K>> {
        self.items
    }
}

impl<K: EntityKind> Default for Collection<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityKind> Clone for Collection<K> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<K: EntityKind> From<Vec<EntityRef<K>>> for Collection<K> {
    fn from(items: Vec<EntityRef<K>>) -> Self {
        Self { items }
    }
}

impl<K: EntityKind> FromIterator<EntityRef<K>> for Collection<K> {
    fn from_iter<I: IntoIterator<Item = EntityRef<K>>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

impl<'a, K: EntityKind> IntoIterator for &'a Collection<K> {
    type Item = &'a EntityRef<K>;
    type IntoIter = std::slice::Iter<'a, EntityRef<K>>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl<K: EntityKind> fmt::Debug for Collection<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("kind", &K::NAME)
            .field("keys", &self.keys())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Record;
    use crate::entity::{Entity, Field};

    fn field(id: i64, label: &str) -> EntityRef<Field> {
        let mut record = Record::new();
        record.insert("id".into(), Value::Integer(id));
        record.insert("label".into(), Value::from(label));
        Entity::from_record(record).into_ref()
    }

    #[test]
    fn test_pluck_keeps_order() {
        let fields: Collection<Field> = vec![field(2, "b"), field(1, "a")].into();
        assert_eq!(fields.pluck("id"), vec![Value::Integer(2), Value::Integer(1)]);
        assert_eq!(fields.pluck("missing"), vec![Value::Null, Value::Null]);
    }

    #[test]
    fn test_find_by_and_contains() {
        let first = field(1, "a");
        let fields: Collection<Field> = vec![Rc::clone(&first), field(2, "b")].into();

        let found = fields.find_by("label", &Value::from("a")).unwrap();
        assert!(Rc::ptr_eq(&found, &first));
        assert!(fields.contains(&first));
        assert!(!fields.contains(&field(1, "a")));
    }

    #[test]
    fn test_replace_swaps_backing_sequence() {
        let mut fields: Collection<Field> = vec![field(1, "a")].into();
        fields.replace(vec![field(5, "e"), field(6, "f")]);
        assert_eq!(fields.keys(), vec![IdentityKey::Int(5), IdentityKey::Int(6)]);
    }
}
