//! Identity map: one canonical in-memory entity per identity key.
//!
//! A registry lives inside a [`Session`] and dies with it; nothing here is
//! shared across requests or threads.

pub mod session;

pub use session::Session;

use crate::core::{IdentityKey, Record, Value};
use crate::entity::{Collection, Entity, EntityKind, EntityRef, LazyRelation};
use log::{debug, warn};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

type FieldIndex = HashMap<Value, Vec<IdentityKey>>;

/// Has-many link from a registry's entities to children held in another
/// registry: `child.foreign_field == parent.native_field`.
pub struct HasMany<C: EntityKind> {
    attribute: &'static str,
    native_field: &'static str,
    foreign_field: &'static str,
    target: Rc<RefCell<Registry<C>>>,
}

impl<C: EntityKind> HasMany<C> {
    pub fn new(
        attribute: &'static str,
        native_field: &'static str,
        foreign_field: &'static str,
        target: Rc<RefCell<Registry<C>>>,
    ) -> Self {
        Self {
            attribute,
            native_field,
            foreign_field,
            target,
        }
    }

    pub fn attribute(&self) -> &'static str {
        self.attribute
    }

    pub fn foreign_field(&self) -> &'static str {
        self.foreign_field
    }

    pub fn target(&self) -> &Rc<RefCell<Registry<C>>> {
        &self.target
    }

    /// Handle that reads a parent's children out of the target registry.
    pub fn lazy(&self) -> LazyRelation<C> {
        let target = Rc::clone(&self.target);
        let foreign_field = self.foreign_field;
        LazyRelation::new(self.native_field, move |native: &Value| {
            Ok(target.borrow().children_of(foreign_field, native))
        })
    }
}

pub struct Registry<K: EntityKind> {
    entities: HashMap<IdentityKey, EntityRef<K>>,
    order: Vec<IdentityKey>,
    indexes: RefCell<HashMap<String, FieldIndex>>,
    relations: Vec<HasMany<K::Related>>,
}

impl<K: EntityKind> Registry<K> {
    pub fn new() -> Self {
        Self {
            entities: HashMap::new(),
            order: Vec::new(),
            indexes: RefCell::new(HashMap::new()),
            relations: Vec::new(),
        }
    }

    pub fn with_relation(mut self, relation: HasMany<K::Related>) -> Self {
        self.relations.push(relation);
        self
    }

    pub fn relation(&self, attribute: &str) -> Option<&HasMany<K::Related>> {
        self.relations.iter().find(|r| r.attribute == attribute)
    }

    pub fn get_entity(&self, key: &IdentityKey) -> Option<EntityRef<K>> {
        self.entities.get(key).cloned()
    }

    /// All requested entities in the requested order, or `None` if any one
    /// of them is not resident.
    pub fn get_collection(&self, keys: &[IdentityKey]) -> Option<Collection<K>> {
        keys.iter().map(|key| self.get_entity(key)).collect()
    }

    /// `entity` is the canonical instance for its identity.
    pub fn is_canonical(&self, entity: &EntityRef<K>) -> bool {
        let Some(key) = entity.borrow().identity() else {
            return false;
        };
        self.entities
            .get(&key)
            .is_some_and(|resident| Rc::ptr_eq(resident, entity))
    }

    /// Upserts store rows into canonical entities, in row order.
    ///
    /// A resident entity with unsaved changes keeps its in-memory state; a
    /// clean one takes the row's values.
    pub fn load(&mut self, rows: Vec<Record>) -> Vec<EntityRef<K>> {
        self.upsert_all(rows, false)
    }

    /// Like [`Registry::load`] but always overwrites resident state. Used
    /// after a commit, when the rows are known to be authoritative.
    pub fn refresh(&mut self, rows: Vec<Record>) -> Vec<EntityRef<K>> {
        self.upsert_all(rows, true)
    }

    pub fn remove_entity(&mut self, key: &IdentityKey) -> Option<EntityRef<K>> {
        let removed = self.entities.remove(key)?;
        self.order.retain(|resident| resident != key);
        self.indexes.borrow_mut().clear();
        Some(removed)
    }

    /// Secondary-index lookup. The index is built on first use and rebuilt
    /// when a hit no longer carries the indexed value.
    pub fn get_entity_by_field(&self, field: &str, value: &Value) -> Option<EntityRef<K>> {
        if let Some(hit) = self.indexed(field, value) {
            return Some(hit);
        }
        self.indexes.borrow_mut().remove(field);
        self.indexed(field, value)
    }

    /// Entities whose `field` equals `value`, ordered by the kind's
    /// `ORDER_BY` attributes.
    pub fn children_of(&self, field: &str, value: &Value) -> Collection<K> {
        let mut children: Vec<EntityRef<K>> = self
            .order
            .iter()
            .filter_map(|key| self.entities.get(key))
            .filter(|entity| entity.borrow().value(field) == Some(value))
            .cloned()
            .collect();
        children.sort_by(|a, b| Self::compare(&a.borrow(), &b.borrow()));
        children.into()
    }

    /// Every resident entity in load order.
    pub fn all(&self) -> Collection<K> {
        self.order
            .iter()
            .filter_map(|key| self.entities.get(key).cloned())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    fn upsert_all(&mut self, rows: Vec<Record>, force: bool) -> Vec<EntityRef<K>> {
        let loaded: Vec<EntityRef<K>> = rows
            .into_iter()
            .filter_map(|row| self.upsert(row, force))
            .collect();
        self.indexes.borrow_mut().clear();
        loaded
    }

    fn upsert(&mut self, row: Record, force: bool) -> Option<EntityRef<K>> {
        let record = K::from_storage(row);
        let Some(key) = record.get(K::IDENTITY).and_then(IdentityKey::from_value) else {
            warn!("Skipping {} row without {}", K::NAME, K::IDENTITY);
            return None;
        };

        if let Some(resident) = self.entities.get(&key) {
            {
                let mut entity = resident.borrow_mut();
                if !force && entity.is_dirty() {
                    debug!("Keeping unsaved {} {} over store row", K::NAME, key);
                } else {
                    entity.merge_values(record);
                    entity.mark_clean();
                }
            }
            return Some(Rc::clone(resident));
        }

        let mut entity = Entity::<K>::from_record(record);
        for relation in &self.relations {
            entity.attach_lazy(relation.attribute, relation.lazy());
        }
        let entity = entity.into_ref();
        self.entities.insert(key.clone(), Rc::clone(&entity));
        self.order.push(key);
        Some(entity)
    }

    fn indexed(&self, field: &str, value: &Value) -> Option<EntityRef<K>> {
        let mut indexes = self.indexes.borrow_mut();
        let index = indexes
            .entry(field.to_string())
            .or_insert_with(|| self.build_index(field));
        index
            .get(value)?
            .iter()
            .filter_map(|key| self.entities.get(key))
            .find(|entity| entity.borrow().value(field) == Some(value))
            .cloned()
    }

    fn build_index(&self, field: &str) -> FieldIndex {
        let mut index = FieldIndex::new();
        for key in &self.order {
            if let Some(value) = self
                .entities
                .get(key)
                .and_then(|entity| entity.borrow().value(field).cloned())
            {
                index.entry(value).or_default().push(key.clone());
            }
        }
        index
    }

    fn compare(a: &Entity<K>, b: &Entity<K>) -> Ordering {
        for attr in K::ORDER_BY {
            let left = a.value(attr).unwrap_or(&Value::Null);
            let right = b.value(attr).unwrap_or(&Value::Null);
            match left.partial_cmp(right).unwrap_or(Ordering::Equal) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        Ordering::Equal
    }
}

impl<K: EntityKind> Default for Registry<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityKind> fmt::Debug for Registry<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("kind", &K::NAME)
            .field("keys", &self.order)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::{Field, Section};

    fn field_row(id: i64, section: &str, sorting: i64) -> Record {
        let mut record = Record::new();
        record.insert("id".into(), Value::Integer(id));
        record.insert("section_uuid".into(), Value::from(section));
        record.insert("sorting".into(), Value::Integer(sorting));
        record.insert("label".into(), Value::from(format!("f{}", id)));
        record
    }

    fn section_row(uuid: &str, handle: &str) -> Record {
        let mut record = Record::new();
        record.insert("uuid".into(), Value::from(uuid));
        record.insert("name".into(), Value::from(handle));
        record.insert("handle".into(), Value::from(handle));
        record
    }

    #[test]
    fn test_load_returns_canonical_instances() {
        let mut registry = Registry::<Field>::new();
        let first = registry.load(vec![field_row(1, "s", 0)]);
        let second = registry.load(vec![field_row(1, "s", 0)]);

        assert_eq!(registry.count(), 1);
        assert!(Rc::ptr_eq(&first[0], &second[0]));
        assert!(registry.is_canonical(&first[0]));
    }

    #[test]
    fn test_load_keeps_dirty_resident_state() {
        let mut registry = Registry::<Field>::new();
        let loaded = registry.load(vec![field_row(1, "s", 0)]);
        loaded[0].borrow_mut().set("label", "edited");

        registry.load(vec![field_row(1, "s", 0)]);
        assert_eq!(loaded[0].borrow().value("label"), Some(&Value::from("edited")));

        registry.refresh(vec![field_row(1, "s", 0)]);
        assert_eq!(loaded[0].borrow().value("label"), Some(&Value::from("f1")));
        assert!(!loaded[0].borrow().is_dirty());
    }

    #[test]
    fn test_get_collection_is_all_or_nothing() {
        let mut registry = Registry::<Field>::new();
        registry.load(vec![field_row(1, "s", 0), field_row(2, "s", 1)]);

        let hit = registry.get_collection(&[IdentityKey::Int(2), IdentityKey::Int(1)]);
        assert_eq!(hit.unwrap().keys(), vec![IdentityKey::Int(2), IdentityKey::Int(1)]);
        assert!(registry
            .get_collection(&[IdentityKey::Int(1), IdentityKey::Int(3)])
            .is_none());
    }

    #[test]
    fn test_children_are_ordered_by_sorting() {
        let mut registry = Registry::<Field>::new();
        registry.load(vec![
            field_row(1, "s", 2),
            field_row(2, "other", 0),
            field_row(3, "s", 0),
            field_row(4, "s", 0),
        ]);

        let children = registry.children_of("section_uuid", &Value::from("s"));
        assert_eq!(
            children.pluck("id"),
            vec![Value::Integer(3), Value::Integer(4), Value::Integer(1)]
        );
    }

    #[test]
    fn test_index_follows_changes() {
        let mut registry = Registry::<Section>::new();
        let loaded = registry.load(vec![section_row("a", "blog")]);
        assert!(registry.get_entity_by_field("handle", &Value::from("blog")).is_some());

        registry.refresh(vec![{
            let mut row = section_row("a", "news");
            row.insert("name".into(), Value::from("News"));
            row
        }]);
        assert!(registry.get_entity_by_field("handle", &Value::from("blog")).is_none());
        let hit = registry.get_entity_by_field("handle", &Value::from("news")).unwrap();
        assert!(Rc::ptr_eq(&hit, &loaded[0]));
    }

    #[test]
    fn test_remove_entity() {
        let mut registry = Registry::<Section>::new();
        registry.load(vec![section_row("a", "blog"), section_row("b", "news")]);
        assert!(registry.remove_entity(&IdentityKey::from("a")).is_some());
        assert!(registry.remove_entity(&IdentityKey::from("a")).is_none());
        assert_eq!(registry.all().keys(), vec![IdentityKey::from("b")]);
    }

    #[test]
    fn test_rows_without_identity_are_skipped() {
        let mut registry = Registry::<Section>::new();
        let mut row = section_row("", "blog");
        row.remove("uuid");
        assert!(registry.load(vec![row]).is_empty());
        assert!(registry.is_empty());
    }
}
