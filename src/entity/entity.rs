use super::{Collection, EagerLoad, EntityKind, LazyRelation};
use crate::core::{IdentityKey, MapperError, Record, Result, Value};
use serde_json::{Map, Value as JsonValue};
use std::borrow::Cow;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

/// Shared handle to a canonical entity.
pub type EntityRef<K> = Rc<RefCell<Entity<K>>>;

/// Current value of one attribute.
pub enum Attribute<K: EntityKind> {
    Value(Value),
    /// Has-many relation not loaded yet.
    Lazy(LazyRelation<K::Related>),
    /// Has-many relation, materialized for this entity only.
    Many(Collection<K::Related>),
}

impl<K: EntityKind> Attribute<K> {
    pub fn as_value(&self) -> Option<&Value> {
        match self {
            Attribute::Value(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&Collection<K::Related>> {
        match self {
            Attribute::Many(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn is_lazy(&self) -> bool {
        matches!(self, Attribute::Lazy(_))
    }

    fn to_json(&self) -> JsonValue {
        match self {
            Attribute::Value(value) => value.to_json(),
            Attribute::Lazy(_) => JsonValue::Null,
            Attribute::Many(collection) => collection.to_json(),
        }
    }
}

impl<K: EntityKind> Clone for Attribute<K> {
    fn clone(&self) -> Self {
        match self {
            Attribute::Value(value) => Attribute::Value(value.clone()),
            Attribute::Lazy(handle) => Attribute::Lazy(handle.clone()),
            Attribute::Many(collection) => Attribute::Many(collection.clone()),
        }
    }
}

impl<K: EntityKind> fmt::Debug for Attribute<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Attribute::Value(value) => write!(f, "{:?}", value),
            Attribute::Lazy(handle) => write!(f, "{:?}", handle),
            Attribute::Many(collection) => write!(f, "{:?}", collection),
        }
    }
}

/// Attribute names are case-insensitive; entities store them lowercased.
fn attribute_key(attr: &str) -> Cow<'_, str> {
    if attr.chars().any(char::is_uppercase) {
        Cow::Owned(attr.to_lowercase())
    } else {
        Cow::Borrowed(attr)
    }
}

/// Cached result of the dirty check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirtyState {
    Unknown,
    Clean,
    Dirty,
}

/// Attribute bag for one record of kind `K`.
///
/// Writes go through [`Entity::set`], which enforces the kind's assignable
/// and immutable key sets. The `original` snapshot is taken when the entity
/// is built or last persisted; dirty tracking compares against it.
pub struct Entity<K: EntityKind> {
    data: BTreeMap<String, Attribute<K>>,
    original: BTreeMap<String, Value>,
    original_relations: BTreeMap<String, Vec<IdentityKey>>,
    dirty: Cell<DirtyState>,
    constraints: HashMap<String, Rc<EagerLoad>>,
    _kind: PhantomData<K>,
}

impl<K: EntityKind> Entity<K> {
    /// Fresh entity with no identity.
    pub fn new() -> Self {
        Self::from_record(Record::new())
    }

    /// Entity hydrated from attribute values. The values become the original
    /// snapshot, so the result is clean.
    pub fn from_record(record: Record) -> Self {
        let data = record
            .iter()
            .map(|(name, value)| (name.clone(), Attribute::Value(value.clone())))
            .collect();
        Self {
            data,
            original: record,
            original_relations: BTreeMap::new(),
            dirty: Cell::new(DirtyState::Unknown),
            constraints: HashMap::new(),
            _kind: PhantomData,
        }
    }

    pub fn into_ref(self) -> EntityRef<K> {
        Rc::new(RefCell::new(self))
    }

    /// Reads an attribute, resolving a lazy relation first.
    ///
    /// A pending eager-loading constraint for `attr` is fired before the
    /// handle is resolved; if it fails the handle stays lazy and the error is
    /// returned.
    pub fn get(&mut self, attr: &str) -> Result<Option<&Attribute<K>>> {
        let attr = attribute_key(attr);
        self.resolve(&attr)?;
        Ok(self.data.get(&*attr))
    }

    /// Plain value of an attribute; relations yield `None`.
    pub fn value(&self, attr: &str) -> Option<&Value> {
        self.data
            .get(&*attribute_key(attr))
            .and_then(Attribute::as_value)
    }

    /// Materialized relation collection, loading it if needed.
    pub fn relation(&mut self, attr: &str) -> Result<Option<&Collection<K::Related>>> {
        Ok(self.get(attr)?.and_then(Attribute::as_collection))
    }

    /// Writes a plain attribute. Silently ignored when `attr` is not
    /// assignable, names a relation, or is frozen on a persisted entity.
    pub fn set(&mut self, attr: &str, value: impl Into<Value>) -> bool {
        let attr = attribute_key(attr);
        if K::is_relation(&attr) || !self.is_writable(&attr) {
            return false;
        }
        self.data.insert(attr.into_owned(), Attribute::Value(value.into()));
        self.touch();
        true
    }

    /// Replaces a relation with an explicit collection, under the same rules
    /// as [`Entity::set`].
    pub fn set_relation(&mut self, attr: &str, collection: Collection<K::Related>) -> bool {
        let attr = attribute_key(attr);
        if !K::is_relation(&attr) || !self.is_writable(&attr) {
            return false;
        }
        self.constraints.remove(&*attr);
        self.data.insert(attr.into_owned(), Attribute::Many(collection));
        self.touch();
        true
    }

    pub fn is_assignable(&self, attr: &str) -> bool {
        K::ASSIGNABLE.contains(&&*attribute_key(attr))
    }

    pub fn is_immutable(&self, attr: &str) -> bool {
        K::IMMUTABLE.contains(&&*attribute_key(attr))
    }

    pub fn identity(&self) -> Option<IdentityKey> {
        self.value(K::IDENTITY).and_then(IdentityKey::from_value)
    }

    /// No identity assigned yet.
    pub fn is_new(&self) -> bool {
        self.identity().is_none()
    }

    /// True when a resolved attribute differs from the original snapshot.
    ///
    /// Lazy handles never count. Once dirty, the entity stays dirty until
    /// [`Entity::mark_clean`], even if the change is reverted.
    pub fn is_dirty(&self) -> bool {
        match self.dirty.get() {
            DirtyState::Dirty => true,
            DirtyState::Clean => false,
            DirtyState::Unknown => {
                let dirty = self.compute_dirty();
                self.dirty.set(if dirty {
                    DirtyState::Dirty
                } else {
                    DirtyState::Clean
                });
                dirty
            }
        }
    }

    pub fn dirty_state(&self) -> DirtyState {
        self.dirty.get()
    }

    /// Takes a new original snapshot from the current values.
    pub fn mark_clean(&mut self) {
        self.original = self
            .data
            .iter()
            .filter_map(|(name, attr)| attr.as_value().map(|v| (name.clone(), v.clone())))
            .collect();
        self.original_relations = self
            .data
            .iter()
            .filter_map(|(name, attr)| attr.as_collection().map(|c| (name.clone(), c.keys())))
            .collect();
        self.dirty.set(DirtyState::Clean);
    }

    /// Plain mapping of every attribute. Lazy relations come out as `null`
    /// and are never loaded by serialization.
    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.data
                .iter()
                .map(|(name, attr)| (name.clone(), attr.to_json()))
                .collect(),
        )
    }

    /// Values of persisted columns only.
    pub fn own_attributes(&self) -> Record {
        self.data
            .iter()
            .filter(|(name, _)| K::is_column(name))
            .filter_map(|(name, attr)| attr.as_value().map(|v| (name.clone(), v.clone())))
            .collect()
    }

    /// Attribute names currently held, in key order.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.data.keys().map(String::as_str)
    }

    /// Copy that shares no mutable state with `self`. Pending eager-loading
    /// constraints are not carried over.
    pub fn detached(&self) -> Self {
        Self {
            data: self.data.clone(),
            original: self.original.clone(),
            original_relations: self.original_relations.clone(),
            dirty: Cell::new(self.dirty.get()),
            constraints: HashMap::new(),
            _kind: PhantomData,
        }
    }

    /// Assigns payload values through [`Entity::set`], coercing each to the
    /// column type. Relations and the `skip` keys are left alone.
    pub fn fill_except(&mut self, payload: &Map<String, JsonValue>, skip: &[&str]) -> Result<()> {
        for (key, json) in payload {
            let key = attribute_key(key);
            if skip.contains(&&*key) || K::is_relation(&key) {
                continue;
            }
            let value = match K::attribute_type(&key) {
                Some(data_type) => Value::from_json(json, &data_type).map_err(|err| {
                    MapperError::invalid_argument(format!("{}.{}: {}", K::NAME, key, err))
                })?,
                None if json.is_null() => Value::Null,
                None => Value::Json(json.clone()),
            };
            self.set(&key, value);
        }
        Ok(())
    }

    pub fn fill(&mut self, payload: &Map<String, JsonValue>) -> Result<()> {
        self.fill_except(payload, &[])
    }

    /// Overwrites stored values with a fresher row, bypassing the setter.
    pub(crate) fn merge_values(&mut self, record: Record) {
        for (name, value) in record {
            if matches!(self.data.get(&name), Some(Attribute::Lazy(_) | Attribute::Many(_))) {
                continue;
            }
            self.data.insert(name, Attribute::Value(value));
        }
        self.touch();
    }

    /// Installs a lazy handle unless the relation is already present.
    pub(crate) fn attach_lazy(&mut self, attr: &str, handle: LazyRelation<K::Related>) {
        if matches!(self.data.get(attr), Some(Attribute::Lazy(_) | Attribute::Many(_))) {
            return;
        }
        self.data.insert(attr.to_string(), Attribute::Lazy(handle));
    }

    /// Replaces a relation wholesale with committed children and snapshots
    /// them as the relation's original state.
    pub(crate) fn replace_relation(&mut self, attr: &str, collection: Collection<K::Related>) {
        self.constraints.remove(attr);
        self.original_relations
            .insert(attr.to_string(), collection.keys());
        self.data.insert(attr.to_string(), Attribute::Many(collection));
        self.touch();
    }

    /// Attaches a deferred loader fired on first [`Entity::get`] of `attr`.
    pub fn add_eager_loading_constraint(&mut self, attr: &str, constraint: Rc<EagerLoad>) {
        self.constraints
            .insert(attribute_key(attr).into_owned(), constraint);
    }

    pub fn has_eager_loading_constraint(&self, attr: &str) -> bool {
        self.constraints.contains_key(&*attribute_key(attr))
    }

    /// Relation `attr` holds a materialized collection.
    pub fn is_resolved(&self, attr: &str) -> bool {
        matches!(
            self.data.get(&*attribute_key(attr)),
            Some(Attribute::Many(_))
        )
    }

    fn is_writable(&self, attr: &str) -> bool {
        self.is_assignable(attr) && !(self.is_immutable(attr) && !self.is_new())
    }

    fn touch(&self) {
        if self.dirty.get() == DirtyState::Clean {
            self.dirty.set(DirtyState::Unknown);
        }
    }

    fn resolve(&mut self, attr: &str) -> Result<()> {
        let handle = match self.data.get(attr) {
            Some(Attribute::Lazy(handle)) => handle.clone(),
            _ => return Ok(()),
        };

        if let Some(constraint) = self.constraints.get(attr) {
            constraint.call_once()?;
        }
        self.constraints.remove(attr);

        let native = self
            .value(handle.native_field())
            .cloned()
            .unwrap_or(Value::Null);
        let children = handle.resolve(&native)?;
        self.original_relations
            .insert(attr.to_string(), children.keys());
        self.data.insert(attr.to_string(), Attribute::Many(children));
        Ok(())
    }

    fn compute_dirty(&self) -> bool {
        self.data.iter().any(|(name, attr)| match attr {
            Attribute::Value(value) => {
                let original = self.original.get(name).unwrap_or(&Value::Null);
                value != original
            }
            Attribute::Lazy(_) => false,
            Attribute::Many(collection) => {
                let original = self
                    .original_relations
                    .get(name)
                    .map(Vec::as_slice)
                    .unwrap_or(&[]);
                collection.keys().as_slice() != original
            }
        })
    }
}

impl<K: EntityKind> Default for Entity<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: EntityKind> fmt::Debug for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(K::NAME)
            .field("data", &self.data)
            .field("dirty", &self.dirty.get())
            .finish()
    }
}
