use super::reconcile::{self, ReconcilePlan};
use super::{EAGER_RELATIONS, Repository};
use crate::config::MapperConfig;
use crate::core::{IdentityKey, MapperError, Result, StoreError, StoreResult, Value};
use crate::entity::{Collection, EagerLoad, Entity, EntityKind, EntityRef, Field, Section};
use crate::registry::Session;
use crate::services::{Clock, SystemClock, UuidGenerator, V4UuidGenerator};
use crate::storage::{Query, Store};
use crate::validation::{AttributeErrors, RuleValidator, ValidationErrors, Validator};
use log::{debug, warn};
use serde_json::{Map, Value as JsonValue};
use std::rc::Rc;
use std::sync::Arc;
use tracing::{Level, event, info_span};

/// Root payload keys the caller never sets directly.
const ROOT_PROTECTED: &[&str] = &["id", "uuid", "created_at", "updated_at"];

/// Repository for the section aggregate.
///
/// Reads go through the session's identity maps first and hit the store only
/// for what is not resident. Every multi-row write runs in one store
/// transaction that is rolled back on the first failure.
pub struct SectionRepository<S: Store + 'static, V: Validator = RuleValidator<S>> {
    store: Arc<S>,
    validator: V,
    uuids: Arc<dyn UuidGenerator>,
    clock: Arc<dyn Clock>,
    config: MapperConfig,
}

impl<S: Store + 'static> SectionRepository<S, RuleValidator<S>> {
    /// Repository validating with [`RuleValidator`] against the same store.
    pub fn with_default_rules(store: Arc<S>, config: MapperConfig) -> Self {
        let validator = RuleValidator::new(Arc::clone(&store), config.sections_table.clone());
        Self::new(store, validator, config)
    }
}

impl<S: Store + 'static, V: Validator> SectionRepository<S, V> {
    pub fn new(store: Arc<S>, validator: V, config: MapperConfig) -> Self {
        Self {
            store,
            validator,
            uuids: Arc::new(V4UuidGenerator),
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_uuid_generator(mut self, uuids: Arc<dyn UuidGenerator>) -> Self {
        self.uuids = uuids;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &MapperConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Section by handle through the registry's handle index. Reloads every
    /// section first when the session's remembered count disagrees with
    /// what the registry holds.
    pub fn find_by_handle(&self, session: &Session, handle: &str) -> Result<EntityRef<Section>> {
        let span = info_span!("section.find_by_handle", handle = %handle);
        let _enter = span.enter();

        let resident = session.sections().borrow().count();
        if session.known_section_count() != Some(resident) {
            debug!(
                "Section count {:?} != {} resident, reloading",
                session.known_section_count(),
                resident
            );
            self.find_all(session, &[])?;
        }

        session
            .sections()
            .borrow()
            .get_entity_by_field("handle", &Value::from(handle))
            .ok_or_else(|| MapperError::not_found(format!("section with handle '{}'", handle)))
    }

    fn check_relations(with: &[&str]) -> Result<()> {
        match with.iter().find(|name| !EAGER_RELATIONS.contains(*name)) {
            Some(unknown) => Err(MapperError::invalid_argument(format!(
                "unknown relation '{}'",
                unknown
            ))),
            None => Ok(()),
        }
    }

    fn check_key(uuid: &str) -> Result<IdentityKey> {
        if uuid.trim().is_empty() {
            return Err(MapperError::invalid_argument(
                "section identity must not be empty",
            ));
        }
        Ok(IdentityKey::from(uuid))
    }

    /// Runs one section query, loads the rows into the registry, and arms the
    /// shared fields loader on every loaded section still lacking fields.
    fn query_sections(&self, session: &Session, query: Query) -> Result<Vec<EntityRef<Section>>> {
        debug!("SELECT {} {:?}", query.table_name(), query.filters());
        let rows = self.store.select(&query)?;
        let loaded = session.sections().borrow_mut().load(rows);
        self.attach_fields_loader(session, &loaded);
        Ok(loaded)
    }

    fn attach_fields_loader(&self, session: &Session, sections: &[EntityRef<Section>]) {
        let pending: Vec<&EntityRef<Section>> = sections
            .iter()
            .filter(|section| !section.borrow().is_resolved("fields"))
            .collect();
        if pending.is_empty() {
            return;
        }

        let uuids: Vec<Value> = pending
            .iter()
            .filter_map(|section| section.borrow().value("uuid").cloned())
            .collect();
        let store = Arc::clone(&self.store);
        let fields = Rc::clone(session.fields());
        let table = self.config.fields_table.clone();

        let loader = EagerLoad::new(move || {
            debug!("SELECT {} for {} section(s)", table, uuids.len());
            let query = Query::table(table.as_str()).where_in("section_uuid", uuids.iter().cloned());
            let rows = store.select(&query)?;
            fields.borrow_mut().load(rows);
            Ok(())
        });

        for section in pending {
            section
                .borrow_mut()
                .add_eager_loading_constraint("fields", Rc::clone(&loader));
        }
    }

    /// The section's children as stored, merged into the fields registry.
    /// Never read from the section's `fields` attribute, which callers may
    /// have replaced.
    fn stored_children(&self, session: &Session, uuid: &str) -> Result<Collection<Field>> {
        let query = Query::table(self.config.fields_table.as_str()).where_eq("section_uuid", uuid);
        debug!("SELECT {} {:?}", query.table_name(), query.filters());
        let rows = self.store.select(&query)?;
        let mut fields = session.fields().borrow_mut();
        fields.load(rows);
        Ok(fields.children_of("section_uuid", &Value::from(uuid)))
    }

    fn eager_load(&self, sections: &[EntityRef<Section>], with: &[&str]) -> Result<()> {
        for relation in with {
            for section in sections {
                section.borrow_mut().get(relation)?;
            }
        }
        Ok(())
    }

    /// Begin, run `work`, then commit; roll back if `work` or the commit fails.
    fn in_transaction<T>(&self, work: impl FnOnce() -> StoreResult<T>) -> StoreResult<T> {
        self.store.begin_transaction()?;
        let outcome = work().and_then(|value| self.store.commit().map(|_| value));
        if let Err(err) = &outcome {
            warn!("Rolling back: {}", err);
            if self.store.in_transaction() {
                if let Err(rollback_err) = self.store.rollback() {
                    event!(Level::ERROR, error = %rollback_err, "rollback failed");
                }
            }
        }
        outcome
    }

    fn validate_create(
        &self,
        data: &Map<String, JsonValue>,
        fields: &[JsonValue],
    ) -> Result<()> {
        let mut errors = ValidationErrors {
            root: self.validator.validate_section(data, None)?,
            fields: Vec::with_capacity(fields.len()),
        };
        if self.config.require_fields && fields.is_empty() {
            errors.add_root("fields", "At least one field is required.");
        }
        for item in fields {
            errors.fields.push(self.validate_item(item, None)?);
        }
        Self::finish_validation(errors)
    }

    fn validate_update(
        &self,
        uuid: &str,
        merged: &Map<String, JsonValue>,
        fields: Option<&[JsonValue]>,
        existing: &Collection<Field>,
    ) -> Result<()> {
        let mut errors = ValidationErrors {
            root: self.validator.validate_section(merged, Some(uuid))?,
            fields: Vec::new(),
        };
        for item in fields.unwrap_or_default() {
            errors.fields.push(self.validate_item(item, Some(existing))?);
        }
        Self::finish_validation(errors)
    }

    /// Validates one field payload, merged over the stored child it names.
    fn validate_item(
        &self,
        item: &JsonValue,
        existing: Option<&Collection<Field>>,
    ) -> Result<AttributeErrors> {
        let Some(payload) = item.as_object() else {
            let mut errors = AttributeErrors::new();
            errors.insert("field".into(), vec!["Each field must be an object.".into()]);
            return Ok(errors);
        };

        let stored = match (existing, reconcile::payload_id(payload)) {
            (Some(existing), Ok(Some(id))) => existing
                .find_by(Field::IDENTITY, &Value::Integer(id))
                .map(|child| child.borrow().to_json()),
            _ => None,
        };
        match stored {
            Some(JsonValue::Object(base)) => self.validator.validate_field(&overlay(base, payload)),
            _ => self.validator.validate_field(payload),
        }
    }

    fn finish_validation(errors: ValidationErrors) -> Result<()> {
        if errors.is_empty() {
            return Ok(());
        }
        debug!("Validation failed: {}", errors);
        Err(MapperError::ValidationFailed(errors))
    }

    fn evict_children(session: &Session, uuid: &str) {
        let children = session
            .fields()
            .borrow()
            .children_of("section_uuid", &Value::from(uuid));
        let mut registry = session.fields().borrow_mut();
        for key in children.keys() {
            registry.remove_entity(&key);
        }
    }
}

impl<S: Store + 'static, V: Validator> Repository for SectionRepository<S, V> {
    type Root = Section;

    fn find(&self, session: &Session, uuid: &str, with: &[&str]) -> Result<EntityRef<Section>> {
        let span = info_span!("section.find", uuid = %uuid);
        let _enter = span.enter();

        let key = Self::check_key(uuid)?;
        Self::check_relations(with)?;

        let resident = session.sections().borrow().get_entity(&key);
        let section = match resident {
            Some(section) => section,
            None => {
                self.query_sections(
                    session,
                    Query::table(self.config.sections_table.as_str()).where_eq("uuid", uuid),
                )?;
                session
                    .sections()
                    .borrow()
                    .get_entity(&key)
                    .ok_or_else(|| MapperError::not_found(format!("section {}", uuid)))?
            }
        };

        self.eager_load(std::slice::from_ref(&section), with)?;
        Ok(section)
    }

    fn find_many(
        &self,
        session: &Session,
        uuids: &[&str],
        with: &[&str],
    ) -> Result<Collection<Section>> {
        let span = info_span!("section.find_many", count = uuids.len());
        let _enter = span.enter();

        if uuids.is_empty() {
            return Err(MapperError::invalid_argument("no section identities given"));
        }
        let keys = uuids
            .iter()
            .map(|uuid| Self::check_key(uuid))
            .collect::<Result<Vec<_>>>()?;
        Self::check_relations(with)?;

        let resident = session.sections().borrow().get_collection(&keys);
        let sections = match resident {
            Some(sections) => sections,
            None => {
                self.query_sections(
                    session,
                    Query::table(self.config.sections_table.as_str())
                        .where_in("uuid", uuids.iter().copied()),
                )?;
                let registry = session.sections().borrow();
                let found = registry.get_collection(&keys).ok_or_else(|| {
                    let missing: Vec<String> = keys
                        .iter()
                        .filter(|key| registry.get_entity(key).is_none())
                        .map(IdentityKey::to_string)
                        .collect();
                    MapperError::not_found(format!("sections {}", missing.join(", ")))
                })?;
                found
            }
        };

        let handles: Vec<EntityRef<Section>> = sections.iter().cloned().collect();
        self.eager_load(&handles, with)?;
        Ok(sections)
    }

    fn find_all(&self, session: &Session, with: &[&str]) -> Result<Collection<Section>> {
        let span = info_span!("section.find_all");
        let _enter = span.enter();

        Self::check_relations(with)?;

        let resident = session.sections().borrow().count();
        let sections = if resident > 0 && session.known_section_count() == Some(resident) {
            session.sections().borrow().all()
        } else {
            let loaded =
                self.query_sections(session, Query::table(self.config.sections_table.as_str()))?;
            if loaded.is_empty() {
                return Err(MapperError::not_found("no sections stored"));
            }
            session.remember_section_count(loaded.len());
            Collection::from(loaded)
        };

        let handles: Vec<EntityRef<Section>> = sections.iter().cloned().collect();
        self.eager_load(&handles, with)?;
        Ok(sections)
    }

    fn create(&self, session: &Session, payload: &JsonValue) -> Result<EntityRef<Section>> {
        let span = info_span!("section.create");
        let _enter = span.enter();

        let data = payload
            .as_object()
            .ok_or_else(|| MapperError::invalid_argument("section payload must be an object"))?;
        let field_payloads = field_list(data)?.unwrap_or_default();
        self.validate_create(data, field_payloads)?;

        let now = self.clock.now();
        let uuid = self.uuids.generate();

        let mut section = Entity::<Section>::new();
        section.set("created_at", now);
        section.set("updated_at", now);
        section.fill_except(data, ROOT_PROTECTED)?;
        section.set("uuid", uuid.as_str());

        let mut children = Vec::with_capacity(field_payloads.len());
        for (index, item) in field_payloads.iter().enumerate() {
            let child = item.as_object().ok_or_else(|| {
                MapperError::invalid_argument(format!("field #{} must be an object", index))
            })?;
            children.push(reconcile::new_child(child, index, &uuid, now)?);
        }
        let plan = ReconcilePlan {
            inserts: children,
            ..ReconcilePlan::default()
        };

        let written = self.in_transaction(|| {
            let mut root = Section::to_storage(section.own_attributes())?;
            root.remove("id");
            self.store.insert(&self.config.sections_table, root)?;
            plan.apply(self.store.as_ref(), &self.config.fields_table)
        });
        match written {
            Ok(ids) => debug!("Created section {} with {} field(s)", uuid, ids.len()),
            Err(err) => {
                event!(Level::ERROR, error = %err, "section create failed");
                return Err(MapperError::CreateFailed(err.to_string()));
            }
        }

        session.invalidate_section_count();
        self.find(session, &uuid, &["fields"])
    }

    fn update(
        &self,
        session: &Session,
        uuid: &str,
        payload: &JsonValue,
    ) -> Result<EntityRef<Section>> {
        let span = info_span!("section.update", uuid = %uuid);
        let _enter = span.enter();

        let data = payload
            .as_object()
            .ok_or_else(|| MapperError::invalid_argument("section payload must be an object"))?;
        let incoming_fields = field_list(data)?;

        let section = self.find(session, uuid, &[])?;
        let existing = self.stored_children(session, uuid)?;

        let mut merged = match section.borrow().to_json() {
            JsonValue::Object(current) => current,
            _ => Map::new(),
        };
        merged.remove("fields");
        let mut root_patch = data.clone();
        root_patch.remove("fields");
        let merged = overlay(merged, &root_patch);
        self.validate_update(uuid, &merged, incoming_fields, &existing)?;

        let now = self.clock.now();
        let mut draft = section.borrow().detached();
        let mut skip = ROOT_PROTECTED.to_vec();
        skip.push("fields");
        draft.fill_except(data, &skip)?;
        let root_dirty = draft.is_dirty();
        if root_dirty {
            draft.set("updated_at", now);
        }

        let plan = match incoming_fields {
            Some(items) => reconcile::plan(&existing, items, uuid, now)?,
            None => ReconcilePlan::default(),
        };
        debug!(
            "Section {}: root dirty={}, {} insert(s), {} update(s), {} delete(s)",
            uuid,
            root_dirty,
            plan.inserts.len(),
            plan.updates.len(),
            plan.deletes.len()
        );
        if !root_dirty && plan.is_empty() {
            if incoming_fields.is_some() {
                section.borrow_mut().replace_relation("fields", existing);
            }
            return Ok(section);
        }

        let written = self.in_transaction(|| {
            if root_dirty {
                let mut values = Section::to_storage(draft.own_attributes())?;
                values.remove("id");
                values.remove("uuid");
                let query =
                    Query::table(self.config.sections_table.as_str()).where_eq("uuid", uuid);
                if self.store.update(&query, values)? == 0 {
                    return Err(StoreError::ExecutionError(format!(
                        "section {} no longer exists",
                        uuid
                    )));
                }
            }
            plan.apply(self.store.as_ref(), &self.config.fields_table)
        });
        if let Err(err) = written {
            event!(Level::ERROR, error = %err, "section update failed");
            return Err(MapperError::WriteFailed(err.to_string()));
        }

        if root_dirty {
            let rows = self.store.select(
                &Query::table(self.config.sections_table.as_str()).where_eq("uuid", uuid),
            )?;
            session.sections().borrow_mut().refresh(rows);
        }

        if !plan.is_empty() {
            let rows = self.store.select(
                &Query::table(self.config.fields_table.as_str()).where_eq("section_uuid", uuid),
            )?;
            let mut fields = session.fields().borrow_mut();
            for id in &plan.deletes {
                fields.remove_entity(&IdentityKey::Int(*id));
            }
            fields.refresh(rows);
        }
        if incoming_fields.is_some() {
            let children = session
                .fields()
                .borrow()
                .children_of("section_uuid", &Value::from(uuid));
            section.borrow_mut().replace_relation("fields", children);
        }

        session.invalidate_section_count();
        Ok(section)
    }

    fn delete(&self, session: &Session, uuid: &str) -> Result<()> {
        let span = info_span!("section.delete", uuid = %uuid);
        let _enter = span.enter();

        let key = Self::check_key(uuid)?;
        self.find(session, uuid, &[])?;

        let sections_table = self.config.sections_table.as_str();
        let fields_table = self.config.fields_table.as_str();
        self.in_transaction(|| {
            let fields = self
                .store
                .delete(&Query::table(fields_table).where_eq("section_uuid", uuid))?;
            self.store
                .delete(&Query::table(sections_table).where_eq("uuid", uuid))?;
            debug!("Deleted section {} and {} field(s)", uuid, fields);
            Ok(())
        })?;

        Self::evict_children(session, uuid);
        session.sections().borrow_mut().remove_entity(&key);
        session.invalidate_section_count();
        Ok(())
    }

    fn save(&self, session: &Session, entity: &EntityRef<Section>) -> Result<EntityRef<Section>> {
        let uuid = entity
            .borrow()
            .uuid()
            .map(str::to_string)
            .ok_or_else(|| MapperError::invalid_argument("cannot save a section without uuid"))?;
        if !session.sections().borrow().is_canonical(entity) {
            return Err(MapperError::invalid_argument(format!(
                "section {} was not loaded through this repository",
                uuid
            )));
        }

        let payload = entity.borrow().to_json();
        self.update(session, &uuid, &payload)
    }
}

/// The `fields` list of a payload; absent or null means "leave children alone".
fn field_list(data: &Map<String, JsonValue>) -> Result<Option<&[JsonValue]>> {
    match data.get("fields") {
        None | Some(JsonValue::Null) => Ok(None),
        Some(JsonValue::Array(items)) => Ok(Some(items.as_slice())),
        Some(_) => Err(MapperError::invalid_argument("fields must be a list")),
    }
}

fn overlay(mut base: Map<String, JsonValue>, patch: &Map<String, JsonValue>) -> Map<String, JsonValue> {
    for (key, value) in patch {
        base.insert(key.clone(), value.clone());
    }
    base
}
