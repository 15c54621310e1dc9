#![allow(dead_code)]

use sectionmapper::core::{Record, StoreError, StoreResult};
use sectionmapper::prelude::advanced::{ManualClock, StoreStats};
use sectionmapper::storage::{Query, Store};
use sectionmapper::{MapperConfig, MemoryStore, SectionRepository};
use serde_json::{Value as JsonValue, json};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Memory store that can be told to fail selects, inserts or deletes on one
/// table.
pub struct FlakyStore {
    inner: MemoryStore,
    failing_selects: Mutex<Option<(String, usize)>>,
    failing_insert: Mutex<Option<(String, usize)>>,
    failing_delete: Mutex<Option<String>>,
    inserts_seen: AtomicUsize,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::with_section_schema().unwrap(),
            failing_selects: Mutex::new(None),
            failing_insert: Mutex::new(None),
            failing_delete: Mutex::new(None),
            inserts_seen: AtomicUsize::new(0),
        }
    }

    /// The next `times` selects on `table` fail.
    pub fn fail_selects(&self, table: &str, times: usize) {
        *self.failing_selects.lock().unwrap() = Some((table.to_string(), times));
    }

    /// The insert into `table` after `succeed` successful ones fails.
    pub fn fail_insert_after(&self, table: &str, succeed: usize) {
        self.inserts_seen.store(0, Ordering::SeqCst);
        *self.failing_insert.lock().unwrap() = Some((table.to_string(), succeed));
    }

    /// Every delete on `table` fails until cleared with `None`.
    pub fn fail_delete(&self, table: Option<&str>) {
        *self.failing_delete.lock().unwrap() = table.map(str::to_string);
    }

    pub fn stats(&self) -> StoreStats {
        self.inner.stats()
    }
}

impl Store for FlakyStore {
    fn select(&self, query: &Query) -> StoreResult<Vec<Record>> {
        let mut failing = self.failing_selects.lock().unwrap();
        if let Some((table, remaining)) = failing.as_mut() {
            if table == query.table_name() && *remaining > 0 {
                *remaining -= 1;
                return Err(StoreError::ExecutionError("connection reset".into()));
            }
        }
        drop(failing);
        self.inner.select(query)
    }

    fn count(&self, table: &str) -> StoreResult<usize> {
        self.inner.count(table)
    }

    fn insert(&self, table: &str, record: Record) -> StoreResult<Option<i64>> {
        if let Some((target, succeed)) = self.failing_insert.lock().unwrap().as_ref() {
            if target == table && self.inserts_seen.fetch_add(1, Ordering::SeqCst) >= *succeed {
                return Err(StoreError::ConstraintViolation("disk full".into()));
            }
        }
        self.inner.insert(table, record)
    }

    fn update(&self, query: &Query, values: Record) -> StoreResult<usize> {
        self.inner.update(query, values)
    }

    fn delete(&self, query: &Query) -> StoreResult<usize> {
        if self.failing_delete.lock().unwrap().as_deref() == Some(query.table_name()) {
            return Err(StoreError::ExecutionError("lock wait timeout".into()));
        }
        self.inner.delete(query)
    }

    fn begin_transaction(&self) -> StoreResult<()> {
        self.inner.begin_transaction()
    }

    fn commit(&self) -> StoreResult<()> {
        self.inner.commit()
    }

    fn rollback(&self) -> StoreResult<()> {
        self.inner.rollback()
    }

    fn in_transaction(&self) -> bool {
        self.inner.in_transaction()
    }
}

pub fn start_time() -> chrono::DateTime<chrono::Utc> {
    use chrono::TimeZone;
    chrono::Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap()
}

pub fn memory_repository() -> (Arc<MemoryStore>, SectionRepository<MemoryStore>) {
    let store = Arc::new(MemoryStore::with_section_schema().unwrap());
    let repo = SectionRepository::with_default_rules(Arc::clone(&store), MapperConfig::default())
        .with_clock(Arc::new(ManualClock::new(start_time())));
    (store, repo)
}

pub fn flaky_repository() -> (Arc<FlakyStore>, SectionRepository<FlakyStore>) {
    let store = Arc::new(FlakyStore::new());
    let repo = SectionRepository::with_default_rules(Arc::clone(&store), MapperConfig::default())
        .with_clock(Arc::new(ManualClock::new(start_time())));
    (store, repo)
}

pub fn field(label: &str) -> JsonValue {
    json!({
        "label": label,
        "handle": label.to_lowercase(),
        "type_id": 1
    })
}

pub fn section(name: &str, fields: Vec<JsonValue>) -> JsonValue {
    json!({
        "name": name,
        "handle": name.to_lowercase(),
        "versionable": false,
        "fields": fields
    })
}
