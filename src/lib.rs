// ============================================================================
// sectionmapper Library
// ============================================================================
//
// Data mapper for the section aggregate: a section and its ordered fields.
//
//   core         values, schema types, errors
//   storage      store contract + in-memory relational store
//   transaction  undo-log transactions used by the in-memory store
//   entity       attribute bags, collections, lazy relations
//   registry     per-session identity maps
//   validation   payload rules
//   repository   find / create / update / delete / save + reconciliation
//
// ============================================================================

pub mod config;
pub mod core;
pub mod entity;
pub mod prelude;
pub mod registry;
pub mod repository;
pub mod services;
pub mod storage;
pub mod transaction;
pub mod validation;

// Re-export main types for convenience
pub use crate::config::MapperConfig;
pub use crate::core::{DataType, IdentityKey, MapperError, Record, Result, StoreError, Value};
pub use entity::{Collection, Entity, EntityRef, Field, Section};
pub use registry::Session;
pub use repository::{Repository, SectionRepository};
pub use storage::{MemoryStore, Query, Store};
pub use validation::{RuleValidator, ValidationErrors, Validator};
