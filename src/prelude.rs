//! Recommended imports grouped by abstraction level.
//!
//! `dx` covers application code working with sections through a repository.
//! `advanced` exposes the pieces needed to plug in another store or rule set.

pub mod dx {
    //! Everyday surface: open a [`Session`] per request, call the repository.
    pub use crate::{
        Collection, EntityRef, Field, MapperConfig, MapperError, MemoryStore, Repository, Result,
        Section, SectionRepository, Session, Value,
    };
}

pub mod advanced {
    //! Escape hatch for custom stores, validators and capabilities.
    pub use crate::entity::{Attribute, DirtyState, EagerLoad, EntityKind, LazyRelation};
    pub use crate::registry::{HasMany, Registry};
    pub use crate::repository::reconcile::{self, ReconcilePlan};
    pub use crate::services::{Clock, ManualClock, SystemClock, UuidGenerator, V4UuidGenerator};
    pub use crate::storage::{Filter, Query, Store, StoreStats};
    pub use crate::validation::{AttributeErrors, RuleValidator, ValidationErrors, Validator};
}
