pub mod reconcile;
pub mod section;

pub use reconcile::ReconcilePlan;
pub use section::SectionRepository;

use crate::core::Result;
use crate::entity::{Collection, EntityKind, EntityRef};
use crate::registry::Session;
use serde_json::Value as JsonValue;

/// Relation names accepted in the `with` list of read operations.
pub const EAGER_RELATIONS: &[&str] = &["fields"];

/// Aggregate repository. Every call takes the request's [`Session`], which
/// holds the identity maps the call reads and updates.
pub trait Repository {
    type Root: EntityKind;

    /// One aggregate by identity. `with` names relations to load before
    /// returning.
    fn find(&self, session: &Session, key: &str, with: &[&str]) -> Result<EntityRef<Self::Root>>;

    /// Several aggregates, in the requested order. Fails unless every key
    /// resolves after at most one store query.
    fn find_many(
        &self,
        session: &Session,
        keys: &[&str],
        with: &[&str],
    ) -> Result<Collection<Self::Root>>;

    fn find_all(&self, session: &Session, with: &[&str]) -> Result<Collection<Self::Root>>;

    fn create(&self, session: &Session, payload: &JsonValue) -> Result<EntityRef<Self::Root>>;

    fn update(
        &self,
        session: &Session,
        key: &str,
        payload: &JsonValue,
    ) -> Result<EntityRef<Self::Root>>;

    fn delete(&self, session: &Session, key: &str) -> Result<()>;

    /// Persists an entity previously returned by this repository for the
    /// same session.
    fn save(&self, session: &Session, entity: &EntityRef<Self::Root>)
    -> Result<EntityRef<Self::Root>>;
}
