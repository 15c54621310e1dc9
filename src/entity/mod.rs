pub mod collection;
#[allow(clippy::module_inception)]
pub mod entity;
pub mod field;
pub mod kind;
pub mod lazy;
pub mod section;

pub use collection::Collection;
pub use entity::{Attribute, DirtyState, Entity, EntityRef};
pub use field::Field;
pub use kind::EntityKind;
pub use lazy::{EagerLoad, LazyRelation};
pub use section::Section;
