//! Deferred relation loading.
//!
//! Siblings hydrated by one query share a single [`EagerLoad`]: the first
//! sibling to touch its relation runs the child query for all of them, the
//! rest find the children already resident. The "already ran" flag lives in
//! the shared object, never on the entities.

use super::{Collection, EntityKind};
use crate::core::{Result, Value};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

type Loader = Box<dyn Fn() -> Result<()>>;

/// Call-once loader shared by sibling entities.
pub struct EagerLoad {
    called: Cell<bool>,
    loader: Loader,
}

impl EagerLoad {
    pub fn new(loader: impl Fn() -> Result<()> + 'static) -> Rc<Self> {
        Rc::new(Self {
            called: Cell::new(false),
            loader: Box::new(loader),
        })
    }

    /// Runs the loader unless it already succeeded. A failed run leaves the
    /// loader armed so a later access can retry.
    pub fn call_once(&self) -> Result<()> {
        if self.called.get() {
            return Ok(());
        }
        (self.loader)()?;
        self.called.set(true);
        Ok(())
    }

    pub fn has_run(&self) -> bool {
        self.called.get()
    }
}

impl fmt::Debug for EagerLoad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EagerLoad")
            .field("called", &self.called.get())
            .finish()
    }
}

type Resolver<C> = Rc<dyn Fn(&Value) -> Result<Collection<C>>>;

/// Placeholder for a not-yet-materialized has-many attribute.
///
/// Resolving reads the parent's own children from the child registry; it
/// never queries the store itself.
pub struct LazyRelation<C: EntityKind> {
    native_field: Rc<str>,
    resolver: Resolver<C>,
}

impl<C: EntityKind> LazyRelation<C> {
    pub fn new(
        native_field: impl Into<Rc<str>>,
        resolver: impl Fn(&Value) -> Result<Collection<C>> + 'static,
    ) -> Self {
        Self {
            native_field: native_field.into(),
            resolver: Rc::new(resolver),
        }
    }

    /// Parent attribute the children point at.
    pub fn native_field(&self) -> &str {
        &self.native_field
    }

    pub fn resolve(&self, native_value: &Value) -> Result<Collection<C>> {
        if !native_value.as_bool() {
            return Ok(Collection::default());
        }
        (self.resolver)(native_value)
    }
}

impl<C: EntityKind> Clone for LazyRelation<C> {
    fn clone(&self) -> Self {
        Self {
            native_field: Rc::clone(&self.native_field),
            resolver: Rc::clone(&self.resolver),
        }
    }
}

impl<C: EntityKind> fmt::Debug for LazyRelation<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRelation")
            .field("kind", &C::NAME)
            .field("native_field", &self.native_field)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MapperError;

    #[test]
    fn test_eager_load_runs_once() {
        let runs = Rc::new(Cell::new(0));
        let counter = Rc::clone(&runs);
        let load = EagerLoad::new(move || {
            counter.set(counter.get() + 1);
            Ok(())
        });

        let sibling = Rc::clone(&load);
        load.call_once().unwrap();
        sibling.call_once().unwrap();
        load.call_once().unwrap();

        assert_eq!(runs.get(), 1);
        assert!(sibling.has_run());
    }

    #[test]
    fn test_failed_load_stays_armed() {
        let attempts = Rc::new(Cell::new(0));
        let counter = Rc::clone(&attempts);
        let load = EagerLoad::new(move || {
            counter.set(counter.get() + 1);
            if counter.get() == 1 {
                Err(MapperError::not_found("transient"))
            } else {
                Ok(())
            }
        });

        assert!(load.call_once().is_err());
        assert!(!load.has_run());
        load.call_once().unwrap();
        load.call_once().unwrap();
        assert_eq!(attempts.get(), 2);
    }
}
