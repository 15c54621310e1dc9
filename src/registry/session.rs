use super::{HasMany, Registry};
use crate::entity::{Field, Section};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Per-request unit of work: the section and field identity maps plus the
/// section row count last seen by `find_all`.
///
/// Create one per request and drop it at the end. It is deliberately not
/// `Send`.
#[derive(Debug)]
pub struct Session {
    sections: Rc<RefCell<Registry<Section>>>,
    fields: Rc<RefCell<Registry<Field>>>,
    section_count: Cell<Option<usize>>,
}

impl Session {
    pub fn new() -> Self {
        let fields = Rc::new(RefCell::new(Registry::<Field>::new()));
        let sections = Registry::<Section>::new().with_relation(HasMany::new(
            "fields",
            "uuid",
            "section_uuid",
            Rc::clone(&fields),
        ));
        Self {
            sections: Rc::new(RefCell::new(sections)),
            fields,
            section_count: Cell::new(None),
        }
    }

    pub fn sections(&self) -> &Rc<RefCell<Registry<Section>>> {
        &self.sections
    }

    pub fn fields(&self) -> &Rc<RefCell<Registry<Field>>> {
        &self.fields
    }

    /// Section row count remembered from the last full load.
    pub fn known_section_count(&self) -> Option<usize> {
        self.section_count.get()
    }

    pub(crate) fn remember_section_count(&self, count: usize) {
        self.section_count.set(Some(count));
    }

    pub(crate) fn invalidate_section_count(&self) {
        self.section_count.set(None);
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Record, Value};

    #[test]
    fn test_sections_resolve_fields_from_shared_registry() {
        let session = Session::new();

        let mut field = Record::new();
        field.insert("id".into(), Value::Integer(1));
        field.insert("section_uuid".into(), Value::from("s1"));
        session.fields().borrow_mut().load(vec![field]);

        let mut section = Record::new();
        section.insert("uuid".into(), Value::from("s1"));
        let loaded = session.sections().borrow_mut().load(vec![section]);

        let mut entity = loaded[0].borrow_mut();
        assert!(!entity.is_resolved("fields"));
        assert_eq!(entity.count_fields().unwrap(), 1);
    }

    #[test]
    fn test_section_count_cache() {
        let session = Session::new();
        assert_eq!(session.known_section_count(), None);
        session.remember_section_count(3);
        assert_eq!(session.known_section_count(), Some(3));
        session.invalidate_section_count();
        assert_eq!(session.known_section_count(), None);
    }
}
