//! Named references fixtures share with each other

use std::collections::BTreeMap;

use crate::error::{HarnessError, Result};
use crate::orm::{Entity, EntityManager};

#[derive(Debug, Clone, PartialEq, Eq)]
struct Reference {
    entity: String,
    id: i64,
}

/// Maps symbolic names to persisted entities. One repository lives per
/// entity-manager handle.
#[derive(Debug, Clone, Default)]
pub struct ReferenceRepository {
    references: BTreeMap<String, Reference>,
}

impl ReferenceRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `entity` under `name`, replacing any previous reference
    pub fn set_reference<E: Entity>(&mut self, name: impl Into<String>, entity: &E) -> Result<()> {
        let id = entity
            .id()
            .ok_or_else(|| HarnessError::MissingIdentifier(E::NAME.to_string()))?;
        self.references.insert(
            name.into(),
            Reference {
                entity: E::NAME.to_string(),
                id,
            },
        );
        Ok(())
    }

    /// Store `entity` under a name that must not be taken yet
    pub fn add_reference<E: Entity>(&mut self, name: impl Into<String>, entity: &E) -> Result<()> {
        let name = name.into();
        if self.references.contains_key(&name) {
            return Err(HarnessError::DuplicateReference(name));
        }
        self.set_reference(name, entity)
    }

    pub fn has_reference(&self, name: &str) -> bool {
        self.references.contains_key(name)
    }

    /// Identifier stored under `name`
    pub fn identifier(&self, name: &str) -> Option<i64> {
        self.references.get(name).map(|r| r.id)
    }

    /// Reload the referenced entity through `manager`
    pub fn get_reference<E: Entity>(&self, manager: &mut EntityManager, name: &str) -> Result<E> {
        let reference = self
            .references
            .get(name)
            .filter(|r| r.entity == E::NAME)
            .ok_or_else(|| HarnessError::UnknownReference(name.to_string()))?;

        manager
            .find::<E>(reference.id)?
            .ok_or_else(|| HarnessError::UnknownReference(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.references.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.references.len()
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orm::testing::{Note, entity_manager};

    #[test]
    fn test_add_get_and_duplicate() -> anyhow::Result<()> {
        let mut em = entity_manager();
        let mut refs = ReferenceRepository::new();
        let mut note = Note::new("shared");
        em.persist(&mut note)?;
        em.flush()?;

        refs.add_reference("shared", &note)?;
        assert!(refs.has_reference("shared"));
        assert_eq!(refs.identifier("shared"), note.id);
        assert!(matches!(
            refs.add_reference("shared", &note),
            Err(HarnessError::DuplicateReference(_))
        ));
        refs.set_reference("shared", &note)?;

        let loaded: Note = refs.get_reference(&mut em, "shared")?;
        assert_eq!(loaded, note);
        Ok(())
    }

    #[test]
    fn test_unsaved_and_unknown() {
        let mut em = entity_manager();
        let mut refs = ReferenceRepository::new();
        assert!(matches!(
            refs.add_reference("draft", &Note::new("draft")),
            Err(HarnessError::MissingIdentifier(_))
        ));
        assert!(refs.is_empty());
        assert!(matches!(
            refs.get_reference::<Note>(&mut em, "missing"),
            Err(HarnessError::UnknownReference(_))
        ));
    }
}
