//! Entity catalog, metadata driver and target-entity resolution

use std::collections::BTreeMap;

use crate::error::{HarnessError, Result};

use super::{Entity, EntityMetadata};

/// Every entity type the process knows about, in registration order.
/// Stands in for annotation scanning: entities are registered from code.
#[derive(Debug, Clone, Default)]
pub struct EntityCatalog {
    entries: Vec<EntityMetadata>,
}

impl EntityCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type. Registering the same name again replaces
    /// the earlier mapping.
    pub fn register<E: Entity>(&mut self) -> &mut Self {
        self.register_metadata(E::metadata())
    }

    pub fn register_metadata(&mut self, metadata: EntityMetadata) -> &mut Self {
        match self.entries.iter_mut().find(|m| m.name == metadata.name) {
            Some(existing) => *existing = metadata,
            None => self.entries.push(metadata),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&EntityMetadata> {
        self.entries.iter().find(|m| m.name == name)
    }

    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|m| m.name.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves entity names to their metadata for one ORM configuration
#[derive(Debug, Clone, PartialEq)]
pub struct MetadataDriver {
    mappings: Vec<EntityMetadata>,
}

impl MetadataDriver {
    /// Build a driver over `names` from the catalog, or over the whole
    /// catalog when `names` is `None`
    pub fn from_catalog(catalog: &EntityCatalog, names: Option<&[String]>) -> Result<Self> {
        let mappings = match names {
            Some(names) => names
                .iter()
                .map(|name| {
                    catalog
                        .get(name)
                        .cloned()
                        .ok_or_else(|| HarnessError::UnknownEntity(name.clone()))
                })
                .collect::<Result<Vec<_>>>()?,
            None => catalog.entries.clone(),
        };

        Ok(Self { mappings })
    }

    /// Names of every entity this driver maps
    pub fn all_class_names(&self) -> Vec<String> {
        self.mappings.iter().map(|m| m.name.clone()).collect()
    }

    pub fn is_transient(&self, name: &str) -> bool {
        !self.mappings.iter().any(|m| m.name == name)
    }

    pub fn load_metadata(&self, name: &str) -> Result<EntityMetadata> {
        self.mappings
            .iter()
            .find(|m| m.name == name)
            .cloned()
            .ok_or_else(|| HarnessError::UnknownEntity(name.to_string()))
    }

    pub fn mappings(&self) -> &[EntityMetadata] {
        &self.mappings
    }
}

/// Maps target-entity aliases (interface-style names) to concrete entities
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EntityResolver {
    aliases: BTreeMap<String, String>,
}

impl EntityResolver {
    pub fn new(aliases: BTreeMap<String, String>) -> Self {
        Self { aliases }
    }

    pub fn add_resolve_target_entity(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.aliases.insert(alias.into(), target.into());
    }

    /// Concrete name for `name`; names without an alias resolve to themselves
    pub fn resolve<'a>(&'a self, name: &'a str) -> &'a str {
        self.aliases.get(name).map(String::as_str).unwrap_or(name)
    }

    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }
}
