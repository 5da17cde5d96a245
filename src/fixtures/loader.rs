//! Fixture instantiation and dependency ordering

use std::collections::{HashMap, HashSet};

use crate::error::{HarnessError, Result};

use super::{Fixture, FixtureRegistry};

pub struct NamedFixture {
    pub name: String,
    pub fixture: Box<dyn Fixture>,
}

impl std::fmt::Debug for NamedFixture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedFixture").field("name", &self.name).finish()
    }
}

/// Collects fixtures by name and hands them back dependencies first
pub struct Loader<'r> {
    registry: &'r FixtureRegistry,
    order: Vec<String>,
    pending: HashMap<String, Box<dyn Fixture>>,
}

impl<'r> Loader<'r> {
    pub fn new(registry: &'r FixtureRegistry) -> Self {
        Self {
            registry,
            order: Vec::new(),
            pending: HashMap::new(),
        }
    }

    /// Instantiate the fixture registered as `name`. Adding a name twice
    /// keeps the first instance.
    pub fn add_fixture(&mut self, name: &str) -> Result<&mut Self> {
        if !self.pending.contains_key(name) {
            let fixture = self.registry.create(name)?;
            self.order.push(name.to_string());
            self.pending.insert(name.to_string(), fixture);
        }
        Ok(self)
    }

    pub fn has_fixture(&self, name: &str) -> bool {
        self.pending.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Every added fixture plus the dependencies they declare, each after
    /// the fixtures it depends on. Otherwise insertion order is kept.
    pub fn into_fixtures(mut self) -> Result<Vec<NamedFixture>> {
        let mut ordered = Vec::with_capacity(self.order.len());
        let mut visiting = Vec::new();
        let mut done = HashSet::new();

        for name in std::mem::take(&mut self.order) {
            self.visit(&name, &mut visiting, &mut done, &mut ordered)?;
        }
        Ok(ordered)
    }

    fn visit(
        &mut self,
        name: &str,
        visiting: &mut Vec<String>,
        done: &mut HashSet<String>,
        ordered: &mut Vec<NamedFixture>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            return Err(HarnessError::CircularFixtureDependency(name.to_string()));
        }

        visiting.push(name.to_string());
        let fixture = match self.pending.remove(name) {
            Some(fixture) => fixture,
            None => self.registry.create(name)?,
        };
        for dependency in fixture.dependencies() {
            self.visit(dependency, visiting, done, ordered)?;
        }
        visiting.pop();

        done.insert(name.to_string());
        ordered.push(NamedFixture {
            name: name.to_string(),
            fixture,
        });
        Ok(())
    }
}
