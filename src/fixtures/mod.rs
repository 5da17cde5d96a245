//! Fixture loading pipeline
//!
//! Fixtures are registered by name in a [`FixtureRegistry`]. Loading goes
//! through three stages:
//! - `loader`: instantiates fixtures by name and orders them by dependency
//! - `purger`: empties mapped tables before a non-appending load
//! - `executor`: runs the fixtures in one transaction against a handle
//!
//! `references` lets fixtures hand entities to the fixtures that run after
//! them.

mod executor;
mod loader;
mod purger;
mod references;

pub use executor::Executor;
pub use loader::{Loader, NamedFixture};
pub use purger::{PurgeMode, Purger};
pub use references::ReferenceRepository;

use std::collections::BTreeMap;

use crate::error::{HarnessError, Result};
use crate::orm::EntityManager;

/// A unit of seed data
pub trait Fixture {
    /// Persist this fixture's rows and flush
    fn load(
        &self,
        manager: &mut EntityManager,
        references: &mut ReferenceRepository,
    ) -> anyhow::Result<()>;

    /// Names of fixtures that must run before this one
    fn dependencies(&self) -> Vec<&'static str> {
        Vec::new()
    }
}

pub type FixtureFactory = fn() -> Box<dyn Fixture>;

fn make_default<F>() -> Box<dyn Fixture>
where
    F: Fixture + Default + 'static,
{
    Box::new(F::default())
}

/// Name -> factory mapping fixtures are instantiated from
#[derive(Clone, Default)]
pub struct FixtureRegistry {
    factories: BTreeMap<String, FixtureFactory>,
}

impl std::fmt::Debug for FixtureRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixtureRegistry")
            .field("fixtures", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl FixtureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, factory: FixtureFactory) -> &mut Self {
        self.factories.insert(name.into(), factory);
        self
    }

    /// Register a fixture type built through `Default`
    pub fn register_type<F>(&mut self, name: impl Into<String>) -> &mut Self
    where
        F: Fixture + Default + 'static,
    {
        self.register(name, make_default::<F>)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn create(&self, name: &str) -> Result<Box<dyn Fixture>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| HarnessError::FixtureClassNotFound(name.to_string()))
    }
}
