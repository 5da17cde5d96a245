//! Test support for code persisted through a small SQLite-backed ORM.
//!
//! A [`ResourceProvider`] builds the service [`Container`] from an
//! application config. An [`EntityTestCase`] asks it for the ORM services
//! of one configuration key and opens a throwaway entity store per test,
//! with helpers for schemas, fixtures, lifecycle listeners and query
//! counting.

pub mod config;
pub mod container;
pub mod error;
pub mod fixtures;
pub mod harness;
pub mod orm;

pub use config::{AppConfig, DEFAULT_CONFIGURATION_KEY, EntityManagerOptions};
pub use container::{Container, ResourceProvider, Service};
pub use error::{HarnessError, Result};
pub use fixtures::{Fixture, FixtureFactory, FixtureRegistry, PurgeMode, ReferenceRepository};
pub use harness::EntityTestCase;
pub use orm::{
    ColumnMapping, ColumnType, Entity, EntityCatalog, EntityManager, EntityMetadata, EventArgs,
    EventListener, EventSubscriber, LifecycleEvent, QueryLog, Value,
};
