//! Common test utilities
#![allow(dead_code)]

use std::path::PathBuf;

use entity_testkit::{
    AppConfig, ColumnMapping, ColumnType, Entity, EntityCatalog, EntityManager, EntityMetadata,
    EntityTestCase, Fixture, QueryLog, ReferenceRepository, ResourceProvider, Value,
};

// ==================== Entities ====================

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Car {
    pub id: Option<i64>,
    pub make: String,
    pub model: String,
    pub year: i64,
}

impl Car {
    pub fn new(make: &str, model: &str, year: i64) -> Self {
        Self {
            id: None,
            make: make.to_string(),
            model: model.to_string(),
            year,
        }
    }
}

impl Entity for Car {
    const NAME: &'static str = "Car";

    fn metadata() -> EntityMetadata {
        EntityMetadata::new(Self::NAME, "cars")
            .with_column(ColumnMapping::new("make", ColumnType::Text))
            .with_column(ColumnMapping::new("model", ColumnType::Text))
            .with_column(ColumnMapping::new("year", ColumnType::Integer))
    }

    fn id(&self) -> Option<i64> {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = Some(id);
    }

    fn values(&self) -> Vec<Value> {
        vec![
            Value::Text(self.make.clone()),
            Value::Text(self.model.clone()),
            Value::Integer(self.year),
        ]
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: Some(row.get(0)?),
            make: row.get(1)?,
            model: row.get(2)?,
            year: row.get(3)?,
        })
    }
}

// ==================== Fixtures ====================

/// Persists a single Ford Model T
#[derive(Default)]
pub struct CarFixture;

impl Fixture for CarFixture {
    fn load(
        &self,
        manager: &mut EntityManager,
        references: &mut ReferenceRepository,
    ) -> anyhow::Result<()> {
        let mut car = Car::new("Ford", "Model T", 1910);
        manager.persist(&mut car)?;
        manager.flush()?;
        references.set_reference("model-t", &car)?;
        Ok(())
    }
}

/// A later model built on the Model T reference
#[derive(Default)]
pub struct SuccessorFixture;

impl Fixture for SuccessorFixture {
    fn load(
        &self,
        manager: &mut EntityManager,
        references: &mut ReferenceRepository,
    ) -> anyhow::Result<()> {
        let predecessor: Car = references.get_reference(manager, "model-t")?;
        let mut car = Car::new(&predecessor.make, "Model A", predecessor.year + 17);
        manager.persist(&mut car)?;
        manager.flush()?;
        Ok(())
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec!["CarFixture"]
    }
}

// ==================== Context ====================

pub fn config_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/assets/config")
}

pub fn application_config() -> AppConfig {
    AppConfig::from_file(config_dir().join("application.json"))
        .expect("Failed to load test application config")
}

pub fn catalog() -> EntityCatalog {
    let mut catalog = EntityCatalog::new();
    catalog.register::<Car>();
    catalog
}

pub fn provider_with(config: AppConfig) -> ResourceProvider {
    let mut provider = ResourceProvider::new(catalog());
    provider
        .set_config(config)
        .expect("Failed to set application config");
    provider
}

/// Install a log subscriber honouring `RUST_LOG`; repeat calls are ignored
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Test context holding a harness wired to the test application config
/// with the car fixtures registered
pub struct TestContext {
    pub case: EntityTestCase,
}

impl TestContext {
    pub fn new() -> Self {
        Self::from_case(EntityTestCase::new(provider_with(application_config())))
    }

    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self::from_case(EntityTestCase::new(provider_with(application_config())).with_db_path(path))
    }

    /// Share `log` with other contexts instead of a log of its own
    pub fn with_query_log(log: QueryLog) -> Self {
        Self::from_case(EntityTestCase::new(provider_with(application_config())).with_query_log(log))
    }

    fn from_case(mut case: EntityTestCase) -> Self {
        init_tracing();
        case.register_fixture_type::<CarFixture>("CarFixture")
            .register_fixture_type::<SuccessorFixture>("SuccessorFixture");
        TestContext { case }
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
