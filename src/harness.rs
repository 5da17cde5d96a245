//! Per-test entity store: a lazily opened handle plus schema, fixture and
//! query-count helpers around it

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{DEFAULT_CONFIGURATION_KEY, EntityManagerOptions};
use crate::container::{CONFIG_SERVICE, ResourceProvider, service_name};
use crate::error::{HarnessError, Result};
use crate::fixtures::{
    Executor, Fixture, FixtureFactory, FixtureRegistry, Loader, Purger, ReferenceRepository,
};
use crate::orm::{
    Connection, ConnectionParams, EntityManager, EventListener, EventSubscriber, LifecycleEvent,
    QueryLog, SchemaTool,
};

/// Path suffix marking a database path as a disposable artifact
pub const DATABASE_FILE_SUFFIX: &str = ".db";

/// Test-case state for one test.
///
/// The entity manager is created on first use from the services of the
/// provider, keyed by the configuration key. Without a database path the
/// store lives in memory and vanishes with the handle.
#[derive(Debug)]
pub struct EntityTestCase {
    provider: ResourceProvider,
    configuration_key: String,
    db_path: Option<PathBuf>,
    fixtures: FixtureRegistry,
    query_log: Option<QueryLog>,
    query_baseline: usize,
    entity_manager: Option<EntityManager>,
    references: Option<ReferenceRepository>,
}

impl EntityTestCase {
    pub fn new(provider: ResourceProvider) -> Self {
        Self {
            provider,
            configuration_key: DEFAULT_CONFIGURATION_KEY.to_string(),
            db_path: None,
            fixtures: FixtureRegistry::new(),
            query_log: None,
            query_baseline: 0,
            entity_manager: None,
            references: None,
        }
    }

    pub fn with_configuration_key(mut self, key: impl Into<String>) -> Self {
        self.configuration_key = key.into();
        self
    }

    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    /// Record statements into `log`, which other test cases may share
    pub fn with_query_log(mut self, log: QueryLog) -> Self {
        self.query_log = Some(log);
        self
    }

    pub fn with_fixtures(mut self, registry: FixtureRegistry) -> Self {
        self.fixtures = registry;
        self
    }

    pub fn register_fixture(&mut self, name: impl Into<String>, factory: FixtureFactory) -> &mut Self {
        self.fixtures.register(name, factory);
        self
    }

    pub fn register_fixture_type<F>(&mut self, name: impl Into<String>) -> &mut Self
    where
        F: Fixture + Default + 'static,
    {
        self.fixtures.register_type::<F>(name);
        self
    }

    pub fn configuration_key(&self) -> &str {
        &self.configuration_key
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn provider(&self) -> &ResourceProvider {
        &self.provider
    }

    pub fn provider_mut(&mut self) -> &mut ResourceProvider {
        &mut self.provider
    }

    pub fn fixtures(&self) -> &FixtureRegistry {
        &self.fixtures
    }

    /// The statement log, once a handle has been created or one was injected
    pub fn query_log(&self) -> Option<&QueryLog> {
        self.query_log.as_ref()
    }

    /// Whether a handle is held, open or not
    pub fn has_entity_manager(&self) -> bool {
        self.entity_manager.is_some()
    }

    // ==================== Lifecycle ====================

    /// Recreate the schema of every mapped entity
    pub fn set_up(&mut self) -> Result<()> {
        self.auto_load_schemas()?;
        Ok(())
    }

    /// Close the connection but keep the handle
    pub fn tear_down(&mut self) -> Result<()> {
        if let Some(em) = self.entity_manager.as_mut() {
            em.close()?;
            tracing::debug!(handle = em.handle_id(), "closed entity manager");
        }
        Ok(())
    }

    /// The current handle, created on the first call
    pub fn get_entity_manager(&mut self) -> Result<&mut EntityManager> {
        if self.entity_manager.is_none() {
            let em = self.create_entity_manager()?;
            self.entity_manager = Some(em);
        }
        self.entity_manager.as_mut().ok_or(HarnessError::NoActiveHandle)
    }

    fn create_entity_manager(&mut self) -> Result<EntityManager> {
        let key = self.configuration_key.clone();

        let name = service_name("eventmanager", &key);
        let events = self.provider.service(&name)?.into_event_manager(&name)?;

        let config = self
            .provider
            .service(CONFIG_SERVICE)?
            .into_config(CONFIG_SERVICE)?;
        let options = EntityManagerOptions::for_key(&config, &key)?;

        let name = options.configuration_service();
        let mut configuration = self.provider.service(&name)?.into_configuration(&name)?;
        if configuration.metadata_driver().is_none() {
            return Err(HarnessError::MissingMappingDriver {
                configuration: configuration.name().to_string(),
            });
        }
        configuration.set_auto_generate_proxies(true);
        configuration.use_ephemeral_caches();

        let log = self.query_log.get_or_insert_with(QueryLog::new).clone();
        configuration.set_query_log(Some(log.clone()));

        let name = options.entity_resolver_service();
        let resolver = self.provider.service(&name)?.into_entity_resolver(&name)?;

        let params = ConnectionParams::sqlite(self.db_path.clone());
        let in_memory = params.is_in_memory();
        let conn = Connection::open(params, Some(log))?;
        let em = EntityManager::create(conn, configuration, events, resolver)?;

        tracing::debug!(
            handle = em.handle_id(),
            configuration = %key,
            in_memory,
            "opened entity manager"
        );
        Ok(em)
    }

    /// Close and forget the handle along with its fixture references
    pub fn drop_entity_manager(&mut self) -> Result<()> {
        self.references = None;
        if let Some(mut em) = self.entity_manager.take() {
            em.close()?;
            tracing::debug!(handle = em.handle_id(), "dropped entity manager");
        }
        Ok(())
    }

    /// The database file, when the path names one
    fn database_file(&self) -> Option<&Path> {
        self.db_path.as_deref().filter(|path| {
            let path = path.to_string_lossy();
            !path.trim().is_empty() && path.ends_with(DATABASE_FILE_SUFFIX)
        })
    }

    /// Drop the handle and remove the database file, if any. A file that
    /// cannot be removed is ignored.
    pub fn drop_database(&mut self) -> Result<()> {
        // Close first so the file is no longer held open
        let dropped = self.drop_entity_manager();

        if let Some(path) = self.database_file() {
            match std::fs::remove_file(path) {
                Ok(()) => tracing::debug!(path = %path.display(), "removed database file"),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "database file not removed")
                }
            }
        }
        dropped
    }

    // ==================== Schema ====================

    /// Reset the database, then create tables for exactly `entity_classes`
    pub fn load_schemas(&mut self, entity_classes: &[&str]) -> Result<&mut Self> {
        self.drop_database()?;

        let em = self.get_entity_manager()?;
        // Aliases and repeats resolve to one table each
        let mut seen = BTreeSet::new();
        let mut metadata = Vec::with_capacity(entity_classes.len());
        for name in entity_classes {
            let meta = em.class_metadata(name)?;
            if seen.insert(meta.name.clone()) {
                metadata.push(meta);
            }
        }
        SchemaTool::new(em).create_schema(&metadata)?;

        Ok(self)
    }

    /// Load the schemas of every entity the metadata driver maps
    pub fn auto_load_schemas(&mut self) -> Result<&mut Self> {
        let classes = self
            .get_entity_manager()?
            .configuration()
            .metadata_driver()
            .map(|driver| driver.all_class_names())
            .unwrap_or_default();
        let classes: Vec<&str> = classes.iter().map(String::as_str).collect();

        self.load_schemas(&classes)
    }

    // ==================== Query counting ====================

    pub fn reset_query_count(&mut self) {
        if let Some(log) = &self.query_log {
            self.query_baseline = log.len();
        }
    }

    /// Statements logged since the last reset. `None` until a log exists,
    /// which is not the same as zero.
    pub fn get_query_count(&self) -> Option<usize> {
        self.query_log
            .as_ref()
            .map(|log| log.len().saturating_sub(self.query_baseline))
    }

    // ==================== Fixtures ====================

    /// Reference repository of the current handle, created on first use
    pub fn get_fixture_reference_repo(&mut self) -> Result<&mut ReferenceRepository> {
        self.get_entity_manager()?;
        Ok(self.references.get_or_insert_with(ReferenceRepository::new))
    }

    /// Run the named fixtures and their dependencies. Unless `append` is
    /// set, mapped tables are purged first.
    pub fn load_fixtures(&mut self, fixture_classes: &[&str], append: bool) -> Result<&mut Self> {
        let mut loader = Loader::new(&self.fixtures);
        for name in fixture_classes {
            loader.add_fixture(name)?;
        }
        let fixtures = loader.into_fixtures()?;

        self.get_entity_manager()?;
        let references = self.references.get_or_insert_with(ReferenceRepository::new);
        let em = self
            .entity_manager
            .as_mut()
            .ok_or(HarnessError::NoActiveHandle)?;
        Executor::new(em, Some(Purger::new())).execute(&fixtures, references, append)?;

        Ok(self)
    }

    /// Append a single fixture on top of the existing rows
    pub fn load_fixture(&mut self, fixture_class: &str) -> Result<&mut Self> {
        self.load_fixtures(&[fixture_class], true)
    }

    // ==================== Events ====================

    pub fn add_lifecycle_event_listener(
        &mut self,
        events: &[LifecycleEvent],
        listener: Arc<dyn EventListener>,
    ) -> Result<&mut Self> {
        self.entity_manager
            .as_ref()
            .ok_or(HarnessError::NoActiveHandle)?
            .event_manager()
            .add_event_listener(events, listener);
        Ok(self)
    }

    pub fn add_lifecycle_event_subscriber<S>(&mut self, subscriber: Arc<S>) -> Result<&mut Self>
    where
        S: EventSubscriber + 'static,
    {
        self.entity_manager
            .as_ref()
            .ok_or(HarnessError::NoActiveHandle)?
            .event_manager()
            .add_event_subscriber(subscriber);
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::fixtures::testing::registry;
    use crate::orm::testing::{Note, app_config, catalog};
    use crate::orm::{EventArgs, Value};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_case() -> EntityTestCase {
        let mut provider = ResourceProvider::new(catalog());
        provider.set_config(app_config()).unwrap();
        EntityTestCase::new(provider).with_fixtures(registry())
    }

    #[test]
    fn test_get_entity_manager_is_idempotent() -> anyhow::Result<()> {
        let mut case = test_case();
        let first = case.get_entity_manager()?.handle_id();
        let second = case.get_entity_manager()?.handle_id();
        assert_eq!(first, second);

        let em = case.get_entity_manager()?;
        assert!(em.is_open());
        assert!(em.configuration().auto_generate_proxies());
        assert!(!em.configuration().metadata_cache().is_persistent());
        assert!(em.connection().params().is_in_memory());
        Ok(())
    }

    #[test]
    fn test_missing_mapping_driver() {
        let mut provider = ResourceProvider::new(catalog());
        provider.set_config(AppConfig::new()).unwrap();
        let mut case = EntityTestCase::new(provider);
        assert!(matches!(
            case.get_entity_manager(),
            Err(HarnessError::MissingMappingDriver { .. })
        ));
        assert!(!case.has_entity_manager());
        assert_eq!(case.get_query_count(), None);
    }

    #[test]
    fn test_missing_mapping_driver_leaves_no_file() -> anyhow::Result<()> {
        let dir = tempfile::TempDir::new()?;
        let path = dir.path().join("unmapped.db");
        let mut provider = ResourceProvider::new(catalog());
        provider.set_config(AppConfig::new())?;
        let mut case = EntityTestCase::new(provider).with_db_path(&path);

        assert!(case.get_entity_manager().is_err());
        assert!(!path.exists());
        Ok(())
    }

    #[test]
    fn test_unknown_configuration_key() {
        let mut case = test_case().with_configuration_key("orm_other");
        assert!(matches!(
            case.get_entity_manager(),
            Err(HarnessError::ServiceNotFound(name)) if name == "doctrine.eventmanager.orm_other"
        ));
    }

    #[test]
    fn test_set_up_creates_every_mapped_table() -> anyhow::Result<()> {
        let mut case = test_case();
        case.set_up()?;
        let em = case.get_entity_manager()?;
        assert!(em.connection().table_exists("notes")?);
        Ok(())
    }

    #[test]
    fn test_empty_schema_load_leaves_no_tables() -> anyhow::Result<()> {
        let mut case = test_case();
        case.set_up()?;
        case.load_schemas(&[])?;
        let em = case.get_entity_manager()?;
        assert!(em.connection().table_names()?.is_empty());
        assert!(em.find_all::<Note>().is_err());
        Ok(())
    }

    #[test]
    fn test_load_schemas_replaces_handle() -> anyhow::Result<()> {
        let mut case = test_case();
        let before = case.get_entity_manager()?.handle_id();
        case.load_schemas(&["Note"])?;
        assert_ne!(case.get_entity_manager()?.handle_id(), before);

        assert!(matches!(
            case.load_schemas(&["Boat"]),
            Err(HarnessError::UnknownEntity(_))
        ));
        Ok(())
    }

    #[test]
    fn test_query_count_window() -> anyhow::Result<()> {
        let mut case = test_case();
        assert_eq!(case.get_query_count(), None);

        case.set_up()?;
        case.reset_query_count();
        assert_eq!(case.get_query_count(), Some(0));

        let em = case.get_entity_manager()?;
        em.count::<Note>(&[])?;
        em.find_all::<Note>()?;
        assert_eq!(case.get_query_count(), Some(2));

        case.reset_query_count();
        assert_eq!(case.get_query_count(), Some(0));
        Ok(())
    }

    #[test]
    fn test_query_log_survives_new_handles() -> anyhow::Result<()> {
        let mut case = test_case();
        case.get_entity_manager()?;
        let log = case.query_log().cloned().unwrap();

        case.drop_entity_manager()?;
        let em = case.get_entity_manager()?;
        assert!(em.configuration().query_log().unwrap().shares_with(&log));
        Ok(())
    }

    #[test]
    fn test_fixtures_and_references() -> anyhow::Result<()> {
        let mut case = test_case();
        case.set_up()?;
        case.load_fixtures(&["PinnedNoteFixture"], false)?;

        let id = case.get_fixture_reference_repo()?.identifier("base-note");
        assert!(id.is_some());
        let pinned = case
            .get_entity_manager()?
            .find_by::<Note>(&[("pinned", Value::Integer(1))])?;
        assert_eq!(pinned.len(), 1);

        // Appending a fixture whose reference name is taken fails and
        // leaves the data as it was
        assert!(matches!(
            case.load_fixture("NoteFixture"),
            Err(HarnessError::DuplicateReference(_))
        ));
        assert_eq!(case.get_entity_manager()?.count::<Note>(&[])?, 1);

        assert!(matches!(
            case.load_fixture("Unregistered"),
            Err(HarnessError::FixtureClassNotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_references_are_dropped_with_handle() -> anyhow::Result<()> {
        let mut case = test_case();
        case.set_up()?;
        case.load_fixtures(&["NoteFixture"], false)?;
        assert!(case.get_fixture_reference_repo()?.has_reference("base-note"));

        case.drop_entity_manager()?;
        assert!(!case.has_entity_manager());
        assert!(case.get_fixture_reference_repo()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_listeners_need_a_handle() -> anyhow::Result<()> {
        let mut case = test_case();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let listener: Arc<dyn EventListener> =
            Arc::new(move |_: LifecycleEvent, _: &EventArgs| {
                counter.fetch_add(1, Ordering::SeqCst);
            });

        assert!(matches!(
            case.add_lifecycle_event_listener(&[LifecycleEvent::PostPersist], Arc::clone(&listener)),
            Err(HarnessError::NoActiveHandle)
        ));

        case.set_up()?;
        case.add_lifecycle_event_listener(&[LifecycleEvent::PostPersist], listener)?;
        let em = case.get_entity_manager()?;
        em.persist(&mut Note::new("heard"))?;
        em.flush()?;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[test]
    fn test_tear_down_keeps_closed_handle() -> anyhow::Result<()> {
        let mut case = test_case();
        case.set_up()?;
        let id = case.get_entity_manager()?.handle_id();

        case.tear_down()?;
        assert!(case.has_entity_manager());
        let em = case.get_entity_manager()?;
        assert_eq!(em.handle_id(), id);
        assert!(!em.is_open());
        Ok(())
    }

    #[test]
    fn test_resolver_from_config() -> anyhow::Result<()> {
        let config = app_config().merge(&AppConfig::from_value(json!({
            "doctrine": {
                "entity_resolver": {
                    "orm_default": { "resolvers": { "NoteInterface": "Note" } }
                }
            }
        }))?);
        let mut provider = ResourceProvider::new(catalog());
        provider.set_config(config)?;
        let mut case = EntityTestCase::new(provider);

        case.load_schemas(&["NoteInterface"])?;
        assert!(case.get_entity_manager()?.connection().table_exists("notes")?);

        case.load_schemas(&["NoteInterface", "Note"])?;
        assert_eq!(
            case.get_entity_manager()?.connection().table_names()?,
            vec!["notes".to_string()]
        );
        Ok(())
    }

    #[test]
    fn test_repeated_class_creates_one_table() -> anyhow::Result<()> {
        let mut case = test_case();
        case.load_schemas(&["Note", "Note"])?;
        let em = case.get_entity_manager()?;
        assert_eq!(em.connection().table_names()?, vec!["notes".to_string()]);
        assert_eq!(em.count::<Note>(&[])?, 0);
        Ok(())
    }

    #[test]
    fn test_database_file_suffix() {
        let case = |path: &str| test_case().with_db_path(path);
        assert!(case("cars.db").database_file().is_some());
        assert!(case("/tmp/.db").database_file().is_some());
        assert!(case("cars.sqlite").database_file().is_none());
        assert!(case("cars.db.bak").database_file().is_none());
        assert!(case("  ").database_file().is_none());
    }
}
