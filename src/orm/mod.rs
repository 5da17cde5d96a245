//! Minimal ORM layer the harness coordinates
//!
//! - `metadata`: entity catalog, metadata driver and target-entity resolver
//! - `configuration`: per-key ORM configuration (driver, caches, query log)
//! - `connection`: logged SQLite connection
//! - `query_log`: shared statement log
//! - `events`: lifecycle event dispatcher
//! - `schema`: schema creation from entity metadata
//! - `entity_manager`: persistence operations bound to one connection

mod configuration;
mod connection;
mod entity_manager;
mod events;
mod metadata;
mod query_log;
mod schema;

pub use configuration::{CacheKind, OrmConfiguration};
pub use connection::{Connection, ConnectionParams, SQLITE_ENGINE};
pub use entity_manager::EntityManager;
pub use events::{EventArgs, EventListener, EventManager, EventSubscriber, LifecycleEvent};
pub use metadata::{EntityCatalog, EntityResolver, MetadataDriver};
pub use query_log::{LoggedQuery, QueryLog};
pub use rusqlite::types::Value;
pub use schema::SchemaTool;
pub(crate) use schema::quote_identifier;

/// Storage type of a mapped column
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Boolean,
    Blob,
}

impl ColumnType {
    /// SQLite type name used in generated DDL
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Integer | Self::Boolean => "INTEGER",
            Self::Real => "REAL",
            Self::Text => "TEXT",
            Self::Blob => "BLOB",
        }
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Integer => write!(f, "integer"),
            Self::Real => write!(f, "real"),
            Self::Text => write!(f, "string"),
            Self::Boolean => write!(f, "boolean"),
            Self::Blob => write!(f, "blob"),
        }
    }
}

/// A mapped, non-identifier column
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMapping {
    pub name: String,
    pub kind: ColumnType,
    pub nullable: bool,
}

impl ColumnMapping {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }
}

/// Schema description of one entity: its table, generated integer
/// identifier and remaining columns in row order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub id_column: String,
    pub columns: Vec<ColumnMapping>,
}

impl EntityMetadata {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            id_column: "id".to_string(),
            columns: Vec::new(),
        }
    }

    pub fn with_id_column(mut self, column: impl Into<String>) -> Self {
        self.id_column = column.into();
        self
    }

    pub fn with_column(mut self, column: ColumnMapping) -> Self {
        self.columns.push(column);
        self
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.id_column == name || self.columns.iter().any(|c| c.name == name)
    }

    /// Identifier followed by every column, in row order
    pub fn column_names(&self) -> Vec<&str> {
        std::iter::once(self.id_column.as_str())
            .chain(self.columns.iter().map(|c| c.name.as_str()))
            .collect()
    }
}

/// A Rust type persisted through the entity manager.
///
/// `from_row` receives rows whose columns follow
/// [`EntityMetadata::column_names`]: the identifier first, then `values()`
/// order.
pub trait Entity: Sized {
    /// Name the metadata driver knows this entity by
    const NAME: &'static str;

    fn metadata() -> EntityMetadata;

    fn id(&self) -> Option<i64>;

    fn set_id(&mut self, id: i64);

    /// Values of the non-identifier columns, in metadata order
    fn values(&self) -> Vec<Value>;

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self>;
}

#[cfg(test)]
pub(crate) mod testing {
    //! Small entity used by unit tests across the crate

    use super::*;
    use crate::config::AppConfig;

    #[derive(Debug, Clone, PartialEq)]
    pub struct Note {
        pub id: Option<i64>,
        pub title: String,
        pub pinned: bool,
    }

    impl Note {
        pub fn new(title: &str) -> Self {
            Self {
                id: None,
                title: title.to_string(),
                pinned: false,
            }
        }
    }

    impl Entity for Note {
        const NAME: &'static str = "Note";

        fn metadata() -> EntityMetadata {
            EntityMetadata::new(Self::NAME, "notes")
                .with_column(ColumnMapping::new("title", ColumnType::Text))
                .with_column(ColumnMapping::new("pinned", ColumnType::Boolean))
        }

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn values(&self) -> Vec<Value> {
            vec![
                Value::Text(self.title.clone()),
                Value::Integer(self.pinned as i64),
            ]
        }

        fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: Some(row.get(0)?),
                title: row.get(1)?,
                pinned: row.get(2)?,
            })
        }
    }

    pub fn catalog() -> EntityCatalog {
        let mut catalog = EntityCatalog::new();
        catalog.register::<Note>();
        catalog
    }

    /// Minimal config mapping every catalog entity under `orm_default`
    pub fn app_config() -> AppConfig {
        AppConfig::from_value(serde_json::json!({
            "module_listener_options": { "config_cache_enabled": true },
            "doctrine": { "driver": { "orm_default": {} } }
        }))
        .unwrap()
    }

    /// An open in-memory entity manager with the `notes` table created
    pub fn entity_manager() -> EntityManager {
        let driver = MetadataDriver::from_catalog(&catalog(), None).unwrap();
        let mut config = OrmConfiguration::new("orm_default", Some(driver));
        let log = QueryLog::new();
        config.set_query_log(Some(log.clone()));
        let conn = Connection::open(ConnectionParams::in_memory(), Some(log)).unwrap();
        let mut em =
            EntityManager::create(conn, config, EventManager::new(), EntityResolver::default())
                .unwrap();
        let meta = em.class_metadata(Note::NAME).unwrap();
        SchemaTool::new(&mut em).create_schema(&[meta]).unwrap();
        em
    }
}
