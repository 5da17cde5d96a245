//! Error taxonomy for the harness and its collaborators

use thiserror::Error;

pub type Result<T, E = HarnessError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("application config can not be set, the container is already built")]
    AlreadyBuilt,

    #[error("no application config has been set")]
    MissingApplicationConfig,

    #[error("ORM configuration `{configuration}` has no metadata driver")]
    MissingMappingDriver { configuration: String },

    #[error("could not locate the fixture `{0}`, ensure it is registered")]
    FixtureClassNotFound(String),

    #[error("establish the entity manager with get_entity_manager() before adding event listeners")]
    NoActiveHandle,

    #[error("service `{0}` not found in container")]
    ServiceNotFound(String),

    #[error("service `{name}` is not a {expected}")]
    UnexpectedService { name: String, expected: &'static str },

    #[error("entity `{0}` is not mapped")]
    UnknownEntity(String),

    #[error("entity `{entity}` has no column `{column}`")]
    UnknownColumn { entity: String, column: String },

    #[error("entity `{0}` has no identifier, persist it first")]
    MissingIdentifier(String),

    #[error("circular fixture dependency involving `{0}`")]
    CircularFixtureDependency(String),

    #[error("reference `{0}` already exists, use set_reference to overwrite it")]
    DuplicateReference(String),

    #[error("reference `{0}` does not exist")]
    UnknownReference(String),

    #[error("fixture `{name}` failed")]
    Fixture {
        name: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("there is no active transaction")]
    NoActiveTransaction,

    #[error("connection is closed")]
    ConnectionClosed,

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}
