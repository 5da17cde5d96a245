//! ORM configuration for one configuration key

use std::sync::Arc;

use crate::config::ConfigurationOptions;

use super::{MetadataDriver, QueryLog};

/// Where a cache keeps its entries
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CacheKind {
    /// Process-local, discarded with the handle
    #[default]
    Ephemeral,
    /// Backed by a named persistent store (filesystem, apcu, redis, ...)
    Persistent(String),
}

impl CacheKind {
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl From<&str> for CacheKind {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "" | "array" | "memory" => Self::Ephemeral,
            other => Self::Persistent(other.to_string()),
        }
    }
}

impl std::fmt::Display for CacheKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ephemeral => write!(f, "array"),
            Self::Persistent(backend) => write!(f, "{}", backend),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct OrmConfiguration {
    name: String,
    metadata_driver: Option<Arc<MetadataDriver>>,
    metadata_cache: CacheKind,
    query_cache: CacheKind,
    result_cache: CacheKind,
    hydration_cache: CacheKind,
    auto_generate_proxies: bool,
    query_log: Option<QueryLog>,
}

impl OrmConfiguration {
    pub fn new(name: impl Into<String>, metadata_driver: Option<MetadataDriver>) -> Self {
        Self {
            name: name.into(),
            metadata_driver: metadata_driver.map(Arc::new),
            ..Self::default()
        }
    }

    pub fn from_options(
        name: impl Into<String>,
        options: &ConfigurationOptions,
        driver: Option<MetadataDriver>,
    ) -> Self {
        Self {
            name: name.into(),
            metadata_driver: driver.map(Arc::new),
            metadata_cache: CacheKind::from(options.metadata_cache.as_str()),
            query_cache: CacheKind::from(options.query_cache.as_str()),
            result_cache: CacheKind::from(options.result_cache.as_str()),
            hydration_cache: CacheKind::from(options.hydration_cache.as_str()),
            auto_generate_proxies: options.generate_proxies,
            query_log: None,
        }
    }

    /// Configuration key this configuration was built for
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metadata_driver(&self) -> Option<&MetadataDriver> {
        self.metadata_driver.as_deref()
    }

    pub fn set_metadata_driver(&mut self, driver: Option<MetadataDriver>) {
        self.metadata_driver = driver.map(Arc::new);
    }

    pub fn metadata_cache(&self) -> &CacheKind {
        &self.metadata_cache
    }

    pub fn query_cache(&self) -> &CacheKind {
        &self.query_cache
    }

    pub fn result_cache(&self) -> &CacheKind {
        &self.result_cache
    }

    pub fn hydration_cache(&self) -> &CacheKind {
        &self.hydration_cache
    }

    pub fn set_metadata_cache(&mut self, cache: CacheKind) {
        self.metadata_cache = cache;
    }

    pub fn set_query_cache(&mut self, cache: CacheKind) {
        self.query_cache = cache;
    }

    pub fn set_result_cache(&mut self, cache: CacheKind) {
        self.result_cache = cache;
    }

    pub fn set_hydration_cache(&mut self, cache: CacheKind) {
        self.hydration_cache = cache;
    }

    /// Swap every cache for a process-local one
    pub fn use_ephemeral_caches(&mut self) {
        self.metadata_cache = CacheKind::Ephemeral;
        self.query_cache = CacheKind::Ephemeral;
        self.result_cache = CacheKind::Ephemeral;
        self.hydration_cache = CacheKind::Ephemeral;
    }

    pub fn auto_generate_proxies(&self) -> bool {
        self.auto_generate_proxies
    }

    pub fn set_auto_generate_proxies(&mut self, enabled: bool) {
        self.auto_generate_proxies = enabled;
    }

    pub fn query_log(&self) -> Option<&QueryLog> {
        self.query_log.as_ref()
    }

    pub fn set_query_log(&mut self, log: Option<QueryLog>) {
        self.query_log = log;
    }
}
