//! Lazily built service container over the application config

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::config::{
    AppConfig, ConfigurationOptions, DEFAULT_CONFIGURATION_KEY, DriverOptions,
    EntityResolverOptions,
};
use crate::error::{HarnessError, Result};
use crate::orm::{EntityCatalog, EntityResolver, EventManager, MetadataDriver, OrmConfiguration};

pub const CONFIG_SERVICE: &str = "config";

/// Name of the `kind` service registered for configuration `key`
pub fn service_name(kind: &str, key: &str) -> String {
    format!("doctrine.{}.{}", kind, key)
}

/// A value held by the container
#[derive(Debug, Clone)]
pub enum Service {
    Config(Arc<AppConfig>),
    EventManager(EventManager),
    Configuration(OrmConfiguration),
    EntityResolver(EntityResolver),
}

impl Service {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::EventManager(_) => "event manager",
            Self::Configuration(_) => "ORM configuration",
            Self::EntityResolver(_) => "entity resolver",
        }
    }

    fn unexpected(name: &str, expected: &'static str) -> HarnessError {
        HarnessError::UnexpectedService {
            name: name.to_string(),
            expected,
        }
    }

    pub fn into_config(self, name: &str) -> Result<Arc<AppConfig>> {
        match self {
            Self::Config(config) => Ok(config),
            _ => Err(Self::unexpected(name, "config")),
        }
    }

    pub fn into_event_manager(self, name: &str) -> Result<EventManager> {
        match self {
            Self::EventManager(events) => Ok(events),
            _ => Err(Self::unexpected(name, "event manager")),
        }
    }

    pub fn into_configuration(self, name: &str) -> Result<OrmConfiguration> {
        match self {
            Self::Configuration(config) => Ok(config),
            _ => Err(Self::unexpected(name, "ORM configuration")),
        }
    }

    pub fn into_entity_resolver(self, name: &str) -> Result<EntityResolver> {
        match self {
            Self::EntityResolver(resolver) => Ok(resolver),
            _ => Err(Self::unexpected(name, "entity resolver")),
        }
    }
}

/// Services keyed by name. Event managers are shared with every caller;
/// configurations and resolvers are handed out as copies.
#[derive(Debug)]
pub struct Container {
    services: BTreeMap<String, Service>,
}

impl Container {
    pub fn build(config: &AppConfig, catalog: &EntityCatalog) -> Result<Self> {
        let mut services = BTreeMap::new();
        services.insert(
            CONFIG_SERVICE.to_string(),
            Service::Config(Arc::new(config.clone())),
        );

        for key in section_keys(config, "eventmanager") {
            services.insert(
                service_name("eventmanager", &key),
                Service::EventManager(EventManager::new()),
            );
        }

        for key in section_keys(config, "configuration") {
            let options: ConfigurationOptions =
                config.section(&["doctrine", "configuration", key.as_str()])?;
            let driver_key = options.driver.clone().unwrap_or_else(|| key.clone());
            let driver = match config.get(&["doctrine", "driver", driver_key.as_str()]) {
                Some(_) => {
                    let driver_options: DriverOptions =
                        config.section(&["doctrine", "driver", driver_key.as_str()])?;
                    Some(MetadataDriver::from_catalog(
                        catalog,
                        driver_options.entities.as_deref(),
                    )?)
                }
                None => None,
            };
            tracing::debug!(
                configuration = %key,
                driver = %driver_key,
                mapped = ?driver.as_ref().map(|d| d.mappings().len()),
                "registered ORM configuration"
            );
            services.insert(
                service_name("configuration", &key),
                Service::Configuration(OrmConfiguration::from_options(&key, &options, driver)),
            );
        }

        for key in section_keys(config, "entity_resolver") {
            let options: EntityResolverOptions =
                config.section(&["doctrine", "entity_resolver", key.as_str()])?;
            services.insert(
                service_name("entity_resolver", &key),
                Service::EntityResolver(EntityResolver::new(options.resolvers)),
            );
        }

        tracing::debug!(services = services.len(), "built container");
        Ok(Self { services })
    }

    pub fn has(&self, name: &str) -> bool {
        self.services.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Result<Service> {
        self.services
            .get(name)
            .cloned()
            .ok_or_else(|| HarnessError::ServiceNotFound(name.to_string()))
    }

    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }
}

/// Keys of `doctrine.<section>` plus the default key
fn section_keys(config: &AppConfig, section: &str) -> BTreeSet<String> {
    let mut keys: BTreeSet<String> = config.keys(&["doctrine", section]).into_iter().collect();
    keys.insert(DEFAULT_CONFIGURATION_KEY.to_string());
    keys
}

/// Holds the application config and builds the container from it on
/// first use
#[derive(Debug)]
pub struct ResourceProvider {
    catalog: EntityCatalog,
    config: Option<AppConfig>,
    container: Option<Container>,
}

impl ResourceProvider {
    pub fn new(catalog: EntityCatalog) -> Self {
        Self {
            catalog,
            config: None,
            container: None,
        }
    }

    /// Replace the application config. Config caching is switched off when
    /// the config carries the flag. Fails once the container exists.
    pub fn set_config(&mut self, mut config: AppConfig) -> Result<&mut Self> {
        if self.container.is_some() {
            return Err(HarnessError::AlreadyBuilt);
        }
        if config.disable_config_cache() {
            tracing::debug!("disabled config cache");
        }
        self.config = Some(config);
        Ok(self)
    }

    pub fn config(&self) -> Option<&AppConfig> {
        self.config.as_ref()
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn is_built(&self) -> bool {
        self.container.is_some()
    }

    /// The container, built on the first call
    pub fn container(&mut self) -> Result<&Container> {
        if self.container.is_none() {
            let config = self
                .config
                .as_ref()
                .ok_or(HarnessError::MissingApplicationConfig)?;
            self.container = Some(Container::build(config, &self.catalog)?);
        }
        self.container
            .as_ref()
            .ok_or(HarnessError::MissingApplicationConfig)
    }

    pub fn service(&mut self, name: &str) -> Result<Service> {
        self.container()?.get(name)
    }
}
