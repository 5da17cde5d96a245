//! Application configuration
//!
//! `AppConfig` is an opaque nested mapping that seeds the service container.
//! The harness only reads a handful of typed sections out of it; everything
//! else is carried through untouched.

use std::collections::BTreeMap;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{HarnessError, Result};

/// Name of the default ORM configuration key
pub const DEFAULT_CONFIGURATION_KEY: &str = "orm_default";

/// Nested application settings, always rooted at a JSON object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Value", into = "Value")]
pub struct AppConfig {
    root: Map<String, Value>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TryFrom<Value> for AppConfig {
    type Error = HarnessError;

    fn try_from(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            other => Err(HarnessError::InvalidConfig(format!(
                "expected a mapping at the root, found {}",
                kind_of(&other)
            ))),
        }
    }
}

impl From<AppConfig> for Value {
    fn from(config: AppConfig) -> Self {
        Value::Object(config.root)
    }
}

impl AppConfig {
    pub fn new() -> Self {
        Self { root: Map::new() }
    }

    pub fn from_value(value: Value) -> Result<Self> {
        Self::try_from(value)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(content)?;
        Self::try_from(value)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let value: Value = toml::from_str(content)?;
        Self::try_from(value)
    }

    /// Load a config file, picking the format from its extension (`.toml`
    /// or anything else as JSON)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading application config");

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            _ => Self::from_json_str(&content),
        }
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    /// Look up a nested value by its path segments
    pub fn get(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.root.get(*first)?, |value, segment| value.get(segment))
    }

    /// Set a nested value, creating intermediate mappings as needed.
    /// Non-mapping values along the way are replaced.
    pub fn set(&mut self, path: &[&str], value: Value) {
        let Some((last, parents)) = path.split_last() else {
            return;
        };

        let mut current = &mut self.root;
        for segment in parents {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !entry.is_object() {
                *entry = Value::Object(Map::new());
            }
            let Value::Object(map) = entry else {
                return;
            };
            current = map;
        }
        current.insert(last.to_string(), value);
    }

    /// Keys of the mapping at `path`, empty when absent or not a mapping
    pub fn keys(&self, path: &[&str]) -> Vec<String> {
        match self.get(path) {
            Some(Value::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Deserialize the section at `path`, falling back to its default when
    /// the section is absent
    pub fn section<T>(&self, path: &[&str]) -> Result<T>
    where
        T: DeserializeOwned + Default,
    {
        match self.get(path) {
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                HarnessError::InvalidConfig(format!("section `{}`: {}", path.join("."), e))
            }),
            None => Ok(T::default()),
        }
    }

    /// Deep-merge `overrides` into this config. Mappings merge key by key;
    /// any other value in `overrides` replaces the existing one.
    pub fn merge(mut self, overrides: &AppConfig) -> Self {
        merge_maps(&mut self.root, &overrides.root);
        self
    }

    pub fn config_cache_enabled(&self) -> Option<bool> {
        self.get(&["module_listener_options", "config_cache_enabled"])
            .and_then(Value::as_bool)
    }

    /// Force `module_listener_options.config_cache_enabled` off when the
    /// flag is present. Returns whether the flag was found.
    pub fn disable_config_cache(&mut self) -> bool {
        let path = ["module_listener_options", "config_cache_enabled"];
        if self.get(&path).is_none() {
            return false;
        }
        self.set(&path, Value::Bool(false));
        true
    }
}

fn merge_maps(target: &mut Map<String, Value>, source: &Map<String, Value>) {
    for (key, value) in source {
        match (target.get_mut(key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => {
                merge_maps(existing, incoming)
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}

/// `doctrine.entitymanager.<key>`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityManagerOptions {
    /// Short name of the ORM configuration to use
    #[serde(default)]
    pub configuration: Option<String>,
    /// Short name of the entity resolver to initialise
    #[serde(default)]
    pub entity_resolver: Option<String>,
}

impl EntityManagerOptions {
    /// Read the options for `key`, defaulting both references to `key`
    pub fn for_key(config: &AppConfig, key: &str) -> Result<Self> {
        let mut options: Self = config.section(&["doctrine", "entitymanager", key])?;
        options.configuration.get_or_insert_with(|| key.to_string());
        options.entity_resolver.get_or_insert_with(|| key.to_string());
        Ok(options)
    }

    pub fn configuration_service(&self) -> String {
        format!(
            "doctrine.configuration.{}",
            self.configuration.as_deref().unwrap_or(DEFAULT_CONFIGURATION_KEY)
        )
    }

    pub fn entity_resolver_service(&self) -> String {
        format!(
            "doctrine.entity_resolver.{}",
            self.entity_resolver.as_deref().unwrap_or(DEFAULT_CONFIGURATION_KEY)
        )
    }
}

/// `doctrine.configuration.<key>`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConfigurationOptions {
    /// Name of the `doctrine.driver.<name>` section holding the mappings
    #[serde(default)]
    pub driver: Option<String>,
    #[serde(default = "default_cache")]
    pub metadata_cache: String,
    #[serde(default = "default_cache")]
    pub query_cache: String,
    #[serde(default = "default_cache")]
    pub result_cache: String,
    #[serde(default = "default_cache")]
    pub hydration_cache: String,
    #[serde(default)]
    pub generate_proxies: bool,
}

fn default_cache() -> String {
    "array".to_string()
}

impl Default for ConfigurationOptions {
    fn default() -> Self {
        Self {
            driver: None,
            metadata_cache: default_cache(),
            query_cache: default_cache(),
            result_cache: default_cache(),
            hydration_cache: default_cache(),
            generate_proxies: false,
        }
    }
}

/// `doctrine.driver.<name>`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DriverOptions {
    /// Entity names served by this driver; `None` maps every known entity
    #[serde(default)]
    pub entities: Option<Vec<String>>,
}

/// `doctrine.entity_resolver.<key>`
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct EntityResolverOptions {
    /// Alias -> concrete entity name
    #[serde(default)]
    pub resolvers: BTreeMap<String, String>,
}
