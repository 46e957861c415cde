//! Named configuration registry.
//!
//! The registry is built once at startup and is read-only afterwards, so
//! lookups need no locking.
//!
//! # Example
//!
//! ```ignore
//! use admission_ratelimit::{ConfigRegistry, RateLimitConfig};
//!
//! let registry = ConfigRegistry::builder()
//!     .with_presets()
//!     .register("reports-api", RateLimitConfig::per_minute(5))
//!     .build()?;
//!
//! assert!(registry.lookup("PAYMENT_API").is_ok());
//! ```

use std::collections::HashMap;

use crate::config::{Preset, RateLimitConfig};
use crate::error::{ConfigError, Result};

/// Canonical form of a config name: ASCII lowercase with `_` read as `-`.
pub fn normalize_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| match c {
            '_' => '-',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

/// Read-only map from config name to config.
#[derive(Debug, Clone, Default)]
pub struct ConfigRegistry {
    configs: HashMap<String, RateLimitConfig>,
}

impl ConfigRegistry {
    /// Create a new registry builder.
    pub fn builder() -> ConfigRegistryBuilder {
        ConfigRegistryBuilder::new()
    }

    /// A registry holding only the built-in presets.
    pub fn with_presets() -> Self {
        let configs = Preset::ALL
            .iter()
            .map(|preset| (preset.name().to_string(), preset.config()))
            .collect();
        Self { configs }
    }

    /// Find the config registered under `name`.
    pub fn lookup(&self, name: &str) -> std::result::Result<&RateLimitConfig, ConfigError> {
        if let Some(config) = self.configs.get(name) {
            return Ok(config);
        }
        self.configs
            .get(&normalize_name(name))
            .ok_or_else(|| ConfigError::NotFound(name.to_string()))
    }

    /// Whether `name` resolves to a config.
    pub fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_ok()
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.configs.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// Builder for [`ConfigRegistry`].
#[derive(Debug, Default)]
pub struct ConfigRegistryBuilder {
    configs: Vec<(String, RateLimitConfig)>,
}

impl ConfigRegistryBuilder {
    /// Create a new empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add every built-in preset.
    pub fn with_presets(mut self) -> Self {
        for preset in Preset::ALL {
            self.configs.push((preset.name().to_string(), preset.config()));
        }
        self
    }

    /// Register `config` under `name`, replacing any earlier entry.
    pub fn register(mut self, name: impl AsRef<str>, config: RateLimitConfig) -> Self {
        self.configs.push((normalize_name(name.as_ref()), config));
        self
    }

    /// Validate every config and build the registry.
    pub fn build(self) -> Result<ConfigRegistry> {
        let mut configs = HashMap::with_capacity(self.configs.len());
        for (name, config) in self.configs {
            if name.is_empty() {
                return Err(ConfigError::MissingRequired("config name".into()).into());
            }
            config.validate().map_err(|e| match e {
                ConfigError::InvalidConfig(msg) => {
                    ConfigError::InvalidConfig(format!("{name}: {msg}"))
                }
                other => other,
            })?;
            configs.insert(name, config);
        }
        Ok(ConfigRegistry { configs })
    }
}
