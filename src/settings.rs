//! Engine tunables.
//!
//! Limits live in the [`ConfigRegistry`](crate::registry::ConfigRegistry);
//! these settings control how the engine itself behaves. They deserialize
//! from JSON with every field optional.
//!
//! ```ignore
//! use admission_ratelimit::Settings;
//!
//! let settings = Settings::from_json(r#"{ "backend_timeout_ms": 25, "trusted_proxy_hops": 1 }"#)?;
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::key::ClientIpResolver;
use crate::storage::GcConfig;

/// Engine-level settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound on one distributed backend call.
    pub backend_timeout_ms: u64,
    /// How long a backend availability check result is reused.
    pub availability_ttl_ms: u64,
    /// Length of each top-N ranking.
    pub top_n: usize,
    /// Maximum names tallied per ranking before the tail is pruned.
    pub max_tracked: usize,
    /// Number of trusted proxies in front of the service, if known.
    pub trusted_proxy_hops: Option<usize>,
    /// Fallback store eviction.
    pub gc: GcConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 50,
            availability_ttl_ms: 1000,
            top_n: 10,
            max_tracked: 10_000,
            trusted_proxy_hops: None,
            gc: GcConfig::default(),
        }
    }
}

impl Settings {
    /// Parse settings from JSON and validate them.
    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Check value ranges.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.backend_timeout_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "backend_timeout_ms must be greater than 0".into(),
            ));
        }
        if self.top_n == 0 {
            return Err(ConfigError::InvalidConfig("top_n must be greater than 0".into()));
        }
        if self.max_tracked < self.top_n {
            return Err(ConfigError::InvalidConfig(
                "max_tracked must be at least top_n".into(),
            ));
        }
        Ok(())
    }

    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(self.backend_timeout_ms)
    }

    pub fn availability_ttl(&self) -> Duration {
        Duration::from_millis(self.availability_ttl_ms)
    }

    /// Client address resolver matching `trusted_proxy_hops`.
    pub fn ip_resolver(&self) -> ClientIpResolver {
        match self.trusted_proxy_hops {
            Some(hops) => ClientIpResolver::trusted_hops(hops),
            None => ClientIpResolver::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::GcInterval;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.backend_timeout(), Duration::from_millis(50));
        assert_eq!(settings.availability_ttl(), Duration::from_secs(1));
        assert_eq!(settings.top_n, 10);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let settings =
            Settings::from_json(r#"{ "backend_timeout_ms": 25, "trusted_proxy_hops": 1 }"#).unwrap();
        assert_eq!(settings.backend_timeout_ms, 25);
        assert_eq!(settings.trusted_proxy_hops, Some(1));
        assert_eq!(settings.max_tracked, 10_000);
    }

    #[test]
    fn test_from_json_gc() {
        let settings = Settings::from_json(
            r#"{ "gc": { "interval": { "requests": 500 }, "max_entries": 1000 } }"#,
        )
        .unwrap();
        assert_eq!(settings.gc.interval, GcInterval::Requests(500));
        assert_eq!(settings.gc.max_entries, Some(1000));
    }

    #[test]
    fn test_from_json_errors() {
        assert!(Settings::from_json("not json").is_err());
        assert!(Settings::from_json(r#"{ "top_n": 0 }"#).is_err());
        assert!(Settings::from_json(r#"{ "top_n": 20, "max_tracked": 5 }"#).is_err());
    }
}
