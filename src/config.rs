//! Limit configuration and the built-in presets.
//!
//! A `RateLimitConfig` defines how many requests a key may make over a
//! fixed window, which path counts them, and what happens on a block.
//!
//! # Examples
//!
//! ```ignore
//! use admission_ratelimit::config::{ConfigOverride, Preset, RateLimitConfig};
//! use std::time::Duration;
//!
//! // 100 requests per minute
//! let config = RateLimitConfig::per_minute(100);
//!
//! // A preset with a tighter limit for one route
//! let strict = Preset::PublicApi
//!     .config()
//!     .merged(&ConfigOverride::new().max_requests(20))?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use crate::decision::Decision;
use crate::error::{ConfigError, Result};
use crate::key::KeyGenerator;

/// Message returned to blocked callers when a config sets none.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Callback invoked synchronously when a request is blocked.
///
/// Panics raised here are contained by the engine.
pub trait LimitReachedHook: Send + Sync + 'static {
    /// Called with the partition key and the blocking decision.
    fn on_limit_reached(&self, key: &str, decision: &Decision);
}

impl<F> LimitReachedHook for F
where
    F: Fn(&str, &Decision) + Send + Sync + 'static,
{
    fn on_limit_reached(&self, key: &str, decision: &Decision) {
        self(key, decision)
    }
}

/// Hook that emits a `tracing` warning for every block.
#[derive(Debug, Clone, Copy, Default)]
pub struct WarnOnLimit {
    label: &'static str,
}

impl WarnOnLimit {
    /// Create a hook tagging its events with `label`.
    pub fn new(label: &'static str) -> Self {
        Self { label }
    }
}

impl LimitReachedHook for WarnOnLimit {
    fn on_limit_reached(&self, key: &str, decision: &Decision) {
        warn!(
            label = self.label,
            key,
            count = decision.info().count,
            limit = decision.info().limit,
            "Limit reached"
        );
    }
}

/// Admission limits for one class of endpoints.
///
/// Immutable once registered; per-route changes go through
/// [`RateLimitConfig::merged`].
#[derive(Clone)]
pub struct RateLimitConfig {
    window: Duration,
    max_requests: u64,
    enable_distributed_backend: bool,
    enable_metrics: bool,
    enable_logging: bool,
    message: String,
    on_limit_reached: Option<Arc<dyn LimitReachedHook>>,
    key_generator: Option<Arc<dyn KeyGenerator>>,
}

impl fmt::Debug for RateLimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitConfig")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field("enable_distributed_backend", &self.enable_distributed_backend)
            .field("enable_metrics", &self.enable_metrics)
            .field("enable_logging", &self.enable_logging)
            .field("message", &self.message)
            .field("on_limit_reached", &self.on_limit_reached.is_some())
            .field(
                "key_generator",
                &self.key_generator.as_ref().map(|k| k.name()),
            )
            .finish()
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(60)
    }
}

impl RateLimitConfig {
    /// Create a config allowing `max_requests` per `window`.
    ///
    /// The distributed backend, metrics and logging are enabled. Values are
    /// checked when the config is registered or merged; use
    /// [`RateLimitConfig::try_new`] to check them up front.
    pub fn new(max_requests: u64, window: Duration) -> Self {
        Self {
            window,
            max_requests,
            enable_distributed_backend: true,
            enable_metrics: true,
            enable_logging: true,
            message: DEFAULT_MESSAGE.to_string(),
            on_limit_reached: None,
            key_generator: None,
        }
    }

    /// Create a config, rejecting a zero limit or an empty window.
    pub fn try_new(max_requests: u64, window: Duration) -> Result<Self> {
        let config = Self::new(max_requests, window);
        config.validate()?;
        Ok(config)
    }

    /// Create a config allowing `n` requests per second.
    pub fn per_second(n: u64) -> Self {
        Self::new(n, Duration::from_secs(1))
    }

    /// Create a config allowing `n` requests per minute.
    pub fn per_minute(n: u64) -> Self {
        Self::new(n, Duration::from_secs(60))
    }

    /// Create a config allowing `n` requests per hour.
    pub fn per_hour(n: u64) -> Self {
        Self::new(n, Duration::from_secs(3600))
    }

    /// Check the invariants every registered config must hold.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_requests == 0 {
            return Err(ConfigError::InvalidConfig(
                "max_requests must be greater than 0".into(),
            ));
        }
        if self.window.is_zero() {
            return Err(ConfigError::InvalidConfig("window must be non-zero".into()));
        }
        Ok(())
    }

    /// Count with the distributed backend when it is reachable.
    pub fn with_distributed_backend(mut self, enabled: bool) -> Self {
        self.enable_distributed_backend = enabled;
        self
    }

    /// Record decisions in the metrics collector.
    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = enabled;
        self
    }

    /// Log blocks and forward audit events.
    pub fn with_logging(mut self, enabled: bool) -> Self {
        self.enable_logging = enabled;
        self
    }

    /// Message returned to blocked callers.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Hook called on every block.
    pub fn with_hook(mut self, hook: impl LimitReachedHook) -> Self {
        self.on_limit_reached = Some(Arc::new(hook));
        self
    }

    /// Key generator for this config. The hybrid generator is used when unset.
    pub fn with_key_generator(mut self, generator: impl KeyGenerator) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    /// Get the window duration.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Get the maximum requests allowed per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    pub fn distributed_backend_enabled(&self) -> bool {
        self.enable_distributed_backend
    }

    pub fn metrics_enabled(&self) -> bool {
        self.enable_metrics
    }

    pub fn logging_enabled(&self) -> bool {
        self.enable_logging
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn hook(&self) -> Option<&Arc<dyn LimitReachedHook>> {
        self.on_limit_reached.as_ref()
    }

    pub fn key_generator(&self) -> Option<&Arc<dyn KeyGenerator>> {
        self.key_generator.as_ref()
    }

    /// Apply `overrides` field by field and validate the result.
    ///
    /// `self` is left untouched.
    pub fn merged(&self, overrides: &ConfigOverride) -> Result<Self> {
        let mut config = self.clone();
        if let Some(window) = overrides.window {
            config.window = window;
        }
        if let Some(max) = overrides.max_requests {
            config.max_requests = max;
        }
        if let Some(generator) = &overrides.key_generator {
            config.key_generator = Some(generator.clone());
        }
        if let Some(enabled) = overrides.enable_distributed_backend {
            config.enable_distributed_backend = enabled;
        }
        if let Some(enabled) = overrides.enable_metrics {
            config.enable_metrics = enabled;
        }
        if let Some(enabled) = overrides.enable_logging {
            config.enable_logging = enabled;
        }
        if let Some(message) = &overrides.message {
            config.message = message.clone();
        }
        if let Some(hook) = &overrides.on_limit_reached {
            config.on_limit_reached = Some(hook.clone());
        }
        config.validate()?;
        Ok(config)
    }
}

/// Per-call changes to a registered config.
#[derive(Clone, Default)]
pub struct ConfigOverride {
    window: Option<Duration>,
    max_requests: Option<u64>,
    key_generator: Option<Arc<dyn KeyGenerator>>,
    enable_distributed_backend: Option<bool>,
    enable_metrics: Option<bool>,
    enable_logging: Option<bool>,
    message: Option<String>,
    on_limit_reached: Option<Arc<dyn LimitReachedHook>>,
}

impl fmt::Debug for ConfigOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigOverride")
            .field("window", &self.window)
            .field("max_requests", &self.max_requests)
            .field(
                "key_generator",
                &self.key_generator.as_ref().map(|k| k.name()),
            )
            .field("enable_distributed_backend", &self.enable_distributed_backend)
            .field("enable_metrics", &self.enable_metrics)
            .field("enable_logging", &self.enable_logging)
            .field("message", &self.message)
            .field("on_limit_reached", &self.on_limit_reached.is_some())
            .finish()
    }
}

impl ConfigOverride {
    /// An override that changes nothing.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn max_requests(mut self, max: u64) -> Self {
        self.max_requests = Some(max);
        self
    }

    pub fn key_generator(mut self, generator: impl KeyGenerator) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    pub fn distributed_backend(mut self, enabled: bool) -> Self {
        self.enable_distributed_backend = Some(enabled);
        self
    }

    pub fn metrics(mut self, enabled: bool) -> Self {
        self.enable_metrics = Some(enabled);
        self
    }

    pub fn logging(mut self, enabled: bool) -> Self {
        self.enable_logging = Some(enabled);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn on_limit_reached(mut self, hook: impl LimitReachedHook) -> Self {
        self.on_limit_reached = Some(Arc::new(hook));
        self
    }

    /// Whether applying this override would change anything.
    pub fn is_empty(&self) -> bool {
        self.window.is_none()
            && self.max_requests.is_none()
            && self.key_generator.is_none()
            && self.enable_distributed_backend.is_none()
            && self.enable_metrics.is_none()
            && self.enable_logging.is_none()
            && self.message.is_none()
            && self.on_limit_reached.is_none()
    }
}

/// The built-in endpoint classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Preset {
    /// Login, password reset and other credential flows.
    CriticalAuth,
    /// Back-office operations.
    AdminApi,
    /// Checkout and payment provider calls.
    PaymentApi,
    /// Anonymous read traffic.
    PublicApi,
    /// Inbound provider callbacks.
    WebhookApi,
    /// Search and autocomplete.
    SearchApi,
    /// File uploads.
    UploadApi,
    /// Diagnostics, local only.
    DebugApi,
}

impl Preset {
    /// Every preset, in registration order.
    pub const ALL: [Preset; 8] = [
        Preset::CriticalAuth,
        Preset::AdminApi,
        Preset::PaymentApi,
        Preset::PublicApi,
        Preset::WebhookApi,
        Preset::SearchApi,
        Preset::UploadApi,
        Preset::DebugApi,
    ];

    /// Registry name of the preset.
    pub fn name(&self) -> &'static str {
        match self {
            Self::CriticalAuth => "critical-auth",
            Self::AdminApi => "admin-api",
            Self::PaymentApi => "payment-api",
            Self::PublicApi => "public-api",
            Self::WebhookApi => "webhook-api",
            Self::SearchApi => "search-api",
            Self::UploadApi => "upload-api",
            Self::DebugApi => "debug-api",
        }
    }

    /// Build the preset's config.
    pub fn config(&self) -> RateLimitConfig {
        const MINUTE: u64 = 60;

        match self {
            Self::CriticalAuth => RateLimitConfig::new(3, Duration::from_secs(15 * MINUTE))
                .with_message("Too many authentication attempts. Try again in 15 minutes."),
            Self::AdminApi => RateLimitConfig::new(50, Duration::from_secs(5 * MINUTE))
                .with_message("Administrative request limit exceeded. Try again in 5 minutes."),
            Self::PaymentApi => RateLimitConfig::new(15, Duration::from_secs(10 * MINUTE))
                .with_message("Payment request limit exceeded. Try again in 10 minutes.")
                .with_hook(WarnOnLimit::new("payment-api")),
            Self::PublicApi => RateLimitConfig::new(100, Duration::from_secs(MINUTE))
                .with_message("Public request limit exceeded. Try again in 1 minute.")
                .with_logging(false),
            Self::WebhookApi => RateLimitConfig::new(200, Duration::from_secs(MINUTE))
                .with_message("Webhook limit exceeded."),
            Self::SearchApi => RateLimitConfig::new(60, Duration::from_secs(MINUTE))
                .with_message("Search limit exceeded. Try again in 1 minute.")
                .with_logging(false),
            Self::UploadApi => RateLimitConfig::new(10, Duration::from_secs(5 * MINUTE))
                .with_message("Upload limit exceeded. Try again in 5 minutes."),
            Self::DebugApi => RateLimitConfig::new(30, Duration::from_secs(MINUTE))
                .with_message("Debug API limit exceeded.")
                .with_distributed_backend(false),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
