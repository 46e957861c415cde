//! The decision engine.
//!
//! `RateLimiter` ties the pieces together: it resolves a named config,
//! derives the partition key, counts the request against the distributed
//! backend when it can and against the in-process store otherwise, and
//! records the outcome. It never returns an error. Anything that goes
//! wrong while deciding produces an allowed decision tagged with an
//! [`ErrorCode`].
//!
//! # Example
//!
//! ```ignore
//! use admission_ratelimit::{ConfigRegistry, RateLimiter};
//! use admission_ratelimit::key::RequestInfo;
//!
//! let limiter = RateLimiter::new(ConfigRegistry::with_presets());
//! let request = RequestInfo::new("POST", "/api/auth/login").with_header("x-real-ip", "203.0.113.9");
//!
//! let decision = limiter.check_rate_limit(&request, "critical-auth", None).await;
//! if decision.is_denied() {
//!     println!("retry in {:?}", decision.info().retry_after);
//! }
//! ```

use std::borrow::Cow;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use futures::FutureExt;
use tracing::{debug, warn};

use crate::backend::{BackendHit, DistributedBackend, NoBackend};
use crate::config::{ConfigOverride, RateLimitConfig};
use crate::decision::{Decision, DecisionMetadata, DecisionSource};
use crate::error::{BackendError, RateLimitError, Result};
use crate::key::{ClientIpResolver, HybridKey, KeyContext, KeyGenerator, RequestMeta, hybrid_key};
use crate::metrics::MetricsCollector;
use crate::registry::{ConfigRegistry, normalize_name};
use crate::settings::Settings;
use crate::storage::{FallbackStore, current_timestamp_ms, duration_ms};

/// Limit reported on a decision for an unknown config.
const UNKNOWN_CONFIG_LIMIT: u64 = 1000;

/// Window reported on a decision for an unknown config.
const UNKNOWN_CONFIG_WINDOW: Duration = Duration::from_secs(60);

const BACKEND_UNKNOWN: u8 = 0;
const BACKEND_UP: u8 = 1;
const BACKEND_DOWN: u8 = 2;

/// Cached result of the backend reachability check.
#[derive(Debug, Default)]
struct Availability {
    /// `BACKEND_UNKNOWN` until the first check or failure settles it.
    state: AtomicU8,
    /// Unix ms of the last check or failure; 0 means never checked.
    checked_at: AtomicU64,
}

impl Availability {
    fn mark(&self, available: bool, now: u64) {
        let state = if available { BACKEND_UP } else { BACKEND_DOWN };
        self.state.store(state, Ordering::Release);
        self.checked_at.store(now.max(1), Ordering::Release);
    }

    /// The backend is tried unless it is known to be down.
    fn usable(&self) -> bool {
        self.state.load(Ordering::Acquire) != BACKEND_DOWN
    }
}

/// Admission control engine.
///
/// One instance owns its fallback store and metrics; share it through an
/// `Arc`.
pub struct RateLimiter<B = NoBackend> {
    registry: ConfigRegistry,
    backend: B,
    store: FallbackStore,
    metrics: MetricsCollector,
    settings: Settings,
    resolver: ClientIpResolver,
    availability: Availability,
    default_key: HybridKey,
}

impl<B> std::fmt::Debug for RateLimiter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("configs", &self.registry.len())
            .field("store", &self.store)
            .field("settings", &self.settings)
            .finish()
    }
}

impl RateLimiter<NoBackend> {
    /// Create an engine with no distributed backend and default settings.
    pub fn new(registry: ConfigRegistry) -> Self {
        Self::from_parts(registry, NoBackend, Settings::default())
    }

    /// Create a new engine builder.
    pub fn builder() -> RateLimiterBuilder<NoBackend> {
        RateLimiterBuilder::new()
    }
}

impl<B: DistributedBackend> RateLimiter<B> {
    fn from_parts(registry: ConfigRegistry, backend: B, settings: Settings) -> Self {
        Self {
            store: FallbackStore::with_gc(settings.gc.clone()),
            metrics: MetricsCollector::new(settings.top_n, settings.max_tracked),
            resolver: settings.ip_resolver(),
            availability: Availability::default(),
            default_key: hybrid_key(),
            registry,
            backend,
            settings,
        }
    }

    /// Decide whether `request` is admitted under the config named
    /// `config_name`, optionally adjusted by `overrides`.
    pub async fn check_rate_limit(
        &self,
        request: &dyn RequestMeta,
        config_name: &str,
        overrides: Option<&ConfigOverride>,
    ) -> Decision {
        let started = Instant::now();

        let config = match self.resolve_config(config_name, overrides) {
            Ok(config) => config,
            Err(e) => {
                warn!(config = config_name, error = %e, "Failing open");
                let decision = Decision::fail_open(
                    e.code(),
                    e.to_string(),
                    UNKNOWN_CONFIG_LIMIT,
                    UNKNOWN_CONFIG_WINDOW,
                );
                self.metrics.record(&decision, started.elapsed());
                return decision;
            }
        };

        let ctx = KeyContext::new(request, self.resolver.resolve(request));
        let key = match self.derive_key(&config, &ctx) {
            Ok(key) => key,
            Err(e) => {
                warn!(config = config_name, error = %e, "Failing open");
                let decision = Decision::fail_open(
                    e.code(),
                    e.to_string(),
                    config.max_requests(),
                    config.window(),
                );
                self.metrics.record(&decision, started.elapsed());
                return decision;
            }
        };

        let counter_key = scoped_key(config_name, &key);
        let mut decision = self.count(&counter_key, &config).await;
        let elapsed = started.elapsed();
        decision.info_mut().metadata = Some(
            DecisionMetadata::new()
                .with_key(key.as_str())
                .with_endpoint(request.path())
                .with_response_time(elapsed),
        );

        if config.metrics_enabled() {
            self.metrics.record(&decision, elapsed);
        }

        if decision.is_denied() {
            self.on_blocked(config_name, &key, &config, &decision);
        }

        decision
    }

    /// Look up `name` and apply `overrides` to it.
    pub fn resolve_config(
        &self,
        name: &str,
        overrides: Option<&ConfigOverride>,
    ) -> Result<Cow<'_, RateLimitConfig>> {
        let base = self.registry.lookup(name)?;
        match overrides {
            Some(overrides) if !overrides.is_empty() => Ok(Cow::Owned(base.merged(overrides)?)),
            _ => Ok(Cow::Borrowed(base)),
        }
    }

    fn derive_key(&self, config: &RateLimitConfig, ctx: &KeyContext<'_>) -> Result<String> {
        let generated = match config.key_generator() {
            Some(generator) => catch_unwind(AssertUnwindSafe(|| generator.generate(ctx)))
                .map_err(|_| {
                    RateLimitError::KeyExtraction(format!(
                        "key generator '{}' panicked",
                        generator.name()
                    ))
                })?,
            None => self.default_key.generate(ctx),
        };

        Ok(generated.unwrap_or_else(|| format!("ip:{}", ctx.client_ip())))
    }

    /// Count one hit on `counter_key`, distributed when possible.
    async fn count(&self, counter_key: &str, config: &RateLimitConfig) -> Decision {
        if config.distributed_backend_enabled() && self.backend_available().await {
            let timeout = self.settings.backend_timeout();
            let call = AssertUnwindSafe(self.backend.increment(counter_key, config.window()))
                .catch_unwind();
            match tokio::time::timeout(timeout, call).await {
                Ok(Ok(Ok(hit))) => return distributed_decision(hit, config),
                Ok(Ok(Err(e))) => self.backend_failed(counter_key, &e),
                Ok(Err(_)) => self.backend_failed(counter_key, &BackendError::Panicked),
                Err(_) => self.backend_failed(counter_key, &BackendError::Timeout(timeout)),
            }
        }

        let entry = self.store.hit(counter_key, config.window());
        Decision::from_count(
            config.max_requests(),
            entry.count,
            entry.window_start,
            entry.expires_at,
            DecisionSource::Fallback,
        )
    }

    /// Check the backend at most once per availability TTL.
    ///
    /// Only the caller that claims the expired slot checks. Concurrent
    /// callers keep the last known answer, and before the first answer
    /// they try the backend directly.
    async fn backend_available(&self) -> bool {
        let now = current_timestamp_ms();
        let checked_at = self.availability.checked_at.load(Ordering::Acquire);
        let ttl_ms = self.settings.availability_ttl_ms;

        if checked_at != 0 && now.saturating_sub(checked_at) < ttl_ms {
            return self.availability.usable();
        }

        if self
            .availability
            .checked_at
            .compare_exchange(checked_at, now.max(1), Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return self.availability.usable();
        }

        let check = AssertUnwindSafe(self.backend.is_available()).catch_unwind();
        let available = matches!(
            tokio::time::timeout(self.settings.backend_timeout(), check).await,
            Ok(Ok(true))
        );
        self.availability.mark(available, current_timestamp_ms());
        debug!(backend = self.backend.name(), available, "Checked distributed backend");
        available
    }

    fn backend_failed(&self, key: &str, error: &BackendError) {
        self.availability.mark(false, current_timestamp_ms());
        if matches!(error, BackendError::Unavailable) {
            debug!(backend = self.backend.name(), key, "Distributed backend unavailable");
            return;
        }
        warn!(
            backend = self.backend.name(),
            key,
            error = %error,
            "Distributed backend failed, using fallback store"
        );
        self.metrics.record_backend_error();
    }

    fn on_blocked(&self, config_name: &str, key: &str, config: &RateLimitConfig, decision: &Decision) {
        if config.logging_enabled() {
            warn!(
                config = config_name,
                key,
                count = decision.info().count,
                limit = decision.info().limit,
                source = decision.source().as_str(),
                "Rate limit exceeded"
            );
        }

        if let Some(hook) = config.hook() {
            if catch_unwind(AssertUnwindSafe(|| hook.on_limit_reached(key, decision))).is_err() {
                warn!(config = config_name, key, "Limit reached hook panicked");
            }
        }
    }

    /// The engine's metrics.
    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    /// Zero the engine's metrics.
    pub fn reset_metrics(&self) {
        self.metrics.reset();
    }

    /// The in-process fallback store.
    pub fn store(&self) -> &FallbackStore {
        &self.store
    }

    pub fn registry(&self) -> &ConfigRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// The client address resolver used for keys and audit events.
    pub fn resolver(&self) -> &ClientIpResolver {
        &self.resolver
    }
}

/// Counter key for `key` under the config named `config_name`.
///
/// Each config counts on its own, so a key's traffic under one config
/// never spends another config's budget.
fn scoped_key(config_name: &str, key: &str) -> String {
    format!("{}:{}", normalize_name(config_name), key)
}

fn distributed_decision(hit: BackendHit, config: &RateLimitConfig) -> Decision {
    let now = current_timestamp_ms();
    let window_ms = duration_ms(config.window()).max(1);
    let remaining_ms = hit
        .expires_in
        .map(|d| duration_ms(d).min(window_ms))
        .unwrap_or(window_ms);
    let reset_at = now.saturating_add(remaining_ms);
    let window_start = reset_at.saturating_sub(window_ms);

    Decision::from_count(
        config.max_requests(),
        hit.count,
        window_start,
        reset_at,
        DecisionSource::Distributed,
    )
}

/// Builder for [`RateLimiter`].
#[derive(Debug)]
pub struct RateLimiterBuilder<B> {
    registry: Option<ConfigRegistry>,
    backend: B,
    settings: Settings,
}

impl RateLimiterBuilder<NoBackend> {
    /// Create a builder with no backend, the presets and default settings.
    pub fn new() -> Self {
        Self {
            registry: None,
            backend: NoBackend,
            settings: Settings::default(),
        }
    }
}

impl Default for RateLimiterBuilder<NoBackend> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: DistributedBackend> RateLimiterBuilder<B> {
    /// Use `registry` instead of the presets.
    pub fn registry(mut self, registry: ConfigRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Count with `backend` when configs enable it.
    pub fn backend<B2: DistributedBackend>(self, backend: B2) -> RateLimiterBuilder<B2> {
        RateLimiterBuilder {
            registry: self.registry,
            backend,
            settings: self.settings,
        }
    }

    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Validate the settings and build the engine.
    ///
    /// Call inside a tokio runtime when the store uses timed GC.
    pub fn build(self) -> Result<RateLimiter<B>> {
        self.settings.validate()?;
        let registry = self.registry.unwrap_or_else(ConfigRegistry::with_presets);
        Ok(RateLimiter::from_parts(registry, self.backend, self.settings))
    }
}
