//! Framework-agnostic handler wrapping.
//!
//! ```ignore
//! use admission_ratelimit::middleware::{wrap_with_rate_limit, WrapOptions};
//!
//! let guarded = wrap_with_rate_limit(limiter.clone(), WrapOptions::new("payment-api"))
//!     .wrap(|request: RequestInfo| async move { format!("paid {}", request.path()) });
//!
//! match guarded.call(request).await {
//!     Ok(body) => respond(200, body),
//!     Err(rejection) => respond(rejection.status, rejection.to_json()),
//! }
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::DistributedBackend;
use crate::config::{ConfigOverride, DEFAULT_MESSAGE, Preset};
use crate::decision::Decision;
use crate::key::RequestMeta;
use crate::limiter::RateLimiter;
use crate::middleware::audit::{AuditEvent, AuditSink, TracingSink};

/// HTTP status of a rejection.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Predicate that exempts a request from limiting.
pub type SkipPredicate = Arc<dyn Fn(&dyn RequestMeta) -> bool + Send + Sync>;

/// Which config a wrapper applies, and how.
#[derive(Clone)]
pub struct WrapOptions {
    config_name: String,
    overrides: Option<ConfigOverride>,
    skip_if: Option<SkipPredicate>,
}

impl fmt::Debug for WrapOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WrapOptions")
            .field("config_name", &self.config_name)
            .field("overrides", &self.overrides)
            .field("skip_if", &self.skip_if.is_some())
            .finish()
    }
}

impl WrapOptions {
    /// Apply the config registered as `config_name`.
    pub fn new(config_name: impl Into<String>) -> Self {
        Self {
            config_name: config_name.into(),
            overrides: None,
            skip_if: None,
        }
    }

    /// Adjust the config for this wrapper only.
    pub fn with_overrides(mut self, overrides: ConfigOverride) -> Self {
        self.overrides = Some(overrides);
        self
    }

    /// Let requests matching `predicate` through without counting them.
    pub fn skip_if<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&dyn RequestMeta) -> bool + Send + Sync + 'static,
    {
        self.skip_if = Some(Arc::new(predicate));
        self
    }

    pub fn config_name(&self) -> &str {
        &self.config_name
    }
}

impl From<Preset> for WrapOptions {
    fn from(preset: Preset) -> Self {
        Self::new(preset.name())
    }
}

impl From<&str> for WrapOptions {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// JSON body of a rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectionBody {
    pub error: String,
    pub retry_after: u64,
}

/// A blocked request.
#[derive(Debug, Clone, Error)]
#[error("{message} (retry after {retry_after_secs}s)")]
pub struct Rejection {
    /// Always 429.
    pub status: u16,
    /// The config's message.
    pub message: String,
    /// Whole seconds until the window resets, at least 1.
    pub retry_after_secs: u64,
    /// The blocking decision.
    pub decision: Decision,
}

impl Rejection {
    pub(crate) fn new(message: impl Into<String>, decision: Decision) -> Self {
        Self {
            status: TOO_MANY_REQUESTS,
            message: message.into(),
            retry_after_secs: decision.info().retry_after_secs().unwrap_or(1),
            decision,
        }
    }

    pub fn body(&self) -> RejectionBody {
        RejectionBody {
            error: self.message.clone(),
            retry_after: self.retry_after_secs,
        }
    }

    /// Serialize the body as `{"error": .., "retryAfter": ..}`.
    pub fn to_json(&self) -> String {
        serde_json::to_string(&self.body()).unwrap_or_else(|_| {
            format!(r#"{{"error":"Too Many Requests","retryAfter":{}}}"#, self.retry_after_secs)
        })
    }

    /// Rate limit headers for the rejection response.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        self.decision.info().to_headers()
    }
}

/// Applies one config in front of any number of handlers.
pub struct RateLimitWrapper<B> {
    limiter: Arc<RateLimiter<B>>,
    options: Arc<WrapOptions>,
    audit: Arc<dyn AuditSink>,
}

impl<B> Clone for RateLimitWrapper<B> {
    fn clone(&self) -> Self {
        Self {
            limiter: self.limiter.clone(),
            options: self.options.clone(),
            audit: self.audit.clone(),
        }
    }
}

impl<B> fmt::Debug for RateLimitWrapper<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitWrapper")
            .field("options", &self.options)
            .finish()
    }
}

/// Build a wrapper that checks `options` against `limiter` before each call.
pub fn wrap_with_rate_limit<B: DistributedBackend>(
    limiter: Arc<RateLimiter<B>>,
    options: impl Into<WrapOptions>,
) -> RateLimitWrapper<B> {
    RateLimitWrapper {
        limiter,
        options: Arc::new(options.into()),
        audit: Arc::new(TracingSink),
    }
}

impl<B: DistributedBackend> RateLimitWrapper<B> {
    /// Send audit events to `sink` instead of `tracing`.
    pub fn with_audit_sink(mut self, sink: impl AuditSink) -> Self {
        self.audit = Arc::new(sink);
        self
    }

    pub fn options(&self) -> &WrapOptions {
        &self.options
    }

    pub fn limiter(&self) -> &Arc<RateLimiter<B>> {
        &self.limiter
    }

    /// Guard `handler` with this wrapper.
    pub fn wrap<H>(&self, handler: H) -> Guarded<B, H> {
        Guarded {
            wrapper: self.clone(),
            handler,
        }
    }

    /// Decide on `request` without running a handler.
    ///
    /// Returns `Ok(None)` when the request is skipped, `Ok(Some(_))` when
    /// it is admitted, and `Err` when it is blocked.
    pub async fn admit(&self, request: &dyn RequestMeta) -> Result<Option<Decision>, Rejection> {
        if let Some(skip) = &self.options.skip_if {
            if skip(request) {
                return Ok(None);
            }
        }

        let name = self.options.config_name.as_str();
        let decision = self
            .limiter
            .check_rate_limit(request, name, self.options.overrides.as_ref())
            .await;

        let config = self
            .limiter
            .resolve_config(name, self.options.overrides.as_ref())
            .ok();

        if config.as_ref().is_some_and(|c| c.logging_enabled()) {
            let event = AuditEvent::from_decision(
                &decision,
                name,
                request.path(),
                request.method(),
                self.limiter.resolver().resolve(request),
                request.header("user-agent"),
            );
            self.audit.record(&event);
        }

        if decision.is_allowed() {
            return Ok(Some(decision));
        }

        let message = config
            .as_ref()
            .map(|c| c.message().to_string())
            .unwrap_or_else(|| DEFAULT_MESSAGE.to_string());
        Err(Rejection::new(message, decision))
    }
}

/// A handler behind a [`RateLimitWrapper`].
pub struct Guarded<B, H> {
    wrapper: RateLimitWrapper<B>,
    handler: H,
}

impl<B, H: Clone> Clone for Guarded<B, H> {
    fn clone(&self) -> Self {
        Self {
            wrapper: self.wrapper.clone(),
            handler: self.handler.clone(),
        }
    }
}

impl<B: DistributedBackend, H> Guarded<B, H> {
    /// Run the handler if `request` is admitted.
    ///
    /// A blocked request never reaches the handler.
    pub async fn call<R, Fut, T>(&self, request: R) -> Result<T, Rejection>
    where
        R: RequestMeta,
        H: Fn(R) -> Fut,
        Fut: Future<Output = T>,
    {
        self.wrapper.admit(&request).await?;
        Ok((self.handler)(request).await)
    }

    pub fn wrapper(&self) -> &RateLimitWrapper<B> {
        &self.wrapper
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionSource;
    use crate::key::RequestInfo;
    use crate::registry::ConfigRegistry;
    use crate::storage::current_timestamp_ms;
    use std::time::Duration;

    #[test]
    fn test_rejection_body() {
        let now = current_timestamp_ms();
        let decision =
            Decision::from_count(3, 4, now, now + 90_500, DecisionSource::Fallback);
        let rejection = Rejection::new("slow down", decision);

        assert_eq!(rejection.status, 429);
        assert!(rejection.retry_after_secs >= 90 && rejection.retry_after_secs <= 91);

        let json: serde_json::Value = serde_json::from_str(&rejection.to_json()).unwrap();
        assert_eq!(json["error"], "slow down");
        assert_eq!(json["retryAfter"], rejection.retry_after_secs);
        assert!(rejection.headers().iter().any(|(k, _)| *k == "Retry-After"));
    }

    #[tokio::test]
    async fn test_skip_if() {
        let limiter = Arc::new(RateLimiter::new(ConfigRegistry::with_presets()));
        let wrapper = wrap_with_rate_limit(
            limiter.clone(),
            WrapOptions::new("critical-auth")
                .with_overrides(ConfigOverride::new().window(Duration::from_secs(5)))
                .skip_if(|request| request.header("x-internal").is_some()),
        );

        let internal = RequestInfo::new("GET", "/health").with_header("x-internal", "1");
        for _ in 0..10 {
            assert!(matches!(wrapper.admit(&internal).await, Ok(None)));
        }
        assert_eq!(limiter.metrics().snapshot().total_requests, 0);
    }
}
