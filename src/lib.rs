//! Admission control for HTTP services.
//!
//! `admission_ratelimit` decides, per request, whether to admit it under a
//! named limit:
//!
//! - **Named presets**: `critical-auth`, `admin-api`, `payment-api`, `public-api` and more
//! - **Distributed counters**: any atomic increment-with-expiry backend, Redis included
//! - **In-process fallback**: fixed-window counters that take over when the backend is down
//! - **Pluggable keys**: IP, user, endpoint, hybrid, or your own generator
//! - **Fail-open**: unknown configs and internal faults admit the request
//! - **Metrics**: counters, mean decision time, most-blocked keys and endpoints
//!
//! # Quick Start
//!
//! ```ignore
//! use admission_ratelimit::{ConfigRegistry, RateLimiter};
//! use admission_ratelimit::key::RequestInfo;
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = RateLimiter::new(ConfigRegistry::with_presets());
//!     let request = RequestInfo::new("POST", "/api/auth/login")
//!         .with_header("x-forwarded-for", "203.0.113.9");
//!
//!     let decision = limiter.check_rate_limit(&request, "critical-auth", None).await;
//!
//!     if decision.is_allowed() {
//!         println!("Admitted, {} remaining", decision.info().remaining);
//!     } else {
//!         println!("Rejected, retry after {:?}", decision.info().retry_after);
//!     }
//! }
//! ```
//!
//! # Feature Flags
//!
//! - `axum` (default): Tower layer for Axum
//! - `redis`: Redis distributed backend

pub mod backend;
pub mod config;
pub mod decision;
pub mod error;
pub mod extensions;
pub mod headers;
pub mod key;
pub mod limiter;
pub mod metrics;
pub mod middleware;
pub mod registry;
pub mod settings;
pub mod storage;

// Re-export main types
pub use backend::{BackendHit, DistributedBackend, NoBackend};
pub use config::{ConfigOverride, LimitReachedHook, Preset, RateLimitConfig, WarnOnLimit};
pub use decision::{Decision, DecisionMetadata, DecisionSource, RateLimitInfo};
pub use error::{BackendError, ConfigError, ConnectionError, ErrorCode, RateLimitError, Result};
pub use key::{KeyContext, KeyGenerator, RequestInfo, RequestMeta};
pub use limiter::{RateLimiter, RateLimiterBuilder};
pub use metrics::{MetricsCollector, MetricsSnapshot, RankedEntry};
pub use middleware::{Rejection, WrapOptions, wrap_with_rate_limit};
pub use registry::ConfigRegistry;
pub use settings::Settings;
pub use storage::{FallbackStore, GcConfig, GcInterval};

// Re-export extensions and headers
pub use extensions::RateLimitExt;
pub use headers::RateLimitHeaders;

#[cfg(feature = "redis")]
pub use backend::{RedisBackend, RedisConfig};

#[cfg(feature = "axum")]
pub use middleware::RateLimitLayer;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::config::{ConfigOverride, Preset, RateLimitConfig};
    pub use crate::decision::{Decision, DecisionSource, RateLimitInfo};
    pub use crate::error::{ErrorCode, RateLimitError, Result};
    pub use crate::key::{KeyGenerator, RequestInfo, RequestMeta, hybrid_key, ip_key, user_key};
    pub use crate::limiter::RateLimiter;
    pub use crate::middleware::{WrapOptions, wrap_with_rate_limit};
    pub use crate::registry::ConfigRegistry;

    #[cfg(feature = "axum")]
    pub use crate::middleware::RateLimitLayer;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_integration_presets() {
        use crate::prelude::*;

        let limiter = RateLimiter::new(ConfigRegistry::with_presets());
        let request = RequestInfo::new("POST", "/api/upload").with_header("x-real-ip", "198.51.100.1");

        for i in 1..=10 {
            let decision = limiter.check_rate_limit(&request, "upload-api", None).await;
            assert!(decision.is_allowed(), "Request {} should be allowed", i);
        }

        let decision = limiter.check_rate_limit(&request, "UPLOAD_API", None).await;
        assert!(decision.is_denied());
        assert!(decision.info().retry_after.is_some());
    }

    #[tokio::test]
    async fn test_integration_headers() {
        let limiter = RateLimiter::new(ConfigRegistry::with_presets());
        let request = RequestInfo::new("GET", "/").with_header("x-real-ip", "198.51.100.2");

        let decision = limiter.check_rate_limit(&request, "public-api", None).await;

        let headers = decision.info().to_headers();
        assert!(headers.iter().any(|(k, _)| *k == "X-RateLimit-Limit"));
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Remaining" && v == "99"));
        assert!(headers.iter().any(|(k, v)| *k == "X-RateLimit-Source" && v == "fallback"));
    }

    #[tokio::test]
    async fn test_integration_wrapper() {
        let limiter = Arc::new(RateLimiter::new(ConfigRegistry::with_presets()));
        let guarded = wrap_with_rate_limit(limiter, Preset::CriticalAuth)
            .wrap(|request: RequestInfo| async move { request.path().to_string() });

        let request = RequestInfo::new("POST", "/login").with_header("x-real-ip", "198.51.100.3");
        for _ in 0..3 {
            assert_eq!(guarded.call(request.clone()).await.unwrap(), "/login");
        }
        let rejection = guarded.call(request).await.unwrap_err();
        assert_eq!(rejection.status, 429);
        assert!(rejection.message.contains("authentication"));
    }
}
