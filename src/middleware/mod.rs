//! Middleware adapters.
//!
//! [`wrap_with_rate_limit`] guards any async handler and works without a
//! web framework. With the `axum` feature, [`RateLimitLayer`] does the
//! same as a Tower layer and turns rejections into 429 responses.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use axum::{Router, routing::post};
//! use admission_ratelimit::{ConfigRegistry, Preset, RateLimiter};
//! use admission_ratelimit::middleware::RateLimitLayer;
//!
//! let limiter = Arc::new(RateLimiter::new(ConfigRegistry::with_presets()));
//!
//! let app = Router::new()
//!     .route("/api/auth/login", post(login))
//!     .layer(RateLimitLayer::new(limiter, Preset::CriticalAuth));
//! ```

mod audit;
mod auth;
mod wrap;

#[cfg(feature = "axum")]
mod layer;

pub use audit::{AuditEvent, AuditSink, TracingSink};
pub use auth::{AuthContext, PAYMENT_PERMISSION, SecurityLevel, check_rate_limit_with_auth};
pub use wrap::{
    Guarded, RateLimitWrapper, Rejection, RejectionBody, SkipPredicate, TOO_MANY_REQUESTS,
    WrapOptions, wrap_with_rate_limit,
};

#[cfg(feature = "axum")]
pub use layer::{CallerIdentity, RateLimitLayer, RateLimitService, request_info};
