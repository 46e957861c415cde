//! Request extensions for reading the admission decision in handlers.
//!
//! # Example
//!
//! ```ignore
//! use axum::Extension;
//! use admission_ratelimit::extensions::RateLimitExt;
//!
//! async fn handler(Extension(rate_limit): Extension<RateLimitExt>) {
//!     println!("Remaining: {}", rate_limit.remaining);
//! }
//! ```

use crate::decision::{Decision, DecisionSource};

/// Admission details attached to an admitted request.
#[derive(Debug, Clone)]
pub struct RateLimitExt {
    /// Config the request was checked against.
    pub config: String,
    /// Partition key that was counted, when one was derived.
    pub key: Option<String>,
    /// The full decision.
    pub decision: Decision,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// Maximum requests allowed.
    pub limit: u64,
    /// Seconds until the window resets.
    pub reset_seconds: u64,
}

impl RateLimitExt {
    pub fn new(config: impl Into<String>, decision: Decision) -> Self {
        let info = decision.info();
        Self {
            config: config.into(),
            key: info.metadata.as_ref().and_then(|m| m.key.clone()),
            remaining: info.remaining,
            limit: info.limit,
            reset_seconds: info.time_until_reset().as_secs(),
            decision,
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.decision.is_allowed()
    }

    /// Whether the engine failed open for this request.
    pub fn failed_open(&self) -> bool {
        self.decision.source() == DecisionSource::Error
    }
}
