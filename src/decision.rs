//! Decision types for admission control results.
//!
//! Every call to the engine produces a `Decision`: whether the request is
//! admitted, the counter state behind that answer, and which path produced
//! it (distributed backend, in-process fallback, or a fail-open error).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::storage::{current_timestamp_ms, duration_ms};

/// Where a decision came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionSource {
    /// Counted by the distributed backend.
    Distributed,
    /// Counted by the in-process fallback store.
    Fallback,
    /// Not counted; the engine failed open.
    Error,
}

impl DecisionSource {
    /// Name used in headers and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Distributed => "distributed",
            Self::Fallback => "fallback",
            Self::Error => "error",
        }
    }
}

/// The result of an admission check.
#[derive(Debug, Clone)]
pub struct Decision {
    /// Whether the request is allowed.
    allowed: bool,
    /// Rate limit information.
    info: RateLimitInfo,
}

impl Decision {
    /// Create a new "allowed" decision.
    pub fn allowed(info: RateLimitInfo) -> Self {
        Self {
            allowed: true,
            info,
        }
    }

    /// Create a new "denied" decision.
    pub fn denied(info: RateLimitInfo) -> Self {
        Self {
            allowed: false,
            info,
        }
    }

    /// Build the decision for an observed counter value.
    ///
    /// `count` is the value after this request was recorded.
    pub(crate) fn from_count(
        limit: u64,
        count: u64,
        window_start: u64,
        reset_at: u64,
        source: DecisionSource,
    ) -> Self {
        let now = current_timestamp_ms();
        let window_ms = reset_at.saturating_sub(window_start).max(1);
        let info = RateLimitInfo::new(limit, count, reset_at, window_start, source);

        if count <= limit {
            Self::allowed(info)
        } else {
            let wait = reset_at.saturating_sub(now).clamp(1, window_ms);
            Self::denied(info.with_retry_after(Duration::from_millis(wait)))
        }
    }

    /// A fail-open decision: the request is admitted without being counted.
    pub fn fail_open(code: ErrorCode, message: impl Into<String>, limit: u64, window: Duration) -> Self {
        let now = current_timestamp_ms();
        let reset_at = now.saturating_add(duration_ms(window));
        let mut info = RateLimitInfo::new(limit, 0, reset_at, now, DecisionSource::Error);
        info.error = Some(DecisionError {
            code,
            message: message.into(),
        });
        Self::allowed(info)
    }

    /// Check if the request is allowed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Check if the request is denied.
    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    /// Get the rate limit info.
    pub fn info(&self) -> &RateLimitInfo {
        &self.info
    }

    pub(crate) fn info_mut(&mut self) -> &mut RateLimitInfo {
        &mut self.info
    }

    /// Consume the decision and return the info.
    pub fn into_info(self) -> RateLimitInfo {
        self.info
    }

    /// Which path produced this decision.
    pub fn source(&self) -> DecisionSource {
        self.info.source
    }

    /// The error code of a fail-open decision.
    pub fn code(&self) -> Option<ErrorCode> {
        self.info.error.as_ref().map(|e| e.code)
    }
}

/// Error details carried by a fail-open decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionError {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

/// Information about the current counter state.
#[derive(Debug, Clone)]
pub struct RateLimitInfo {
    /// Maximum requests allowed per window.
    pub limit: u64,
    /// Requests observed in the current window, this one included.
    pub count: u64,
    /// Remaining requests in the current window.
    pub remaining: u64,
    /// When the window ends (Unix milliseconds).
    pub reset_at: u64,
    /// When the window started (Unix milliseconds).
    pub window_start: u64,
    /// How long to wait before retrying (only set when blocked).
    pub retry_after: Option<Duration>,
    /// Which path produced the decision.
    pub source: DecisionSource,
    /// Present only on fail-open decisions.
    pub error: Option<DecisionError>,
    /// Additional metadata.
    pub metadata: Option<DecisionMetadata>,
}

impl RateLimitInfo {
    /// Create a new rate limit info.
    pub fn new(limit: u64, count: u64, reset_at: u64, window_start: u64, source: DecisionSource) -> Self {
        Self {
            limit,
            count,
            remaining: limit.saturating_sub(count),
            reset_at,
            window_start,
            retry_after: None,
            source,
            error: None,
            metadata: None,
        }
    }

    /// Set the retry-after duration.
    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Set additional metadata.
    pub fn with_metadata(mut self, metadata: DecisionMetadata) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Get the remaining time until reset as a Duration.
    pub fn time_until_reset(&self) -> Duration {
        Duration::from_millis(self.reset_at.saturating_sub(current_timestamp_ms()))
    }

    /// Retry-after rounded up to whole seconds.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.retry_after
            .map(|d| duration_ms(d).div_ceil(1000).max(1))
    }

    /// Convert to HTTP headers.
    ///
    /// Returns a vector of (header_name, header_value) pairs.
    pub fn to_headers(&self) -> Vec<(&'static str, String)> {
        crate::headers::RateLimitHeaders::from(self).to_vec()
    }
}

/// Additional metadata about a decision.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionMetadata {
    /// The partition key that was counted.
    pub key: Option<String>,
    /// The request path.
    pub endpoint: Option<String>,
    /// Time spent deciding.
    pub response_time: Option<Duration>,
}

impl DecisionMetadata {
    /// Create new empty metadata.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Set the endpoint.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Set the response time.
    pub fn with_response_time(mut self, elapsed: Duration) -> Self {
        self.response_time = Some(elapsed);
        self
    }
}
