//! HTTP headers for rate limiting.
//!
//! Standard and extended headers for communicating admission status.

/// Rate limit header names.
pub mod names {
    /// Maximum requests allowed per window.
    pub const RATE_LIMIT_LIMIT: &str = "X-RateLimit-Limit";

    /// Remaining requests in current window.
    pub const RATE_LIMIT_REMAINING: &str = "X-RateLimit-Remaining";

    /// Window end as Unix seconds.
    pub const RATE_LIMIT_RESET: &str = "X-RateLimit-Reset";

    /// Seconds until the client should retry (standard HTTP header).
    pub const RETRY_AFTER: &str = "Retry-After";

    /// Which counter answered: distributed, fallback or error (extended).
    pub const RATE_LIMIT_SOURCE: &str = "X-RateLimit-Source";

    /// Decision latency in microseconds (extended).
    pub const RATE_LIMIT_RESPONSE_TIME: &str = "X-RateLimit-Response-Time";
}

/// Builder for rate limit headers.
#[derive(Debug, Default)]
pub struct RateLimitHeaders {
    limit: Option<u64>,
    remaining: Option<u64>,
    reset: Option<u64>,
    retry_after: Option<u64>,
    source: Option<&'static str>,
    response_time_us: Option<u64>,
}

impl RateLimitHeaders {
    /// Create a new header builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the limit header.
    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Set the remaining header.
    pub fn remaining(mut self, remaining: u64) -> Self {
        self.remaining = Some(remaining);
        self
    }

    /// Set the reset header (Unix seconds).
    pub fn reset(mut self, reset_unix_secs: u64) -> Self {
        self.reset = Some(reset_unix_secs);
        self
    }

    /// Set the retry-after header (seconds until retry).
    pub fn retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    /// Set the source header.
    pub fn source(mut self, source: &'static str) -> Self {
        self.source = Some(source);
        self
    }

    /// Set the response time header (microseconds).
    pub fn response_time_us(mut self, micros: u64) -> Self {
        self.response_time_us = Some(micros);
        self
    }

    /// Convert to a vector of (name, value) pairs.
    pub fn to_vec(&self) -> Vec<(&'static str, String)> {
        let mut headers = Vec::new();

        if let Some(limit) = self.limit {
            headers.push((names::RATE_LIMIT_LIMIT, limit.to_string()));
        }
        if let Some(remaining) = self.remaining {
            headers.push((names::RATE_LIMIT_REMAINING, remaining.to_string()));
        }
        if let Some(reset) = self.reset {
            headers.push((names::RATE_LIMIT_RESET, reset.to_string()));
        }
        if let Some(retry_after) = self.retry_after {
            headers.push((names::RETRY_AFTER, retry_after.to_string()));
        }
        if let Some(source) = self.source {
            headers.push((names::RATE_LIMIT_SOURCE, source.to_string()));
        }
        if let Some(micros) = self.response_time_us {
            headers.push((names::RATE_LIMIT_RESPONSE_TIME, micros.to_string()));
        }

        headers
    }
}

impl From<&crate::decision::RateLimitInfo> for RateLimitHeaders {
    fn from(info: &crate::decision::RateLimitInfo) -> Self {
        let mut headers = Self::new()
            .limit(info.limit)
            .remaining(info.remaining)
            .reset(info.reset_at.div_ceil(1000))
            .source(info.source.as_str());

        if let Some(retry) = info.retry_after_secs() {
            headers = headers.retry_after(retry);
        }

        if let Some(elapsed) = info.metadata.as_ref().and_then(|m| m.response_time) {
            let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
            headers = headers.response_time_us(micros);
        }

        headers
    }
}
