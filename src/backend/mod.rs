//! Distributed counter backend.
//!
//! The engine only needs two things from a shared counter service: an
//! atomic increment that starts a TTL on the first hit of a window, and a
//! cheap reachability check. Everything else (pooling, protocol, retries)
//! belongs to the implementation.

#[cfg(feature = "redis")]
mod redis_cluster;

#[cfg(feature = "redis")]
pub use redis_cluster::{RedisBackend, RedisConfig};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::error::BackendError;

/// Counter state returned by an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendHit {
    /// Count after this increment.
    pub count: u64,
    /// Time left in the window, when the backend reports it.
    pub expires_in: Option<Duration>,
}

impl BackendHit {
    pub fn new(count: u64, expires_in: Option<Duration>) -> Self {
        Self { count, expires_in }
    }
}

/// Shared counter service.
///
/// Implementations must be thread-safe and must never block the caller
/// for long: the engine bounds each call with a timeout, but a backend
/// that hangs still holds a task.
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::backend::{BackendHit, DistributedBackend};
/// use admission_ratelimit::error::BackendError;
/// use std::time::Duration;
///
/// struct Unreachable;
///
/// impl DistributedBackend for Unreachable {
///     async fn increment(&self, _key: &str, _window: Duration) -> Result<BackendHit, BackendError> {
///         Err(BackendError::Unavailable)
///     }
///
///     async fn is_available(&self) -> bool {
///         false
///     }
/// }
/// ```
pub trait DistributedBackend: Send + Sync + 'static {
    /// Atomically increment `key`, starting a `window` TTL if this is the
    /// first hit.
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<BackendHit, BackendError>> + Send;

    /// Whether the backend is reachable right now.
    fn is_available(&self) -> impl Future<Output = bool> + Send;

    /// Get the backend name for logging.
    fn name(&self) -> &'static str {
        "distributed"
    }
}

impl<B: DistributedBackend> DistributedBackend for Arc<B> {
    fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> impl Future<Output = Result<BackendHit, BackendError>> + Send {
        (**self).increment(key, window)
    }

    fn is_available(&self) -> impl Future<Output = bool> + Send {
        (**self).is_available()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// A backend that is never available.
///
/// Every decision is made by the fallback store.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoBackend;

impl DistributedBackend for NoBackend {
    async fn increment(&self, _key: &str, _window: Duration) -> Result<BackendHit, BackendError> {
        Err(BackendError::Unavailable)
    }

    async fn is_available(&self) -> bool {
        false
    }

    fn name(&self) -> &'static str {
        "none"
    }
}
