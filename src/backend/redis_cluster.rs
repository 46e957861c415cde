//! Redis backend for distributed counters.
//!
//! Uses connection pooling, and a server-side script so that the increment
//! and the TTL start happen as one atomic step.

use std::time::Duration;

use deadpool_redis::redis::{Script, cmd};
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use tracing::debug;

use crate::backend::{BackendHit, DistributedBackend};
use crate::error::{BackendError, ConnectionError, Result};
use crate::storage::duration_ms;

/// INCR, start the window on the first hit, report the remaining TTL.
const INCREMENT_SCRIPT: &str = r#"
local count = redis.call('INCR', KEYS[1])
if count == 1 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
    redis.call('PEXPIRE', KEYS[1], ARGV[1])
    ttl = tonumber(ARGV[1])
end
return {count, ttl}
"#;

/// Redis backend configuration.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// Connection pool size
    pub pool_size: usize,
    /// Key prefix for counter keys
    pub key_prefix: String,
    /// Budget for establishing the first connection
    pub connection_timeout: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            pool_size: 10,
            key_prefix: "rl:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

impl RedisConfig {
    /// Create a new Redis configuration.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the connection timeout.
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout = timeout;
        self
    }
}

/// Pooled Redis counters.
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::backend::{RedisBackend, RedisConfig};
///
/// let config = RedisConfig::new("redis://localhost:6379")
///     .with_prefix("myapp:rl:")
///     .with_pool_size(20);
///
/// let backend = RedisBackend::new(config).await?;
/// ```
pub struct RedisBackend {
    pool: Pool,
    key_prefix: String,
    script: Script,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisBackend {
    /// Create the pool and check that the server answers.
    pub async fn new(config: RedisConfig) -> Result<Self> {
        let mut cfg = Config::from_url(&config.url);
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| ConnectionError::ConnectionFailed(e.to_string()))?;

        let backend = Self {
            pool,
            key_prefix: config.key_prefix,
            script: Script::new(INCREMENT_SCRIPT),
        };

        match tokio::time::timeout(config.connection_timeout, backend.ping()).await {
            Ok(Ok(())) => Ok(backend),
            Ok(Err(e)) => Err(ConnectionError::ConnectionFailed(e.to_string()).into()),
            Err(_) => Err(ConnectionError::Timeout(config.connection_timeout).into()),
        }
    }

    /// Create a new Redis backend from a URL.
    pub async fn from_url(url: impl Into<String>) -> Result<Self> {
        Self::new(RedisConfig::new(url)).await
    }

    /// Get the full key with prefix.
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    /// Get a connection from the pool.
    async fn get_conn(&self) -> std::result::Result<Connection, BackendError> {
        self.pool.get().await.map_err(|_| BackendError::PoolExhausted)
    }

    async fn ping(&self) -> std::result::Result<(), BackendError> {
        let mut conn = self.get_conn().await?;
        let reply: String = cmd("PING")
            .query_async(&mut *conn)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;
        if reply == "PONG" {
            Ok(())
        } else {
            Err(BackendError::UnexpectedReply(reply))
        }
    }
}

impl DistributedBackend for RedisBackend {
    async fn increment(
        &self,
        key: &str,
        window: Duration,
    ) -> std::result::Result<BackendHit, BackendError> {
        let mut conn = self.get_conn().await?;
        let window_ms = duration_ms(window).max(1);

        let (count, ttl_ms): (i64, i64) = self
            .script
            .key(self.full_key(key))
            .arg(window_ms)
            .invoke_async(&mut *conn)
            .await
            .map_err(|e| BackendError::operation_failed(e.to_string(), true))?;

        let count = u64::try_from(count)
            .map_err(|_| BackendError::UnexpectedReply(format!("negative count {count}")))?;
        let expires_in = u64::try_from(ttl_ms).ok().map(Duration::from_millis);

        Ok(BackendHit::new(count, expires_in))
    }

    async fn is_available(&self) -> bool {
        match self.ping().await {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "Redis availability check failed");
                false
            }
        }
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
