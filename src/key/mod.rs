//! Partition key generation.
//!
//! A key generator maps request metadata to the identity that scopes a
//! counter: all requests producing the same key share one window.
//!
//! # Overview
//!
//! - [`IpKey`]: `ip:<addr>`, one counter per client address
//! - [`user_key`]: `user:<id>` for authenticated callers, IP otherwise
//! - [`EndpointKey`]: `endpoint:<ip>:<path>`, one counter per address and route
//! - [`hybrid_key`]: `user:<id>:<path>` when authenticated, IP otherwise
//!
//! Generators are pure: they read the [`KeyContext`] and nothing else. The
//! client address is resolved once per request by a [`ClientIpResolver`]
//! before any generator runs.
//!
//! # Example
//!
//! ```ignore
//! use admission_ratelimit::key::{hybrid_key, ClientIpResolver, KeyContext, KeyGenerator, RequestInfo};
//!
//! let request = RequestInfo::new("GET", "/api/x").with_identity("user_123");
//! let ctx = KeyContext::resolve(&request, &ClientIpResolver::default());
//! assert_eq!(hybrid_key().generate(&ctx).as_deref(), Some("user:user_123:/api/x"));
//! ```

mod composite;
mod extractors;

pub use composite::{CompositeKey, EitherKey};
pub use extractors::*;

use std::sync::Arc;

/// Trait for deriving partition keys from requests.
///
/// Return `None` if the key cannot be derived; combinators use that to fall
/// back to another generator, and the engine falls back to the client IP.
pub trait KeyGenerator: Send + Sync + 'static {
    /// Derive a partition key.
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String>;

    /// Get the generator name for logging.
    fn name(&self) -> &'static str;
}

impl<K: KeyGenerator + ?Sized> KeyGenerator for Arc<K> {
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        (**self).generate(ctx)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Everything a generator may look at.
pub struct KeyContext<'a> {
    request: &'a dyn RequestMeta,
    client_ip: String,
}

impl std::fmt::Debug for KeyContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyContext")
            .field("path", &self.request.path())
            .field("client_ip", &self.client_ip)
            .finish()
    }
}

impl<'a> KeyContext<'a> {
    /// Create a context with an already-resolved client address.
    pub fn new(request: &'a dyn RequestMeta, client_ip: impl Into<String>) -> Self {
        Self {
            request,
            client_ip: client_ip.into(),
        }
    }

    /// Create a context, resolving the client address with `resolver`.
    pub fn resolve(request: &'a dyn RequestMeta, resolver: &ClientIpResolver) -> Self {
        Self::new(request, resolver.resolve(request))
    }

    /// The request being keyed.
    pub fn request(&self) -> &'a dyn RequestMeta {
        self.request
    }

    /// The resolved client address (`unknown` when none could be found).
    pub fn client_ip(&self) -> &str {
        &self.client_ip
    }

    /// The request path.
    pub fn path(&self) -> &str {
        self.request.path()
    }
}

/// A key generator backed by a closure.
#[derive(Clone)]
pub struct FnKey<F> {
    generator: F,
    name: &'static str,
}

impl<F> std::fmt::Debug for FnKey<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnKey").field("name", &self.name).finish()
    }
}

impl<F> FnKey<F> {
    /// Create a new function-based key generator.
    pub fn new(name: &'static str, generator: F) -> Self {
        Self { generator, name }
    }
}

impl<F> KeyGenerator for FnKey<F>
where
    F: Fn(&KeyContext<'_>) -> Option<String> + Send + Sync + 'static,
{
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        (self.generator)(ctx)
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

/// A key that always returns a static value.
#[derive(Debug, Clone)]
pub struct StaticKey {
    key: String,
}

impl StaticKey {
    /// Create a new static key.
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

impl KeyGenerator for StaticKey {
    fn generate(&self, _ctx: &KeyContext<'_>) -> Option<String> {
        Some(self.key.clone())
    }

    fn name(&self) -> &'static str {
        "static"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_key() {
        let request = RequestInfo::new("GET", "/");
        let ctx = KeyContext::new(&request, "10.0.0.1");
        let key = StaticKey::new("global");
        assert_eq!(key.generate(&ctx), Some("global".to_string()));
        assert_eq!(key.name(), "static");
    }

    #[test]
    fn test_fn_key() {
        let key = FnKey::new("tenant", |ctx: &KeyContext<'_>| {
            ctx.request()
                .header("x-tenant")
                .map(|tenant| format!("tenant:{tenant}"))
        });

        let request = RequestInfo::new("GET", "/").with_header("X-Tenant", "acme");
        let ctx = KeyContext::new(&request, "10.0.0.1");
        assert_eq!(key.generate(&ctx), Some("tenant:acme".to_string()));
        assert_eq!(key.name(), "tenant");
    }

    #[test]
    fn test_arc_dyn_generator() {
        let key: Arc<dyn KeyGenerator> = Arc::new(IpKey::new());
        let request = RequestInfo::new("GET", "/");
        let ctx = KeyContext::new(&request, "192.0.2.7");
        assert_eq!(key.generate(&ctx), Some("ip:192.0.2.7".to_string()));
        assert_eq!(key.name(), "ip");
    }
}
