//! Request metadata and the built-in key generators.
//!
//! Generators never touch a framework request type directly. Adapters
//! expose requests through [`RequestMeta`]; [`RequestInfo`] is the owned
//! implementation used by the tower layer and by tests.

use std::collections::HashMap;
use std::net::IpAddr;

use crate::key::{CompositeKey, EitherKey, KeyContext, KeyGenerator};

/// Address reported when neither headers nor the socket yield one.
pub const UNKNOWN_IP: &str = "unknown";

/// Headers consulted for the client address, in priority order.
pub const DEFAULT_IP_HEADERS: [&str; 4] = [
    "x-forwarded-for",
    "x-real-ip",
    "x-client-ip",
    "cf-connecting-ip",
];

// ============================================================================
// Request Metadata
// ============================================================================

/// Read-only view of an inbound request.
pub trait RequestMeta: Send + Sync {
    /// Get a header value by case-insensitive name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Get the request path.
    fn path(&self) -> &str;

    /// Get the request method (GET, POST, etc).
    fn method(&self) -> &str;

    /// Address of the directly connected peer.
    fn peer_addr(&self) -> Option<IpAddr> {
        None
    }

    /// Authenticated caller identity, when an auth layer has set one.
    fn identity(&self) -> Option<&str> {
        None
    }
}

/// Owned request metadata.
///
/// ```ignore
/// use admission_ratelimit::key::RequestInfo;
///
/// let request = RequestInfo::new("POST", "/api/payments")
///     .with_header("X-Forwarded-For", "203.0.113.9")
///     .with_identity("user_42");
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestInfo {
    method: String,
    path: String,
    headers: HashMap<String, String>,
    peer_addr: Option<IpAddr>,
    identity: Option<String>,
}

impl RequestInfo {
    /// Create request metadata for `method` and `path`.
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Default::default()
        }
    }

    /// Add a header. Names are stored lowercase.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.insert_header(name, value);
        self
    }

    /// Add a header in place.
    pub fn insert_header(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    /// Set the connected peer address.
    pub fn with_peer_addr(mut self, addr: IpAddr) -> Self {
        self.peer_addr = Some(addr);
        self
    }

    /// Set the authenticated identity.
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }
}

impl RequestMeta for RequestInfo {
    fn header(&self, name: &str) -> Option<&str> {
        match self.headers.get(name) {
            Some(value) => Some(value.as_str()),
            None => self
                .headers
                .get(&name.to_ascii_lowercase())
                .map(String::as_str),
        }
    }

    fn path(&self) -> &str {
        &self.path
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn peer_addr(&self) -> Option<IpAddr> {
        self.peer_addr
    }

    fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

// ============================================================================
// Client Address Resolution
// ============================================================================

/// Resolves the client address for a request.
///
/// By default the first element of the first forwarding header present
/// wins, then the peer address, then [`UNKNOWN_IP`]. Those headers are
/// client-controlled, so a deployment that sits behind a known number of
/// proxies should use [`ClientIpResolver::trusted_hops`]: the address is
/// then taken from `X-Forwarded-For` counting from the right, and any
/// value that does not parse as an IP is ignored.
#[derive(Debug, Clone)]
pub struct ClientIpResolver {
    headers: Vec<String>,
    trusted_hops: Option<usize>,
}

impl Default for ClientIpResolver {
    fn default() -> Self {
        Self {
            headers: DEFAULT_IP_HEADERS.iter().map(|h| h.to_string()).collect(),
            trusted_hops: None,
        }
    }
}

impl ClientIpResolver {
    /// Resolver that trusts forwarding headers as sent.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolver for a deployment behind exactly `hops` proxies.
    ///
    /// With zero hops only the peer address is used.
    pub fn trusted_hops(hops: usize) -> Self {
        Self {
            trusted_hops: Some(hops),
            ..Self::default()
        }
    }

    /// Replace the list of forwarding headers consulted in default mode.
    pub fn with_headers<I, S>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.headers = headers
            .into_iter()
            .map(|h| h.as_ref().to_ascii_lowercase())
            .collect();
        self
    }

    /// Resolve the client address for `request`.
    pub fn resolve(&self, request: &dyn RequestMeta) -> String {
        let forwarded = match self.trusted_hops {
            None => self.first_forwarded(request),
            Some(hops) => trusted_forwarded(request, hops),
        };

        forwarded
            .or_else(|| request.peer_addr().map(|ip| ip.to_string()))
            .unwrap_or_else(|| UNKNOWN_IP.to_string())
    }

    fn first_forwarded(&self, request: &dyn RequestMeta) -> Option<String> {
        self.headers.iter().find_map(|header| {
            let value = request.header(header)?;
            let first = value.split(',').next()?.trim();
            (!first.is_empty()).then(|| first.to_string())
        })
    }
}

fn trusted_forwarded(request: &dyn RequestMeta, hops: usize) -> Option<String> {
    if hops == 0 {
        return None;
    }
    let chain: Vec<&str> = request
        .header("x-forwarded-for")?
        .split(',')
        .map(str::trim)
        .collect();
    let index = chain.len().checked_sub(hops)?;
    let ip: IpAddr = chain.get(index)?.parse().ok()?;
    Some(ip.to_string())
}

// ============================================================================
// Built-in Generators
// ============================================================================

/// `ip:<addr>`: one counter per client address.
#[derive(Debug, Clone, Default)]
pub struct IpKey;

impl IpKey {
    /// Create a new IP key generator.
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for IpKey {
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        Some(format!("ip:{}", ctx.client_ip()))
    }

    fn name(&self) -> &'static str {
        "ip"
    }
}

/// `user:<id>` for authenticated callers.
///
/// The identity set by an auth layer wins over the identity header.
/// Yields `None` for anonymous requests.
#[derive(Debug, Clone)]
pub struct IdentityKey {
    header: &'static str,
}

impl Default for IdentityKey {
    fn default() -> Self {
        Self {
            header: "x-user-id",
        }
    }
}

impl IdentityKey {
    /// Create a new identity key generator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the identity from a different header.
    pub fn with_header(header: &'static str) -> Self {
        Self { header }
    }
}

impl KeyGenerator for IdentityKey {
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        let request = ctx.request();
        request
            .identity()
            .or_else(|| request.header(self.header))
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(|id| format!("user:{id}"))
    }

    fn name(&self) -> &'static str {
        "identity"
    }
}

/// The raw request path.
#[derive(Debug, Clone, Default)]
pub struct PathKey;

impl PathKey {
    /// Create a new path key generator.
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for PathKey {
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        Some(ctx.path().to_string())
    }

    fn name(&self) -> &'static str {
        "path"
    }
}

/// `endpoint:<ip>:<path>`: one counter per address and route.
#[derive(Debug, Clone, Default)]
pub struct EndpointKey;

impl EndpointKey {
    /// Create a new endpoint key generator.
    pub fn new() -> Self {
        Self
    }
}

impl KeyGenerator for EndpointKey {
    fn generate(&self, ctx: &KeyContext<'_>) -> Option<String> {
        Some(format!("endpoint:{}:{}", ctx.client_ip(), ctx.path()))
    }

    fn name(&self) -> &'static str {
        "endpoint"
    }
}

/// Identity when present, client address otherwise.
pub type UserKey = EitherKey<IdentityKey, IpKey>;

/// Identity plus path when present, client address otherwise.
pub type HybridKey = EitherKey<CompositeKey<IdentityKey, PathKey>, IpKey>;

/// Key by client address.
pub fn ip_key() -> IpKey {
    IpKey::new()
}

/// Key by authenticated identity, falling back to the client address.
pub fn user_key() -> UserKey {
    EitherKey::new(IdentityKey::new(), IpKey::new()).with_name("user")
}

/// Key by client address and path.
pub fn endpoint_key() -> EndpointKey {
    EndpointKey::new()
}

/// Key by identity and path, falling back to the client address.
pub fn hybrid_key() -> HybridKey {
    EitherKey::new(
        CompositeKey::new(IdentityKey::new(), PathKey::new()).with_name("identity_path"),
        IpKey::new(),
    )
    .with_name("hybrid")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keyed(generator: &dyn KeyGenerator, request: &RequestInfo) -> Option<String> {
        let ctx = KeyContext::resolve(request, &ClientIpResolver::default());
        generator.generate(&ctx)
    }

    #[test]
    fn test_header_lookup_case_insensitive() {
        let request = RequestInfo::new("GET", "/").with_header("X-Real-IP", "198.51.100.4");
        assert_eq!(request.header("x-real-ip"), Some("198.51.100.4"));
        assert_eq!(request.header("X-REAL-IP"), Some("198.51.100.4"));
    }

    #[test]
    fn test_resolver_header_priority() {
        let resolver = ClientIpResolver::default();
        let request = RequestInfo::new("GET", "/")
            .with_header("x-real-ip", "198.51.100.4")
            .with_header("x-forwarded-for", "203.0.113.50, 70.41.3.18");

        assert_eq!(resolver.resolve(&request), "203.0.113.50");
    }

    #[test]
    fn test_resolver_falls_back_to_peer_then_unknown() {
        let resolver = ClientIpResolver::default();
        let request = RequestInfo::new("GET", "/").with_peer_addr("10.0.0.1".parse().unwrap());
        assert_eq!(resolver.resolve(&request), "10.0.0.1");

        let request = RequestInfo::new("GET", "/");
        assert_eq!(resolver.resolve(&request), UNKNOWN_IP);
    }

    #[test]
    fn test_resolver_skips_empty_header() {
        let resolver = ClientIpResolver::default();
        let request = RequestInfo::new("GET", "/")
            .with_header("x-forwarded-for", " , 1.1.1.1")
            .with_header("cf-connecting-ip", "192.0.2.1");
        assert_eq!(resolver.resolve(&request), "192.0.2.1");
    }

    #[test]
    fn test_resolver_trusted_hops() {
        let resolver = ClientIpResolver::trusted_hops(1);
        let request = RequestInfo::new("GET", "/")
            .with_header("x-forwarded-for", "6.6.6.6, 203.0.113.7")
            .with_peer_addr("10.0.0.2".parse().unwrap());
        assert_eq!(resolver.resolve(&request), "203.0.113.7");

        let resolver = ClientIpResolver::trusted_hops(2);
        assert_eq!(resolver.resolve(&request), "6.6.6.6");

        // More hops than entries: fall back to the peer.
        let resolver = ClientIpResolver::trusted_hops(3);
        assert_eq!(resolver.resolve(&request), "10.0.0.2");
    }

    #[test]
    fn test_resolver_trusted_hops_rejects_garbage() {
        let resolver = ClientIpResolver::trusted_hops(1);
        let request = RequestInfo::new("GET", "/")
            .with_header("x-forwarded-for", "not-an-ip")
            .with_peer_addr("10.0.0.2".parse().unwrap());
        assert_eq!(resolver.resolve(&request), "10.0.0.2");

        let resolver = ClientIpResolver::trusted_hops(0);
        let request = request.with_header("x-forwarded-for", "203.0.113.7");
        assert_eq!(resolver.resolve(&request), "10.0.0.2");
    }

    #[test]
    fn test_ip_key() {
        let request = RequestInfo::new("GET", "/").with_header("x-forwarded-for", "1.2.3.4");
        assert_eq!(keyed(&ip_key(), &request), Some("ip:1.2.3.4".to_string()));
    }

    #[test]
    fn test_identity_key_prefers_claim() {
        let request = RequestInfo::new("GET", "/")
            .with_identity("claim_user")
            .with_header("x-user-id", "header_user");
        assert_eq!(
            keyed(&IdentityKey::new(), &request),
            Some("user:claim_user".to_string())
        );

        let request = RequestInfo::new("GET", "/").with_header("x-user-id", "header_user");
        assert_eq!(
            keyed(&IdentityKey::new(), &request),
            Some("user:header_user".to_string())
        );

        let request = RequestInfo::new("GET", "/").with_header("x-user-id", "  ");
        assert_eq!(keyed(&IdentityKey::new(), &request), None);
    }

    #[test]
    fn test_user_key_falls_back_to_ip() {
        let request = RequestInfo::new("GET", "/").with_peer_addr("10.1.1.1".parse().unwrap());
        assert_eq!(keyed(&user_key(), &request), Some("ip:10.1.1.1".to_string()));
        assert_eq!(user_key().name(), "user");
    }

    #[test]
    fn test_endpoint_key() {
        let request = RequestInfo::new("GET", "/api/search").with_header("x-real-ip", "5.6.7.8");
        assert_eq!(
            keyed(&endpoint_key(), &request),
            Some("endpoint:5.6.7.8:/api/search".to_string())
        );
    }

    #[test]
    fn test_hybrid_key() {
        let request = RequestInfo::new("GET", "/api/x").with_identity("user_123");
        assert_eq!(
            keyed(&hybrid_key(), &request),
            Some("user:user_123:/api/x".to_string())
        );

        let request = RequestInfo::new("GET", "/api/x").with_header("x-forwarded-for", "1.2.3.4");
        assert_eq!(keyed(&hybrid_key(), &request), Some("ip:1.2.3.4".to_string()));
    }
}
