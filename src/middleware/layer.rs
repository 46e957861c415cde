//! Tower layer for admission control in Axum.

use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, HeaderName, HeaderValue, Request, Response, StatusCode, header},
};
use tower::{Layer, Service};

use crate::backend::DistributedBackend;
use crate::decision::Decision;
use crate::extensions::RateLimitExt;
use crate::key::RequestInfo;
use crate::limiter::RateLimiter;
use crate::middleware::wrap::{RateLimitWrapper, Rejection, WrapOptions, wrap_with_rate_limit};

/// Authenticated caller identity, set by an auth layer that runs first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity(pub String);

/// Tower layer applying one config to every request.
pub struct RateLimitLayer<B> {
    wrapper: RateLimitWrapper<B>,
}

impl<B: DistributedBackend> RateLimitLayer<B> {
    /// Create a new rate limit layer.
    pub fn new(limiter: Arc<RateLimiter<B>>, options: impl Into<WrapOptions>) -> Self {
        Self {
            wrapper: wrap_with_rate_limit(limiter, options),
        }
    }

    /// Build the layer around an already configured wrapper.
    pub fn from_wrapper(wrapper: RateLimitWrapper<B>) -> Self {
        Self { wrapper }
    }
}

impl<B> Clone for RateLimitLayer<B> {
    fn clone(&self) -> Self {
        Self {
            wrapper: self.wrapper.clone(),
        }
    }
}

impl<B, Inner> Layer<Inner> for RateLimitLayer<B> {
    type Service = RateLimitService<B, Inner>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService {
            inner,
            wrapper: self.wrapper.clone(),
        }
    }
}

/// The admission service.
pub struct RateLimitService<B, Inner> {
    inner: Inner,
    wrapper: RateLimitWrapper<B>,
}

impl<B, Inner: Clone> Clone for RateLimitService<B, Inner> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            wrapper: self.wrapper.clone(),
        }
    }
}

/// Copy what key generation needs out of an Axum request.
pub fn request_info(request: &Request<Body>) -> RequestInfo {
    let mut info = RequestInfo::new(request.method().as_str(), request.uri().path());
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            info.insert_header(name.as_str(), value);
        }
    }
    if let Some(ConnectInfo(addr)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        info = info.with_peer_addr(addr.ip());
    }
    if let Some(CallerIdentity(id)) = request.extensions().get::<CallerIdentity>() {
        info = info.with_identity(id.clone());
    }
    info
}

impl<B, Inner> Service<Request<Body>> for RateLimitService<B, Inner>
where
    B: DistributedBackend,
    Inner: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    Inner::Future: Send,
{
    type Response = Response<Body>;
    type Error = Inner::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut request: Request<Body>) -> Self::Future {
        let wrapper = self.wrapper.clone();
        // Use the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let info = request_info(&request);

            match wrapper.admit(&info).await {
                Ok(Some(decision)) => {
                    request.extensions_mut().insert(RateLimitExt::new(
                        wrapper.options().config_name(),
                        decision.clone(),
                    ));
                    let mut response = inner.call(request).await?;
                    insert_rate_limit_headers(response.headers_mut(), &decision);
                    Ok(response)
                }
                Ok(None) => inner.call(request).await,
                Err(rejection) => Ok(rejection_response(&rejection)),
            }
        })
    }
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision) {
    for (name, value) in decision.info().to_headers() {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            headers.insert(name, value);
        }
    }
}

/// Create a 429 Too Many Requests response.
fn rejection_response(rejection: &Rejection) -> Response<Body> {
    let mut response = Response::new(Body::from(rejection.to_json()));
    *response.status_mut() = StatusCode::TOO_MANY_REQUESTS;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    insert_rate_limit_headers(headers, &rejection.decision);

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RequestMeta;

    #[test]
    fn test_request_info_extraction() {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/pay?x=1")
            .header("X-Forwarded-For", "203.0.113.1")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(CallerIdentity("user_1".into()));
        request
            .extensions_mut()
            .insert(ConnectInfo("10.0.0.9:4000".parse::<SocketAddr>().unwrap()));

        let info = request_info(&request);
        assert_eq!(info.method(), "POST");
        assert_eq!(info.path(), "/api/pay");
        assert_eq!(info.header("x-forwarded-for"), Some("203.0.113.1"));
        assert_eq!(info.identity(), Some("user_1"));
        assert_eq!(info.peer_addr(), Some("10.0.0.9".parse().unwrap()));
    }
}
