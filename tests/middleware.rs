//! Integration tests for the middleware adapters.

use std::sync::Arc;

use parking_lot::Mutex;

use admission_ratelimit::key::{RequestInfo, RequestMeta};
use admission_ratelimit::middleware::{AuditEvent, RejectionBody, WrapOptions};
use admission_ratelimit::{
    ConfigOverride, ConfigRegistry, DecisionSource, Preset, RateLimiter, wrap_with_rate_limit,
};

fn limiter() -> Arc<RateLimiter> {
    Arc::new(RateLimiter::new(ConfigRegistry::with_presets()))
}

fn login_from(ip: &str) -> RequestInfo {
    RequestInfo::new("POST", "/api/auth/login")
        .with_header("x-forwarded-for", ip)
        .with_header("user-agent", "integration-test")
}

#[tokio::test]
async fn test_blocked_request_never_reaches_handler() {
    let calls = Arc::new(Mutex::new(0u32));
    let seen = calls.clone();
    let guarded = wrap_with_rate_limit(limiter(), Preset::CriticalAuth).wrap(
        move |request: RequestInfo| {
            let seen = seen.clone();
            async move {
                *seen.lock() += 1;
                format!("welcome from {}", request.path())
            }
        },
    );

    let request = login_from("203.0.113.40");
    for _ in 0..3 {
        assert!(guarded.call(request.clone()).await.is_ok());
    }
    let rejection = guarded.call(request).await.unwrap_err();

    assert_eq!(*calls.lock(), 3);
    assert_eq!(rejection.status, 429);
    assert_eq!(
        rejection.message,
        "Too many authentication attempts. Try again in 15 minutes."
    );
    assert!(rejection.retry_after_secs >= 1 && rejection.retry_after_secs <= 900);

    let body: RejectionBody = serde_json::from_str(&rejection.to_json()).unwrap();
    assert_eq!(body.error, rejection.message);
    assert_eq!(body.retry_after, rejection.retry_after_secs);
}

#[tokio::test]
async fn test_rejection_headers() {
    let wrapper = wrap_with_rate_limit(
        limiter(),
        WrapOptions::new("public-api").with_overrides(ConfigOverride::new().max_requests(1)),
    );
    let request = login_from("203.0.113.41");

    assert!(wrapper.admit(&request).await.unwrap().is_some());
    let rejection = wrapper.admit(&request).await.unwrap_err();
    let headers = rejection.headers();

    let get = |name: &str| {
        headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(get("X-RateLimit-Limit").as_deref(), Some("1"));
    assert_eq!(get("X-RateLimit-Remaining").as_deref(), Some("0"));
    assert_eq!(get("Retry-After"), Some(rejection.retry_after_secs.to_string()));
}

#[tokio::test]
async fn test_audit_sink_receives_events() {
    let events: Arc<Mutex<Vec<AuditEvent>>> = Arc::default();
    let sink = events.clone();
    let wrapper = wrap_with_rate_limit(limiter(), Preset::CriticalAuth)
        .with_audit_sink(move |event: &AuditEvent| sink.lock().push(event.clone()));

    let request = login_from("203.0.113.42");
    for _ in 0..4 {
        let _ = wrapper.admit(&request).await;
    }

    let events = events.lock();
    assert_eq!(events.len(), 4);
    assert!(events[..3].iter().all(|e| e.allowed));
    let last = &events[3];
    assert!(!last.allowed);
    assert_eq!(last.client_ip, "203.0.113.42");
    assert_eq!(last.user_agent.as_deref(), Some("integration-test"));
    assert_eq!(last.config, "critical-auth");
    assert_eq!(last.key.as_deref(), Some("ip:203.0.113.42"));
    assert_eq!(last.source, DecisionSource::Fallback);
}

#[tokio::test]
async fn test_no_audit_when_logging_disabled() {
    let events: Arc<Mutex<Vec<AuditEvent>>> = Arc::default();
    let sink = events.clone();
    let wrapper = wrap_with_rate_limit(limiter(), Preset::PublicApi)
        .with_audit_sink(move |event: &AuditEvent| sink.lock().push(event.clone()));

    wrapper.admit(&login_from("203.0.113.43")).await.unwrap();

    assert!(events.lock().is_empty());
}

#[tokio::test]
async fn test_unknown_config_admits() {
    let wrapper = wrap_with_rate_limit(limiter(), "NONEXISTENT");
    let request = login_from("203.0.113.44");

    for _ in 0..20 {
        let decision = wrapper.admit(&request).await.unwrap().unwrap();
        assert_eq!(decision.source(), DecisionSource::Error);
    }
}

#[tokio::test]
async fn test_skipped_requests_are_not_counted() {
    let limiter = limiter();
    let wrapper = wrap_with_rate_limit(
        limiter.clone(),
        WrapOptions::from(Preset::CriticalAuth).skip_if(|request: &dyn RequestMeta| {
            request.path().starts_with("/health")
        }),
    );

    let health = RequestInfo::new("GET", "/health").with_header("x-real-ip", "203.0.113.45");
    for _ in 0..5 {
        assert!(wrapper.admit(&health).await.unwrap().is_none());
    }
    assert!(limiter.store().is_empty());

    let login = login_from("203.0.113.45");
    assert!(wrapper.admit(&login).await.unwrap().is_some());
}

#[cfg(feature = "axum")]
mod axum_layer {
    use super::*;

    use admission_ratelimit::RateLimitExt;
    use admission_ratelimit::middleware::{CallerIdentity, RateLimitLayer};
    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode},
        routing::post,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route(
                "/api/auth/login",
                post(|Extension(ext): Extension<RateLimitExt>| async move {
                    format!("remaining={}", ext.remaining)
                }),
            )
            .layer(RateLimitLayer::new(limiter(), Preset::CriticalAuth))
    }

    fn login(ip: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/auth/login")
            .header("X-Forwarded-For", ip)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_layer_admits_then_rejects() {
        let app = app();

        for expected in [2, 1, 0] {
            let response = app.clone().oneshot(login("203.0.113.50")).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            assert_eq!(
                response.headers()["x-ratelimit-remaining"],
                expected.to_string().as_str()
            );

            let body = to_bytes(response.into_body(), 1024).await.unwrap();
            assert_eq!(body, format!("remaining={expected}").as_bytes());
        }

        let response = app.oneshot(login("203.0.113.50")).await.unwrap();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()["content-type"], "application/json");
        assert!(response.headers().contains_key("retry-after"));

        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        let body: RejectionBody = serde_json::from_slice(&body).unwrap();
        assert!(body.error.contains("authentication"));
        assert!(body.retry_after >= 1);
    }

    #[tokio::test]
    async fn test_layer_keys_on_caller_identity() {
        let limiter = limiter();
        let app = Router::new()
            .route("/api/pay", post(|| async { "paid" }))
            .layer(RateLimitLayer::new(limiter.clone(), "payment-api"));

        let mut request = Request::builder()
            .method("POST")
            .uri("/api/pay")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(CallerIdentity("user_77".into()));

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            limiter.store().get("payment-api:user:user_77:/api/pay").map(|e| e.count),
            Some(1)
        );
    }
}
