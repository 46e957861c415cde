//! Admission control walkthrough.
//!
//! Run with:
//! ```
//! cargo run --example admission
//! ```

use std::sync::Arc;

use admission_ratelimit::key::RequestInfo;
use admission_ratelimit::middleware::{AuthContext, SecurityLevel, check_rate_limit_with_auth};
use admission_ratelimit::{ConfigRegistry, Preset, RateLimiter, RequestMeta, wrap_with_rate_limit};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let limiter = Arc::new(RateLimiter::new(ConfigRegistry::with_presets()));

    println!("=== Presets ===\n");
    for preset in Preset::ALL {
        let config = preset.config();
        println!(
            "  {:<14} {:>4} requests / {:>4}s",
            preset.name(),
            config.max_requests(),
            config.window().as_secs()
        );
    }

    println!("\n=== Login attempts from one address ===\n");
    let login = RequestInfo::new("POST", "/api/auth/login").with_header("x-forwarded-for", "203.0.113.9");
    for attempt in 1..=5 {
        let decision = limiter.check_rate_limit(&login, "critical-auth", None).await;
        if decision.is_allowed() {
            println!("  #{attempt}: admitted, {} remaining", decision.info().remaining);
        } else {
            println!(
                "  #{attempt}: rejected, retry in {}s",
                decision.info().retry_after_secs().unwrap_or(1)
            );
        }
    }

    println!("\n=== Unknown config fails open ===\n");
    let decision = limiter.check_rate_limit(&login, "NONEXISTENT", None).await;
    println!(
        "  allowed={} source={} code={:?}",
        decision.is_allowed(),
        decision.source().as_str(),
        decision.code()
    );

    println!("\n=== Wrapped handler ===\n");
    let guarded = wrap_with_rate_limit(limiter.clone(), Preset::UploadApi)
        .wrap(|request: RequestInfo| async move { format!("stored upload for {}", request.path()) });
    let upload = RequestInfo::new("POST", "/api/upload").with_identity("user_42");
    for _ in 0..11 {
        match guarded.call(upload.clone()).await {
            Ok(body) => println!("  200 {body}"),
            Err(rejection) => println!("  {} {}", rejection.status, rejection.to_json()),
        }
    }

    println!("\n=== Role-based limits ===\n");
    let auth = AuthContext::new("user_7")
        .with_permission("payment_access")
        .with_security_level(SecurityLevel::High);
    let pay = RequestInfo::new("POST", "/api/payments");
    let decision = check_rate_limit_with_auth(&limiter, &pay, Some(&auth), None).await;
    println!("  payment limit for a high-security session: {}", decision.info().limit);

    println!("\n=== Metrics ===\n");
    let snapshot = limiter.metrics().snapshot();
    println!("{}", serde_json::to_string_pretty(&snapshot)?);

    Ok(())
}
