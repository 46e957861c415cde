//! Config selection from an authenticated caller.
//!
//! When the caller is known but the route names no config, the caller's
//! role picks one: admins get `admin-api`, callers with payment access get
//! `payment-api`, everyone else `public-api`. Elevated security levels
//! tighten the limit, and the counter is scoped to the user and path.

use crate::backend::DistributedBackend;
use crate::config::{ConfigOverride, Preset};
use crate::decision::Decision;
use crate::key::{FnKey, KeyContext, RequestMeta};
use crate::limiter::RateLimiter;

/// Permission that selects the payment preset.
pub const PAYMENT_PERMISSION: &str = "payment_access";

/// How sensitive the caller's session is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SecurityLevel {
    #[default]
    Standard,
    /// Three quarters of the preset limit.
    High,
    /// Half of the preset limit.
    Critical,
}

impl SecurityLevel {
    fn scale(&self, max_requests: u64) -> Option<u64> {
        match self {
            Self::Standard => None,
            Self::High => Some((max_requests * 3 / 4).max(1)),
            Self::Critical => Some((max_requests / 2).max(1)),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user_id: String,
    pub is_admin: bool,
    pub permissions: Vec<String>,
    pub security_level: SecurityLevel,
}

impl AuthContext {
    pub fn new(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            ..Default::default()
        }
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn with_permission(mut self, permission: impl Into<String>) -> Self {
        self.permissions.push(permission.into());
        self
    }

    pub fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// The preset matching the caller's role.
    pub fn preset(&self) -> Preset {
        if self.is_admin {
            Preset::AdminApi
        } else if self.permissions.iter().any(|p| p == PAYMENT_PERMISSION) {
            Preset::PaymentApi
        } else {
            Preset::PublicApi
        }
    }
}

/// Check `request`, choosing the config from `auth` when `config_name` is
/// not given.
///
/// An explicit `config_name` always wins and is applied unchanged. With
/// neither, `public-api` applies.
pub async fn check_rate_limit_with_auth<B: DistributedBackend>(
    limiter: &RateLimiter<B>,
    request: &dyn RequestMeta,
    auth: Option<&AuthContext>,
    config_name: Option<&str>,
) -> Decision {
    if let Some(name) = config_name {
        return limiter.check_rate_limit(request, name, None).await;
    }

    let Some(auth) = auth else {
        return limiter
            .check_rate_limit(request, Preset::PublicApi.name(), None)
            .await;
    };

    let preset = auth.preset();
    let user_id = auth.user_id.clone();
    let mut overrides = ConfigOverride::new().key_generator(FnKey::new(
        "auth_user",
        move |ctx: &KeyContext<'_>| Some(format!("user:{}:{}", user_id, ctx.path())),
    ));

    if let Ok(base) = limiter.registry().lookup(preset.name()) {
        if let Some(max) = auth.security_level.scale(base.max_requests()) {
            overrides = overrides.max_requests(max);
        }
    }

    limiter
        .check_rate_limit(request, preset.name(), Some(&overrides))
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::RequestInfo;
    use crate::registry::ConfigRegistry;

    #[test]
    fn test_preset_selection() {
        assert_eq!(AuthContext::new("u").admin().preset(), Preset::AdminApi);
        assert_eq!(
            AuthContext::new("u").with_permission(PAYMENT_PERMISSION).preset(),
            Preset::PaymentApi
        );
        assert_eq!(AuthContext::new("u").preset(), Preset::PublicApi);
    }

    #[test]
    fn test_security_scaling() {
        assert_eq!(SecurityLevel::Standard.scale(50), None);
        assert_eq!(SecurityLevel::High.scale(50), Some(37));
        assert_eq!(SecurityLevel::Critical.scale(15), Some(7));
        assert_eq!(SecurityLevel::Critical.scale(1), Some(1));
    }

    #[tokio::test]
    async fn test_auth_scoped_key_and_limit() {
        let limiter = RateLimiter::new(ConfigRegistry::with_presets());
        let auth = AuthContext::new("user_9")
            .with_permission(PAYMENT_PERMISSION)
            .with_security_level(SecurityLevel::Critical);
        let request = RequestInfo::new("POST", "/api/pay");

        let mut allowed = 0;
        for _ in 0..10 {
            let decision = check_rate_limit_with_auth(&limiter, &request, Some(&auth), None).await;
            if decision.is_allowed() {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 7);

        let decision = check_rate_limit_with_auth(&limiter, &request, Some(&auth), None).await;
        let key = decision.info().metadata.as_ref().and_then(|m| m.key.clone());
        assert_eq!(key.as_deref(), Some("user:user_9:/api/pay"));
    }

    #[tokio::test]
    async fn test_explicit_config_wins() {
        let limiter = RateLimiter::new(ConfigRegistry::with_presets());
        let auth = AuthContext::new("admin_1").admin();
        let request = RequestInfo::new("POST", "/login");

        let decision =
            check_rate_limit_with_auth(&limiter, &request, Some(&auth), Some("critical-auth")).await;
        assert_eq!(decision.info().limit, 3);
    }
}
