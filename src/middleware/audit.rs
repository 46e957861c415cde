//! Observability sink for admission decisions.

use serde::Serialize;
use tracing::{info, warn};

use crate::decision::{Decision, DecisionSource};

/// One admission decision, as seen at the edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    pub endpoint: String,
    pub method: String,
    pub client_ip: String,
    pub user_agent: Option<String>,
    pub config: String,
    pub key: Option<String>,
    pub limit: u64,
    pub remaining: u64,
    pub source: DecisionSource,
    pub allowed: bool,
}

impl AuditEvent {
    pub(crate) fn from_decision(
        decision: &Decision,
        config: &str,
        endpoint: &str,
        method: &str,
        client_ip: String,
        user_agent: Option<&str>,
    ) -> Self {
        let info = decision.info();
        Self {
            endpoint: endpoint.to_string(),
            method: method.to_string(),
            client_ip,
            user_agent: user_agent.map(str::to_string),
            config: config.to_string(),
            key: info.metadata.as_ref().and_then(|m| m.key.clone()),
            limit: info.limit,
            remaining: info.remaining,
            source: info.source,
            allowed: decision.is_allowed(),
        }
    }
}

/// Receives audit events from the middleware.
///
/// Called inline on the request path; implementations should hand off
/// anything slow.
pub trait AuditSink: Send + Sync + 'static {
    fn record(&self, event: &AuditEvent);
}

impl<F> AuditSink for F
where
    F: Fn(&AuditEvent) + Send + Sync + 'static,
{
    fn record(&self, event: &AuditEvent) {
        self(event)
    }
}

/// Emits audit events through `tracing`: blocks at WARN, admits at INFO.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl AuditSink for TracingSink {
    fn record(&self, event: &AuditEvent) {
        if event.allowed {
            info!(
                endpoint = %event.endpoint,
                method = %event.method,
                client_ip = %event.client_ip,
                config = %event.config,
                remaining = event.remaining,
                source = event.source.as_str(),
                "Request admitted"
            );
        } else {
            warn!(
                endpoint = %event.endpoint,
                method = %event.method,
                client_ip = %event.client_ip,
                user_agent = event.user_agent.as_deref().unwrap_or("unknown"),
                config = %event.config,
                limit = event.limit,
                source = event.source.as_str(),
                "Request rejected"
            );
        }
    }
}
