//! Decision metrics.
//!
//! Counters are plain atomics. The two rankings (most blocked keys and
//! most blocked endpoints) sit behind small mutexes that are only taken on
//! blocked requests, so contention is bounded by the block rate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::decision::{Decision, DecisionSource};

/// One row of a ranking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RankedEntry {
    pub name: String,
    pub count: u64,
}

/// Point-in-time view of the collector.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub allowed_requests: u64,
    pub blocked_requests: u64,
    pub distributed_hits: u64,
    pub fallback_uses: u64,
    pub errors: u64,
    pub backend_errors: u64,
    pub average_response_time_ms: f64,
    pub top_blocked_identifiers: Vec<RankedEntry>,
    pub top_endpoints: Vec<RankedEntry>,
}

/// Bounded tally with an ordered head.
#[derive(Debug)]
struct Ranking {
    counts: HashMap<String, u64>,
    top: Vec<RankedEntry>,
    top_n: usize,
    max_tracked: usize,
}

impl Ranking {
    fn new(top_n: usize, max_tracked: usize) -> Self {
        Self {
            counts: HashMap::new(),
            top: Vec::with_capacity(top_n + 1),
            top_n,
            max_tracked: max_tracked.max(top_n),
        }
    }

    fn record(&mut self, name: &str) {
        let count = match self.counts.get_mut(name) {
            Some(count) => {
                *count += 1;
                *count
            }
            None => {
                self.counts.insert(name.to_string(), 1);
                1
            }
        };

        // Insert, then truncate.
        self.top.retain(|entry| entry.name != name);
        let position = self
            .top
            .iter()
            .position(|entry| entry.count < count)
            .unwrap_or(self.top.len());
        if position < self.top_n {
            self.top.insert(
                position,
                RankedEntry {
                    name: name.to_string(),
                    count,
                },
            );
            self.top.truncate(self.top_n);
        }

        if self.counts.len() > self.max_tracked {
            self.prune();
        }
    }

    /// Drop the low-count tail so the tally stays bounded.
    fn prune(&mut self) {
        let keep = (self.max_tracked / 2).max(self.top_n);
        let mut entries: Vec<(String, u64)> = self.counts.drain().collect();
        entries.sort_unstable_by(|a, b| b.1.cmp(&a.1));
        let dropped = entries.len().saturating_sub(keep);
        entries.truncate(keep);
        self.counts = entries.into_iter().collect();
        debug!(dropped, kept = self.counts.len(), "Pruned ranking tail");
    }

    fn clear(&mut self) {
        self.counts.clear();
        self.top.clear();
    }
}

/// Aggregates decisions for one engine instance.
#[derive(Debug)]
pub struct MetricsCollector {
    total: AtomicU64,
    allowed: AtomicU64,
    blocked: AtomicU64,
    distributed_hits: AtomicU64,
    fallback_uses: AtomicU64,
    errors: AtomicU64,
    backend_errors: AtomicU64,
    response_time_nanos: AtomicU64,
    response_samples: AtomicU64,
    blocked_identifiers: Mutex<Ranking>,
    blocked_endpoints: Mutex<Ranking>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(10, 10_000)
    }
}

impl MetricsCollector {
    /// Create a collector keeping `top_n` rows per ranking and tallying at
    /// most `max_tracked` names per ranking.
    pub fn new(top_n: usize, max_tracked: usize) -> Self {
        Self {
            total: AtomicU64::new(0),
            allowed: AtomicU64::new(0),
            blocked: AtomicU64::new(0),
            distributed_hits: AtomicU64::new(0),
            fallback_uses: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            backend_errors: AtomicU64::new(0),
            response_time_nanos: AtomicU64::new(0),
            response_samples: AtomicU64::new(0),
            blocked_identifiers: Mutex::new(Ranking::new(top_n, max_tracked)),
            blocked_endpoints: Mutex::new(Ranking::new(top_n, max_tracked)),
        }
    }

    /// Record one decision and the time it took.
    ///
    /// Blocked decisions feed the rankings from their metadata key and
    /// endpoint.
    pub fn record(&self, decision: &Decision, elapsed: Duration) {
        self.total.fetch_add(1, Ordering::Relaxed);
        if decision.is_allowed() {
            self.allowed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.blocked.fetch_add(1, Ordering::Relaxed);
        }

        match decision.source() {
            DecisionSource::Distributed => self.distributed_hits.fetch_add(1, Ordering::Relaxed),
            DecisionSource::Fallback => self.fallback_uses.fetch_add(1, Ordering::Relaxed),
            DecisionSource::Error => self.errors.fetch_add(1, Ordering::Relaxed),
        };

        let nanos = u64::try_from(elapsed.as_nanos()).unwrap_or(u64::MAX);
        self.response_time_nanos.fetch_add(nanos, Ordering::Relaxed);
        self.response_samples.fetch_add(1, Ordering::Relaxed);

        if decision.is_denied() {
            if let Some(metadata) = &decision.info().metadata {
                if let Some(key) = &metadata.key {
                    self.blocked_identifiers.lock().record(key);
                }
                if let Some(endpoint) = &metadata.endpoint {
                    self.blocked_endpoints.lock().record(endpoint);
                }
            }
        }
    }

    /// Count a failed distributed backend call.
    pub fn record_backend_error(&self) {
        self.backend_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy out the current state.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let samples = self.response_samples.load(Ordering::Relaxed);
        let average_response_time_ms = if samples == 0 {
            0.0
        } else {
            self.response_time_nanos.load(Ordering::Relaxed) as f64 / samples as f64 / 1_000_000.0
        };

        MetricsSnapshot {
            total_requests: self.total.load(Ordering::Relaxed),
            allowed_requests: self.allowed.load(Ordering::Relaxed),
            blocked_requests: self.blocked.load(Ordering::Relaxed),
            distributed_hits: self.distributed_hits.load(Ordering::Relaxed),
            fallback_uses: self.fallback_uses.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            backend_errors: self.backend_errors.load(Ordering::Relaxed),
            average_response_time_ms,
            top_blocked_identifiers: self.blocked_identifiers.lock().top.clone(),
            top_endpoints: self.blocked_endpoints.lock().top.clone(),
        }
    }

    /// Zero every counter and clear the rankings.
    pub fn reset(&self) {
        for counter in [
            &self.total,
            &self.allowed,
            &self.blocked,
            &self.distributed_hits,
            &self.fallback_uses,
            &self.errors,
            &self.backend_errors,
            &self.response_time_nanos,
            &self.response_samples,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.blocked_identifiers.lock().clear();
        self.blocked_endpoints.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decision::DecisionMetadata;
    use crate::error::ErrorCode;
    use crate::storage::current_timestamp_ms;

    fn decision(count: u64, limit: u64, key: &str, endpoint: &str) -> Decision {
        let now = current_timestamp_ms();
        let mut decision =
            Decision::from_count(limit, count, now, now + 60_000, DecisionSource::Fallback);
        decision.info_mut().metadata = Some(
            DecisionMetadata::new()
                .with_key(key)
                .with_endpoint(endpoint),
        );
        decision
    }

    #[test]
    fn test_counters() {
        let metrics = MetricsCollector::default();
        metrics.record(&decision(1, 1, "ip:a", "/x"), Duration::from_millis(2));
        metrics.record(&decision(2, 1, "ip:a", "/x"), Duration::from_millis(4));
        metrics.record(
            &Decision::fail_open(ErrorCode::InternalError, "boom", 10, Duration::from_secs(1)),
            Duration::from_millis(0),
        );
        metrics.record_backend_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.allowed_requests, 2);
        assert_eq!(snapshot.blocked_requests, 1);
        assert_eq!(snapshot.fallback_uses, 2);
        assert_eq!(snapshot.errors, 1);
        assert_eq!(snapshot.backend_errors, 1);
        assert!((snapshot.average_response_time_ms - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_rankings_ordered_and_bounded() {
        let metrics = MetricsCollector::new(2, 100);
        for _ in 0..3 {
            metrics.record(&decision(5, 1, "ip:a", "/login"), Duration::ZERO);
        }
        for _ in 0..5 {
            metrics.record(&decision(5, 1, "ip:b", "/pay"), Duration::ZERO);
        }
        metrics.record(&decision(5, 1, "ip:c", "/login"), Duration::ZERO);

        let snapshot = metrics.snapshot();
        assert_eq!(
            snapshot.top_blocked_identifiers,
            vec![
                RankedEntry { name: "ip:b".into(), count: 5 },
                RankedEntry { name: "ip:a".into(), count: 3 },
            ]
        );
        assert_eq!(snapshot.top_endpoints[0].name, "/pay");
        assert_eq!(snapshot.top_endpoints[1].name, "/login");
        assert_eq!(snapshot.top_endpoints[1].count, 4);
    }

    #[test]
    fn test_allowed_decisions_skip_rankings() {
        let metrics = MetricsCollector::default();
        metrics.record(&decision(1, 10, "ip:a", "/x"), Duration::ZERO);
        assert!(metrics.snapshot().top_blocked_identifiers.is_empty());
    }

    #[test]
    fn test_tally_is_pruned() {
        let mut ranking = Ranking::new(2, 10);
        ranking.record("hot");
        ranking.record("hot");
        for i in 0..20 {
            ranking.record(&format!("cold:{i}"));
        }
        assert!(ranking.counts.len() <= 10);
        assert_eq!(ranking.counts.get("hot"), Some(&2));
        assert_eq!(ranking.top[0].name, "hot");
    }

    #[test]
    fn test_reset() {
        let metrics = MetricsCollector::default();
        metrics.record(&decision(3, 1, "ip:a", "/x"), Duration::from_millis(1));
        metrics.reset();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
    }

    #[test]
    fn test_snapshot_serializes_camel_case() {
        let json = serde_json::to_value(MetricsCollector::default().snapshot()).unwrap();
        assert!(json.get("totalRequests").is_some());
        assert!(json.get("topBlockedIdentifiers").is_some());
        assert!(json.get("averageResponseTimeMs").is_some());
    }
}
