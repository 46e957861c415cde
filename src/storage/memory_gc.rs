//! In-memory fallback store with stale-entry eviction.
//!
//! This store uses `DashMap` for thread-safe concurrent access. Each hit
//! runs under the write lock of the key's shard, so concurrent bursts on
//! one key never lose an update. Stale windows are swept lazily so that a
//! long-running process does not keep every key it has ever seen.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::storage::{CounterEntry, current_timestamp_ms, duration_ms};

/// Garbage collection interval configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GcInterval {
    /// Sweep every N hits.
    Requests(u64),
    /// Sweep at fixed time intervals on a background task.
    Duration(Duration),
    /// Disable automatic GC.
    Manual,
}

impl Default for GcInterval {
    fn default() -> Self {
        Self::Requests(10000)
    }
}

/// Garbage collection configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcConfig {
    /// When to trigger a sweep.
    pub interval: GcInterval,
    /// Sweep on insert once the store holds more than this many keys.
    pub max_entries: Option<usize>,
}

impl GcConfig {
    /// Create config with request-based GC.
    pub fn on_requests(count: u64) -> Self {
        Self {
            interval: GcInterval::Requests(count),
            ..Default::default()
        }
    }

    /// Create config with time-based GC.
    pub fn on_duration(interval: Duration) -> Self {
        Self {
            interval: GcInterval::Duration(interval),
            ..Default::default()
        }
    }

    /// Create config with manual GC only.
    pub fn manual() -> Self {
        Self {
            interval: GcInterval::Manual,
            ..Default::default()
        }
    }

    /// Force a sweep when a new key would push the store past `max`.
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = Some(max);
        self
    }
}

/// Point-in-time store statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreStats {
    /// Number of keys currently held, stale ones included.
    pub entries: usize,
    /// Approximate memory held by the entries, in bytes.
    pub approx_memory_bytes: usize,
}

/// In-process fixed-window counters.
///
/// # Example
///
/// ```ignore
/// use admission_ratelimit::storage::{FallbackStore, GcConfig};
/// use std::time::Duration;
///
/// let store = FallbackStore::with_gc(GcConfig::on_requests(1000));
/// let entry = store.hit("ip:10.0.0.1", Duration::from_secs(60));
/// assert_eq!(entry.count, 1);
/// ```
pub struct FallbackStore {
    data: Arc<DashMap<String, CounterEntry>>,
    gc_config: GcConfig,
    request_count: AtomicU64,
    gc_lock: Mutex<()>,
    shutdown: Arc<Notify>,
}

impl std::fmt::Debug for FallbackStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FallbackStore")
            .field("entries", &self.data.len())
            .field("gc_config", &self.gc_config)
            .finish()
    }
}

impl Default for FallbackStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FallbackStore {
    /// Create a new store with default GC configuration.
    pub fn new() -> Self {
        Self::with_gc(GcConfig::default())
    }

    /// Create a new store with custom GC configuration.
    pub fn with_gc(gc_config: GcConfig) -> Self {
        let store = Self {
            data: Arc::new(DashMap::new()),
            gc_config: gc_config.clone(),
            request_count: AtomicU64::new(0),
            gc_lock: Mutex::new(()),
            shutdown: Arc::new(Notify::new()),
        };

        if let GcInterval::Duration(interval) = gc_config.interval {
            store.start_gc_task(interval);
        }

        store
    }

    /// Start the background sweep.
    fn start_gc_task(&self, interval: Duration) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            warn!("No tokio runtime available, timed fallback store sweep disabled");
            return;
        };

        let data = Arc::downgrade(&self.data);
        let shutdown = self.shutdown.clone();

        handle.spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {
                        let Some(data) = data.upgrade() else { break };
                        sweep_expired(&data);
                    }
                    _ = shutdown.notified() => {
                        break;
                    }
                }
            }
        });
    }

    /// Record a hit for `key` and return the counter after the hit.
    ///
    /// A missing or stale entry is replaced by a fresh window with count 1.
    pub fn hit(&self, key: &str, window: Duration) -> CounterEntry {
        self.maybe_run_gc();

        let now = current_timestamp_ms();
        let window_ms = duration_ms(window).max(1);

        match self.data.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.hit(now, window_ms);
                entry.clone()
            }
            Entry::Vacant(vacant) => {
                let entry = CounterEntry::open(key, now, window_ms);
                vacant.insert(entry.clone());
                self.enforce_capacity();
                entry
            }
        }
    }

    /// Get the live entry for `key`, if any.
    pub fn get(&self, key: &str) -> Option<CounterEntry> {
        let now = current_timestamp_ms();
        self.data
            .get(key)
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.clone())
    }

    /// Manually trigger a sweep. Returns the number of evicted entries.
    pub fn run_gc(&self) -> usize {
        sweep_expired(&self.data)
    }

    /// Entry count and approximate memory usage.
    pub fn stats(&self) -> StoreStats {
        let approx_memory_bytes = self.data.iter().map(|e| e.value().approx_size()).sum();
        StoreStats {
            entries: self.data.len(),
            approx_memory_bytes,
        }
    }

    /// Get the number of entries currently stored.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.data.clear();
    }

    /// Check if GC should run and run it if needed.
    fn maybe_run_gc(&self) {
        if let GcInterval::Requests(threshold) = self.gc_config.interval {
            let count = self.request_count.fetch_add(1, Ordering::Relaxed);
            if threshold > 0 && count % threshold == 0 && count > 0 {
                // Only one sweeper at a time; others keep going.
                if let Some(_guard) = self.gc_lock.try_lock() {
                    sweep_expired(&self.data);
                }
            }
        }
    }

    /// Sweep when a new key pushed the store past `max_entries`.
    ///
    /// Must not be called while holding a shard lock.
    fn enforce_capacity(&self) -> Option<usize> {
        let max = self.gc_config.max_entries?;
        if self.data.len() <= max {
            return None;
        }
        let _guard = self.gc_lock.try_lock()?;
        let evicted = sweep_expired(&self.data);
        if self.data.len() > max {
            warn!(
                entries = self.data.len(),
                max_entries = max,
                "Fallback store above capacity with only live windows"
            );
        }
        Some(evicted)
    }
}

impl Drop for FallbackStore {
    fn drop(&mut self) {
        self.shutdown.notify_waiters();
    }
}

/// Remove every entry whose window has elapsed.
fn sweep_expired(data: &DashMap<String, CounterEntry>) -> usize {
    let now = current_timestamp_ms();
    let before = data.len();
    data.retain(|_, entry| !entry.is_expired(now));
    let evicted = before.saturating_sub(data.len());
    if evicted > 0 {
        debug!(evicted, "Swept stale fallback counters");
    }
    evicted
}
