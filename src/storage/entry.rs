//! Counter entry for the fallback store.

use serde::{Deserialize, Serialize};

/// A fixed-window counter anchored at the first hit for its key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CounterEntry {
    /// Partition key this counter belongs to.
    pub key: String,

    /// Requests seen in the current window.
    pub count: u64,

    /// Window start timestamp (Unix milliseconds).
    pub window_start: u64,

    /// Window end timestamp (Unix milliseconds).
    pub expires_at: u64,
}

impl CounterEntry {
    /// Open a new window with a single hit.
    pub fn open(key: impl Into<String>, now: u64, window_ms: u64) -> Self {
        Self {
            key: key.into(),
            count: 1,
            window_start: now,
            expires_at: now.saturating_add(window_ms),
        }
    }

    /// Whether the window has elapsed at `now`.
    ///
    /// A stale entry must be replaced, never incremented.
    pub fn is_expired(&self, now: u64) -> bool {
        now >= self.expires_at
    }

    /// Record one more hit, or start over if the window has elapsed.
    pub fn hit(&mut self, now: u64, window_ms: u64) {
        if self.is_expired(now) {
            self.count = 1;
            self.window_start = now;
            self.expires_at = now.saturating_add(window_ms);
        } else {
            self.count += 1;
        }
    }

    /// Rough heap + inline footprint, used for store stats.
    pub(crate) fn approx_size(&self) -> usize {
        std::mem::size_of::<Self>() + self.key.capacity()
    }
}
