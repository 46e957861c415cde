//! In-process counter storage.
//!
//! The fallback store keeps one fixed-window counter per partition key. It
//! answers whenever the distributed backend is disabled for a config or
//! cannot be reached.

mod entry;
mod memory_gc;

pub use entry::CounterEntry;
pub use memory_gc::{FallbackStore, GcConfig, GcInterval, StoreStats};

/// Get the current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_ms)
        .unwrap_or(0)
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: std::time::Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
