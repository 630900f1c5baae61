//! Gateway-issued ID generation

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Issues IDs that are globally unique within the process
///
/// Shape: `<prefix>-<nanoseconds-since-epoch>-<counter>`. The timestamp
/// alone is not unique on fast paths, so a strictly incrementing counter
/// is appended. The counter starts at zero and increments on every call.
#[derive(Debug, Default)]
pub struct IdGenerator {
    seq: AtomicU64,
}

impl IdGenerator {
    /// Create a generator with the counter at zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Issue the next ID with the given prefix
    pub fn next(&self, prefix: &str) -> String {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();
        let seq = self.seq.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{prefix}-{nanos}-{seq}")
    }
}
