//! A single cached value and its expiry bookkeeping.

use std::time::Duration;

use crate::clock::duration_ms;

/// A cached value with the instant it was stored and its time-to-live.
///
/// An entry is logically absent once more than `ttl` has elapsed since
/// `stored_at_ms`, whether or not it has been physically removed yet.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    /// The cached payload
    pub value: V,
    /// When the entry was stored, in milliseconds since the Unix epoch
    pub stored_at_ms: u64,
    /// How long the entry stays fresh
    pub ttl: Duration,
}

impl<V> CacheEntry<V> {
    /// Create an entry stored at `now_ms`.
    pub fn new(value: V, now_ms: u64, ttl: Duration) -> Self {
        Self {
            value,
            stored_at_ms: now_ms,
            ttl,
        }
    }

    /// The last instant at which the entry is still fresh.
    pub fn expires_at_ms(&self) -> u64 {
        self.stored_at_ms.saturating_add(duration_ms(self.ttl))
    }

    /// Whether the entry has outlived its TTL at `now_ms`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms()
    }
}
