//! The TTL cache store.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use super::entry::CacheEntry;
use super::stats::{CacheStats, StatsSnapshot};
use crate::clock::{duration_ms, Clock, SystemClock};
use crate::config::CacheConfig;
use crate::error::{Result, TallyError};
use crate::sweep::Sweep;

/// A process-local key/value cache with a fixed TTL per entry.
///
/// Expired entries are never returned: reads remove them lazily, and
/// [`cleanup`](Self::cleanup) removes the ones nobody reads again. Reads do
/// not extend an entry's lifetime.
///
/// This struct is thread-safe and can be shared across tasks behind an `Arc`.
pub struct TtlCache<V> {
    /// Cached entries indexed by caller-defined key
    entries: RwLock<HashMap<String, CacheEntry<V>>>,
    /// Cumulative counters
    stats: CacheStats,
    /// TTL applied by [`set_default`](Self::set_default)
    default_ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl<V: Clone + Send + Sync> TtlCache<V> {
    /// Create a cache on the system clock.
    pub fn new(default_ttl: Duration) -> Result<Self> {
        Self::with_clock(default_ttl, Arc::new(SystemClock))
    }

    /// Create a cache reading time from `clock`.
    pub fn with_clock(default_ttl: Duration, clock: Arc<dyn Clock>) -> Result<Self> {
        if default_ttl.is_zero() {
            return Err(TallyError::Config(
                "cache default TTL must be greater than zero".to_string(),
            ));
        }

        Ok(Self {
            entries: RwLock::new(HashMap::new()),
            stats: CacheStats::new(),
            default_ttl,
            clock,
        })
    }

    /// Create a cache from the `cache` configuration section.
    pub fn from_config(config: &CacheConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        Self::with_clock(Duration::from_millis(config.default_ttl_ms), clock)
    }

    /// The TTL used by [`set_default`](Self::set_default).
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Store `value` under `key` for `ttl`, replacing any previous entry.
    pub fn set(&self, key: impl Into<String>, value: V, ttl: Duration) {
        let key = key.into();
        let now = self.clock.now_ms();

        let size = {
            let mut entries = self.entries.write();
            entries.insert(key.clone(), CacheEntry::new(value, now, ttl));
            entries.len()
        };
        self.stats.record_set();

        debug!(key = %key, ttl_ms = duration_ms(ttl), size = size, "Cache entry stored");
    }

    /// Store `value` under `key` with the default TTL.
    pub fn set_default(&self, key: impl Into<String>, value: V) {
        self.set(key, value, self.default_ttl);
    }

    /// Get a fresh value for `key`.
    ///
    /// An expired entry is removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let now = self.clock.now_ms();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => {
                    self.stats.record_miss();
                    trace!(key = %key, "Cache miss");
                    return None;
                }
                Some(entry) if !entry.is_expired(now) => {
                    self.stats.record_hit();
                    trace!(key = %key, "Cache hit");
                    return Some(entry.value.clone());
                }
                Some(_) => {}
            }
        }

        self.remove_if_expired(key, now);
        self.stats.record_miss();
        trace!(key = %key, reason = "expired", "Cache miss");
        None
    }

    /// Whether a fresh value exists for `key`.
    ///
    /// Removes the entry if it has expired. Does not affect hit/miss counters.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now_ms();

        let fresh = {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return false,
                Some(entry) => !entry.is_expired(now),
            }
        };

        if !fresh {
            self.remove_if_expired(key, now);
        }
        fresh
    }

    /// Remove `key`, returning whether an entry was present.
    pub fn delete(&self, key: &str) -> bool {
        let removed = self.entries.write().remove(key).is_some();
        if removed {
            self.stats.record_delete();
            debug!(key = %key, "Cache entry deleted");
        }
        removed
    }

    /// Remove every entry. Cumulative counters are kept.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        let removed = entries.len();
        entries.clear();
        debug!(removed = removed, "Cache cleared");
    }

    /// Remove all expired entries and return how many were removed.
    pub fn cleanup(&self) -> usize {
        let now = self.clock.now_ms();

        let (removed, remaining) = {
            let mut entries = self.entries.write();
            let before = entries.len();
            entries.retain(|_, entry| !entry.is_expired(now));
            (before - entries.len(), entries.len())
        };

        if removed > 0 {
            self.stats.record_expirations(removed as u64);
            debug!(removed = removed, remaining = remaining, "Expired cache entries swept");
        }
        removed
    }

    /// Return the cached value for `key`, or compute, store and return it.
    ///
    /// `factory` runs at most once per call. Concurrent calls for the same
    /// absent key may each run their own factory. A factory error is returned
    /// unchanged and nothing is cached.
    pub async fn get_or_set<F, Fut, E>(
        &self,
        key: &str,
        ttl: Duration,
        factory: F,
    ) -> std::result::Result<V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }

        let value = factory().await?;
        self.set(key, value.clone(), ttl);
        Ok(value)
    }

    /// Counters plus the live entry count.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot(self.len())
    }

    /// Hit percentage in the range 0-100.
    pub fn hit_rate(&self) -> f64 {
        self.stats.hit_rate()
    }

    /// A snapshot of the current keys, including expired ones not yet swept.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of physically stored entries.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Remove `key` only if it is still expired under the write lock; a
    /// concurrent `set` may have replaced it since the read.
    fn remove_if_expired(&self, key: &str, now: u64) -> bool {
        let mut entries = self.entries.write();
        let expired = entries.get(key).is_some_and(|entry| entry.is_expired(now));
        if expired {
            entries.remove(key);
            self.stats.record_expirations(1);
            debug!(key = %key, "Expired cache entry removed");
        }
        expired
    }
}

impl<V: Clone + Send + Sync> Sweep for TtlCache<V> {
    fn sweep(&self) -> usize {
        self.cleanup()
    }
}

impl<V> std::fmt::Debug for TtlCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TtlCache")
            .field("len", &self.entries.read().len())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}
