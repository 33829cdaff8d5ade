//! Per-key window state.

use chrono::{DateTime, TimeZone, Utc};
use std::time::Duration;

/// The end of the window containing `now_ms`.
///
/// Windows are aligned to multiples of `window_ms` from the Unix epoch, so
/// every key with the same window size resets on the same boundary no matter
/// when its first request arrived. The returned instant is always strictly
/// after `now_ms`.
pub fn aligned_window_end(now_ms: u64, window_ms: u64) -> u64 {
    (now_ms / window_ms).saturating_add(1).saturating_mul(window_ms)
}

/// Request counters for one key within one aligned window.
///
/// `hit_count` never exceeds `total_requests`: both grow together and only
/// `hit_count` is decremented by a rollback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindowEntry {
    /// The derived identity this entry throttles
    pub key: String,
    /// Hits counted toward the limit in this window
    pub hit_count: u64,
    /// Every request seen in this window, rollbacks included
    pub total_requests: u64,
    /// When this window's counters reset, in milliseconds since the Unix epoch
    pub window_end_ms: u64,
    /// Last request time, in milliseconds since the Unix epoch
    pub last_seen_ms: u64,
}

impl RateWindowEntry {
    /// Create an empty entry for the window ending at `window_end_ms`.
    pub fn new(key: &str, window_end_ms: u64, now_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            hit_count: 0,
            total_requests: 0,
            window_end_ms,
            last_seen_ms: now_ms,
        }
    }

    /// Count one request.
    pub fn record_hit(&mut self, now_ms: u64) {
        self.hit_count = self.hit_count.saturating_add(1);
        self.total_requests = self.total_requests.saturating_add(1);
        self.last_seen_ms = now_ms;
    }

    /// Un-count one hit. Returns `false` if there was nothing to un-count.
    pub fn rollback(&mut self) -> bool {
        if self.hit_count == 0 {
            return false;
        }
        self.hit_count -= 1;
        true
    }

    /// Whether the window is over and the next request must start a new one.
    pub fn is_elapsed(&self, now_ms: u64) -> bool {
        self.window_end_ms <= now_ms
    }

    /// Whether a sweep may drop this entry.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        self.window_end_ms < now_ms
    }

    /// Quota left under `max_hits`.
    pub fn remaining(&self, max_hits: u64) -> u64 {
        max_hits.saturating_sub(self.hit_count)
    }

    /// Time until the window resets.
    pub fn duration_until_reset(&self, now_ms: u64) -> Duration {
        Duration::from_millis(self.window_end_ms.saturating_sub(now_ms))
    }

    /// Last request time as a UTC timestamp.
    pub fn last_seen(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.last_seen_ms as i64)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alignment_is_independent_of_creation_time() {
        let window = 60_000;
        assert_eq!(aligned_window_end(120_001, window), 180_000);
        assert_eq!(aligned_window_end(179_999, window), 180_000);
        assert_eq!(aligned_window_end(150_000, window), 180_000);
    }

    #[test]
    fn test_alignment_on_boundary_starts_next_window() {
        assert_eq!(aligned_window_end(180_000, 60_000), 240_000);
        assert_eq!(aligned_window_end(0, 1_000), 1_000);
    }

    #[test]
    fn test_record_hit_and_rollback() {
        let mut entry = RateWindowEntry::new("ip_1.2.3.4", 60_000, 10);

        entry.record_hit(20);
        entry.record_hit(30);
        assert_eq!(entry.hit_count, 2);
        assert_eq!(entry.total_requests, 2);
        assert_eq!(entry.last_seen_ms, 30);

        assert!(entry.rollback());
        assert_eq!(entry.hit_count, 1);
        assert_eq!(entry.total_requests, 2);
    }

    #[test]
    fn test_rollback_never_underflows() {
        let mut entry = RateWindowEntry::new("k", 1_000, 0);
        entry.record_hit(1);

        assert!(entry.rollback());
        assert!(!entry.rollback());
        assert!(!entry.rollback());
        assert_eq!(entry.hit_count, 0);
        assert!(entry.hit_count <= entry.total_requests);
    }

    #[test]
    fn test_elapsed_versus_expired() {
        let entry = RateWindowEntry::new("k", 1_000, 0);

        assert!(!entry.is_elapsed(999));
        assert!(entry.is_elapsed(1_000));
        assert!(!entry.is_expired(1_000));
        assert!(entry.is_expired(1_001));
    }

    #[test]
    fn test_remaining_and_reset() {
        let mut entry = RateWindowEntry::new("k", 60_000, 0);
        for _ in 0..7 {
            entry.record_hit(0);
        }

        assert_eq!(entry.remaining(5), 0);
        assert_eq!(entry.remaining(10), 3);
        assert_eq!(entry.duration_until_reset(59_000), Duration::from_secs(1));
        assert_eq!(entry.duration_until_reset(61_000), Duration::ZERO);
    }

    #[test]
    fn test_last_seen_timestamp() {
        let entry = RateWindowEntry::new("k", 0, 1_704_067_200_000);
        assert_eq!(entry.last_seen().to_rfc3339(), "2024-01-01T00:00:00+00:00");
    }
}
