//! Limiter decision counters.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Process-lifetime counts of limiter decisions.
#[derive(Debug, Default)]
pub struct LimiterStats {
    admitted: AtomicU64,
    denied: AtomicU64,
    bypassed: AtomicU64,
    failed_open: AtomicU64,
    rolled_back: AtomicU64,
}

/// A point-in-time view of [`LimiterStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LimiterStatsSnapshot {
    pub admitted: u64,
    pub denied: u64,
    pub bypassed: u64,
    pub failed_open: u64,
    pub rolled_back: u64,
    /// Keys currently tracked
    pub active_keys: usize,
}

impl LimiterStats {
    pub(crate) fn record_admitted(&self) {
        self.admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_denied(&self) {
        self.denied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_bypassed(&self) {
        self.bypassed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed_open(&self) {
        self.failed_open.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rolled_back(&self) {
        self.rolled_back.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, active_keys: usize) -> LimiterStatsSnapshot {
        LimiterStatsSnapshot {
            admitted: self.admitted.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            bypassed: self.bypassed.load(Ordering::Relaxed),
            failed_open: self.failed_open.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            active_keys,
        }
    }
}
