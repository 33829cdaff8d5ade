//! Core rate limiter implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::clock::{duration_ms, Clock, SystemClock};
use crate::config::RateLimitingConfig;
use crate::error::{Result, TallyError};
use crate::sweep::Sweep;

use super::backend::RateLimiterBackend;
use super::decision::{Admission, Decision, Denial, HitToken, Outcome};
use super::headers::{DenyBody, RateLimitHeaders};
use super::key::{default_key, BypassFn, KeyFn, RequestContext};
use super::stats::{LimiterStats, LimiterStatsSnapshot};
use super::window::{aligned_window_end, RateWindowEntry};

/// Configuration for a [`WindowLimiter`].
#[derive(Clone)]
pub struct LimiterOptions {
    /// Size of the fixed window
    pub window: Duration,
    /// Hits admitted per key per window
    pub max_hits: u64,
    /// Roll back hits whose outcome was a failure
    pub count_success_only: bool,
    /// Roll back hits whose outcome was a success
    pub count_failure_only: bool,
    /// Message carried in the denial body
    pub deny_message: String,
    /// Emit `RateLimit-*` headers
    pub standard_headers: bool,
    /// Emit `X-RateLimit-*` headers
    pub legacy_headers: bool,
    key_fn: KeyFn,
    bypass: BypassFn,
}

impl Default for LimiterOptions {
    fn default() -> Self {
        Self::from_config(&RateLimitingConfig::default())
    }
}

impl LimiterOptions {
    /// Options allowing `max_hits` per `window`, with the remaining defaults.
    pub fn new(window: Duration, max_hits: u64) -> Self {
        Self {
            window,
            max_hits,
            ..Self::default()
        }
    }

    /// Build options from the `rate_limiting` configuration section.
    ///
    /// Requests whose path exactly matches an entry of `bypass_paths` are
    /// exempt.
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        let bypass_paths = config.bypass_paths.clone();
        Self {
            window: Duration::from_millis(config.window_ms),
            max_hits: config.max_hits,
            count_success_only: config.count_success_only,
            count_failure_only: config.count_failure_only,
            deny_message: config.deny_message.clone(),
            standard_headers: config.standard_headers,
            legacy_headers: config.legacy_headers,
            key_fn: Arc::new(default_key),
            bypass: Arc::new(move |ctx: &RequestContext| {
                bypass_paths.iter().any(|path| *path == ctx.path)
            }),
        }
    }

    /// Replace the key derivation.
    pub fn with_key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&RequestContext) -> Result<String> + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Replace the exemption predicate.
    pub fn with_bypass<F>(mut self, bypass: F) -> Self
    where
        F: Fn(&RequestContext) -> bool + Send + Sync + 'static,
    {
        self.bypass = Arc::new(bypass);
        self
    }

    /// Check the options for values the limiter cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.window_ms() == 0 {
            return Err(TallyError::Config(
                "rate limit window must be at least 1ms".to_string(),
            ));
        }
        if self.max_hits == 0 {
            return Err(TallyError::Config(
                "rate limit max_hits must be greater than zero".to_string(),
            ));
        }
        if self.count_success_only && self.count_failure_only {
            return Err(TallyError::Config(
                "count_success_only and count_failure_only are mutually exclusive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a request with `outcome` should be un-counted.
    pub fn should_rollback(&self, outcome: Outcome) -> bool {
        if outcome.is_success() {
            self.count_failure_only
        } else {
            self.count_success_only
        }
    }

    fn window_ms(&self) -> u64 {
        duration_ms(self.window)
    }
}

impl std::fmt::Debug for LimiterOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LimiterOptions")
            .field("window", &self.window)
            .field("max_hits", &self.max_hits)
            .field("count_success_only", &self.count_success_only)
            .field("count_failure_only", &self.count_failure_only)
            .field("deny_message", &self.deny_message)
            .field("standard_headers", &self.standard_headers)
            .field("legacy_headers", &self.legacy_headers)
            .finish_non_exhaustive()
    }
}

/// An in-process fixed-window rate limiter.
///
/// Windows are aligned to the epoch, so all keys reset together. Each key's
/// increment-and-compare runs under that key's map shard lock.
///
/// This struct is thread-safe and can be shared across multiple tasks.
pub struct WindowLimiter {
    /// Window state indexed by derived key
    entries: DashMap<String, RateWindowEntry>,
    options: LimiterOptions,
    stats: LimiterStats,
    clock: Arc<dyn Clock>,
}

impl WindowLimiter {
    /// Create a limiter on the system clock.
    pub fn new(options: LimiterOptions) -> Result<Self> {
        Self::with_clock(options, Arc::new(SystemClock))
    }

    /// Create a limiter reading time from `clock`.
    pub fn with_clock(options: LimiterOptions, clock: Arc<dyn Clock>) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            entries: DashMap::new(),
            options,
            stats: LimiterStats::default(),
            clock,
        })
    }

    pub fn options(&self) -> &LimiterOptions {
        &self.options
    }

    /// Decide whether the request described by `ctx` may proceed.
    ///
    /// Exempt requests are admitted without touching any state. If the key
    /// cannot be derived the request is admitted as well: a limiter fault
    /// never turns into a rejection.
    pub fn admit(&self, ctx: &RequestContext) -> Decision {
        if (self.options.bypass)(ctx) {
            self.stats.record_bypassed();
            trace!(path = %ctx.path, "Request exempt from rate limiting");
            return Decision::Admit(Admission::uncounted());
        }

        let key = match (self.options.key_fn)(ctx) {
            Ok(key) => key,
            Err(e) => {
                self.stats.record_failed_open();
                warn!(
                    path = %ctx.path,
                    error = %e,
                    "Failed to derive rate limit key, admitting request"
                );
                return Decision::Admit(Admission::uncounted());
            }
        };

        self.hit(&key)
    }

    /// Count one hit against `key` and decide.
    pub fn hit(&self, key: &str) -> Decision {
        let now = self.clock.now_ms();
        let window_end = aligned_window_end(now, self.options.window_ms());

        let (hit_count, window_end, remaining, until_reset) = {
            let mut entry = self
                .entries
                .entry(key.to_string())
                .or_insert_with(|| {
                    debug!(key = %key, window_end_ms = window_end, "Creating new rate window");
                    RateWindowEntry::new(key, window_end, now)
                });

            if entry.is_elapsed(now) {
                debug!(
                    key = %key,
                    previous_hits = entry.hit_count,
                    window_end_ms = window_end,
                    "Rate window elapsed, starting a new one"
                );
                *entry = RateWindowEntry::new(key, window_end, now);
            }

            entry.record_hit(now);
            (
                entry.hit_count,
                entry.window_end_ms,
                entry.remaining(self.options.max_hits),
                entry.duration_until_reset(now),
            )
        };

        trace!(key = %key, hits = hit_count, limit = self.options.max_hits, "Checking rate limit");

        let retry_after_secs = duration_ms(until_reset).div_ceil(1000);
        let exceeded = hit_count > self.options.max_hits;

        let headers = RateLimitHeaders {
            limit: self.options.max_hits,
            remaining,
            reset_after_secs: retry_after_secs,
            reset_at_secs: window_end.div_ceil(1000),
            retry_after_secs: exceeded.then_some(retry_after_secs),
            standard: self.options.standard_headers,
            legacy: self.options.legacy_headers,
        };

        if exceeded {
            self.stats.record_denied();
            debug!(
                key = %key,
                hits = hit_count,
                limit = self.options.max_hits,
                retry_after_secs = retry_after_secs,
                "Rate limit exceeded"
            );
            return Decision::Deny(Denial {
                key: key.to_string(),
                retry_after_secs,
                headers,
                body: DenyBody::new(self.options.deny_message.clone(), retry_after_secs),
            });
        }

        self.stats.record_admitted();
        Decision::Admit(Admission {
            token: Some(HitToken::new(key, window_end)),
            remaining: Some(remaining),
            headers: Some(headers),
        })
    }

    /// Un-count the hit identified by `token`.
    ///
    /// Does nothing if the token's window has since elapsed or been replaced,
    /// or if no hits remain to un-count. Never touches `total_requests`.
    pub fn rollback(&self, token: &HitToken) -> bool {
        let now = self.clock.now_ms();

        let rolled_back = match self.entries.get_mut(token.key()) {
            Some(mut entry)
                if entry.window_end_ms == token.window_end_ms() && !entry.is_elapsed(now) =>
            {
                entry.rollback()
            }
            _ => false,
        };

        if rolled_back {
            self.stats.record_rolled_back();
            debug!(key = %token.key(), "Rolled back rate limit hit");
        } else {
            trace!(key = %token.key(), "Rollback skipped, window no longer current");
        }
        rolled_back
    }

    /// Roll back `token` when `outcome` should not count under the options.
    pub fn rollback_if_needed(&self, token: &HitToken, outcome: Outcome) -> bool {
        self.options.should_rollback(outcome) && self.rollback(token)
    }

    /// Drop every entry whose window has passed, returning how many went.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now_ms();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        let removed = before.saturating_sub(self.entries.len());

        if removed > 0 {
            debug!(removed = removed, remaining = self.entries.len(), "Swept expired rate windows");
        }
        removed
    }

    /// A copy of the current entry for `key`.
    pub fn snapshot(&self, key: &str) -> Option<RateWindowEntry> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Decision counters plus the number of tracked keys.
    pub fn stats(&self) -> LimiterStatsSnapshot {
        self.stats.snapshot(self.entries.len())
    }

    /// Clear all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Sweep for WindowLimiter {
    fn sweep(&self) -> usize {
        WindowLimiter::sweep(self)
    }
}

#[async_trait]
impl RateLimiterBackend for WindowLimiter {
    async fn admit(&self, ctx: &RequestContext) -> Decision {
        WindowLimiter::admit(self, ctx)
    }

    async fn rollback_if_needed(&self, token: &HitToken, outcome: Outcome) -> bool {
        WindowLimiter::rollback_if_needed(self, token, outcome)
    }
}
