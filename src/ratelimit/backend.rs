//! Rate limiter trait for abstracting over limiter implementations.

use async_trait::async_trait;

use super::decision::{Decision, HitToken, Outcome};
use super::key::RequestContext;

/// Trait for rate limiter implementations.
///
/// The interceptor is written against this trait so it can be driven by the
/// in-process [`WindowLimiter`](super::WindowLimiter) or by a backend that
/// keeps its state elsewhere.
#[async_trait]
pub trait RateLimiterBackend: Send + Sync {
    /// Decide whether a request may proceed, counting it if so.
    async fn admit(&self, ctx: &RequestContext) -> Decision;

    /// Un-count an admitted request if its outcome should not count.
    ///
    /// Returns whether a hit was rolled back.
    async fn rollback_if_needed(&self, token: &HitToken, outcome: Outcome) -> bool;
}
