//! Request interception around a rate limiter.
//!
//! The interceptor sits in front of business logic: it asks the limiter for a
//! decision, turns a denial into a 429 rejection, and after the work completes
//! reports the outcome back so the limiter can un-count it if configured to.
//! It is deliberately independent of any HTTP framework.

use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::ratelimit::{
    Decision, DenyBody, HitToken, Outcome, RateLimiterBackend, RequestContext, TOO_MANY_REQUESTS,
};

/// A response-like value whose outcome the limiter can judge.
pub trait Completed {
    fn outcome(&self) -> Outcome;
}

impl Completed for Outcome {
    fn outcome(&self) -> Outcome {
        *self
    }
}

impl<T, E> Completed for std::result::Result<T, E> {
    fn outcome(&self) -> Outcome {
        match self {
            Ok(_) => Outcome::from_status(200),
            Err(_) => Outcome::from_status(500),
        }
    }
}

/// A request the limiter turned away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Always 429
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: DenyBody,
}

impl Rejection {
    /// The JSON response body.
    pub fn body_json(&self) -> serde_json::Result<String> {
        self.body.to_json()
    }
}

/// Result of [`Interceptor::before`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Interception {
    /// Run the work; attach `headers` to its response and pass `token` to
    /// [`Interceptor::after`].
    Proceed {
        token: Option<HitToken>,
        headers: Vec<(&'static str, String)>,
    },
    Reject(Rejection),
}

/// The response of work that was allowed to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proceeded<R> {
    pub response: R,
    /// Quota headers to attach to the response
    pub headers: Vec<(&'static str, String)>,
}

/// Applies a rate limiter to units of work.
pub struct Interceptor<B: RateLimiterBackend> {
    limiter: Arc<B>,
}

impl<B: RateLimiterBackend> Clone for Interceptor<B> {
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
        }
    }
}

impl<B: RateLimiterBackend> Interceptor<B> {
    pub fn new(limiter: Arc<B>) -> Self {
        Self { limiter }
    }

    pub fn limiter(&self) -> &Arc<B> {
        &self.limiter
    }

    /// Ask the limiter whether the request may proceed.
    #[instrument(skip(self, ctx), fields(path = %ctx.path))]
    pub async fn before(&self, ctx: &RequestContext) -> Interception {
        let decision = self.limiter.admit(ctx).await;
        let headers = decision.header_pairs();

        match decision {
            Decision::Admit(admission) => Interception::Proceed {
                token: admission.token,
                headers,
            },
            Decision::Deny(denial) => {
                info!(
                    key = %denial.key,
                    retry_after_secs = denial.retry_after_secs,
                    "Rejecting rate limited request"
                );
                Interception::Reject(Rejection {
                    status: TOO_MANY_REQUESTS,
                    headers,
                    body: denial.body,
                })
            }
        }
    }

    /// Report how admitted work turned out. Returns whether its hit was
    /// rolled back.
    pub async fn after(&self, token: Option<&HitToken>, outcome: Outcome) -> bool {
        match token {
            Some(token) => {
                let rolled_back = self.limiter.rollback_if_needed(token, outcome).await;
                if rolled_back {
                    debug!(key = %token.key(), status = outcome.status, "Outcome not counted");
                }
                rolled_back
            }
            None => false,
        }
    }

    /// Run `work` under the limiter: reject it, or run it and report its
    /// outcome.
    pub async fn run<F, Fut, R>(
        &self,
        ctx: &RequestContext,
        work: F,
    ) -> std::result::Result<Proceeded<R>, Rejection>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = R>,
        R: Completed,
    {
        let (token, headers) = match self.before(ctx).await {
            Interception::Proceed { token, headers } => (token, headers),
            Interception::Reject(rejection) => return Err(rejection),
        };

        let response = work().await;
        self.after(token.as_ref(), response.outcome()).await;

        Ok(Proceeded { response, headers })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::TtlCache;
    use crate::clock::ManualClock;
    use crate::ratelimit::{LimiterOptions, WindowLimiter};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const START: u64 = 1_704_067_200_000;

    fn interceptor(options: LimiterOptions) -> Interceptor<WindowLimiter> {
        let clock = Arc::new(ManualClock::new(START));
        Interceptor::new(Arc::new(WindowLimiter::with_clock(options, clock).unwrap()))
    }

    fn request() -> RequestContext {
        RequestContext::new("/attendance").with_remote_addr("1.2.3.4".parse().unwrap())
    }

    #[tokio::test]
    async fn test_rejection_shape() {
        let interceptor = interceptor(LimiterOptions::new(Duration::from_secs(60), 1));

        assert!(matches!(
            interceptor.before(&request()).await,
            Interception::Proceed { .. }
        ));

        let rejection = match interceptor.before(&request()).await {
            Interception::Reject(rejection) => rejection,
            other => panic!("expected rejection, got {:?}", other),
        };

        assert_eq!(rejection.status, 429);
        assert!(rejection.headers.contains(&("RateLimit-Remaining", "0".to_string())));
        assert!(rejection.headers.contains(&("Retry-After", "60".to_string())));

        let body: serde_json::Value = serde_json::from_str(&rejection.body_json().unwrap()).unwrap();
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["retryAfter"], 60);
        assert_eq!(body["message"], "Too many requests, please try again later.");
    }

    #[tokio::test]
    async fn test_admitted_work_gets_quota_headers() {
        let interceptor = interceptor(LimiterOptions::new(Duration::from_secs(60), 10));

        let proceeded = interceptor
            .run(&request(), || async { Outcome::from_status(200) })
            .await
            .unwrap();

        assert_eq!(proceeded.response.status, 200);
        assert!(proceeded.headers.contains(&("RateLimit-Limit", "10".to_string())));
        assert!(proceeded.headers.contains(&("RateLimit-Remaining", "9".to_string())));
    }

    #[tokio::test]
    async fn test_failed_work_not_counted_when_counting_successes_only() {
        let mut options = LimiterOptions::new(Duration::from_secs(60), 2);
        options.count_success_only = true;
        let interceptor = interceptor(options);

        for _ in 0..5 {
            let result = interceptor
                .run(&request(), || async { Err::<(), _>("validation failed") })
                .await;
            assert!(result.is_ok());
        }

        let entry = interceptor.limiter().snapshot("ip_1.2.3.4").unwrap();
        assert_eq!(entry.hit_count, 0);
        assert_eq!(entry.total_requests, 5);

        for _ in 0..2 {
            assert!(interceptor.run(&request(), || async { Ok::<_, ()>(()) }).await.is_ok());
        }
        assert!(interceptor.run(&request(), || async { Ok::<_, ()>(()) }).await.is_err());
    }

    #[tokio::test]
    async fn test_rejected_work_never_runs() {
        let interceptor = interceptor(LimiterOptions::new(Duration::from_secs(60), 1));
        interceptor.run(&request(), || async { Outcome::from_status(200) }).await.unwrap();

        let mut ran = false;
        let result = interceptor
            .run(&request(), || {
                ran = true;
                async { Outcome::from_status(200) }
            })
            .await;

        assert!(result.is_err());
        assert!(!ran);
    }

    #[tokio::test]
    async fn test_health_bypass_through_interceptor() {
        let interceptor = interceptor(LimiterOptions::new(Duration::from_secs(60), 1));
        let health = RequestContext::new("/health");

        for _ in 0..3 {
            match interceptor.before(&health).await {
                Interception::Proceed { token, headers } => {
                    assert!(token.is_none());
                    assert!(headers.is_empty());
                }
                Interception::Reject(_) => panic!("health checks are never limited"),
            }
        }
        assert!(!interceptor.after(None, Outcome::from_status(500)).await);
    }

    #[tokio::test]
    async fn test_work_can_memoize_through_cache() {
        let interceptor = interceptor(LimiterOptions::new(Duration::from_secs(60), 10));
        let cache: TtlCache<Vec<String>> = TtlCache::new(Duration::from_secs(30)).unwrap();
        let lookups = AtomicUsize::new(0);
        let (cache_ref, lookups_ref) = (&cache, &lookups);

        for _ in 0..3 {
            let proceeded = interceptor
                .run(&request(), || async move {
                    cache_ref
                        .get_or_set("event:9:attendees", Duration::from_secs(30), || async move {
                            lookups_ref.fetch_add(1, Ordering::SeqCst);
                            Ok::<_, String>(vec!["ada".to_string(), "grace".to_string()])
                        })
                        .await
                })
                .await
                .unwrap();
            assert_eq!(proceeded.response.unwrap().len(), 2);
        }

        assert_eq!(lookups.load(Ordering::SeqCst), 1);
        assert_eq!(cache.stats().hits, 2);
    }
}
