//! Fixed-window rate limiting and its admission decisions.

mod backend;
mod decision;
mod headers;
mod key;
mod limiter;
mod stats;
mod window;

pub use backend::RateLimiterBackend;
pub use decision::{Admission, Decision, Denial, HitToken, Outcome};
pub use headers::{DenyBody, RateLimitHeaders, RATE_LIMIT_EXCEEDED, TOO_MANY_REQUESTS};
pub use key::{default_key, BypassFn, KeyFn, RequestContext};
pub use limiter::{LimiterOptions, WindowLimiter};
pub use stats::{LimiterStats, LimiterStatsSnapshot};
pub use window::{aligned_window_end, RateWindowEntry};
