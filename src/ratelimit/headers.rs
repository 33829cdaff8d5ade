//! Quota headers and the rejection body sent to throttled clients.

use serde::Serialize;

/// HTTP status for a rate limited request.
pub const TOO_MANY_REQUESTS: u16 = 429;

/// Error code carried in every rejection body.
pub const RATE_LIMIT_EXCEEDED: &str = "RATE_LIMIT_EXCEEDED";

/// Quota information for one decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Maximum hits per window
    pub limit: u64,
    /// Hits left in the current window
    pub remaining: u64,
    /// Seconds until the window resets, rounded up
    pub reset_after_secs: u64,
    /// Window end in seconds since the Unix epoch, rounded up
    pub reset_at_secs: u64,
    /// Seconds the client should wait, set only on denial
    pub retry_after_secs: Option<u64>,
    /// Emit `RateLimit-*`
    pub standard: bool,
    /// Emit `X-RateLimit-*`
    pub legacy: bool,
}

impl RateLimitHeaders {
    /// Render as `(name, value)` pairs in a stable order.
    ///
    /// The standard `RateLimit-Reset` is a delta in seconds; the legacy
    /// `X-RateLimit-Reset` is an absolute epoch second. `Retry-After` is
    /// always present on a denial.
    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(7);

        if self.standard {
            pairs.push(("RateLimit-Limit", self.limit.to_string()));
            pairs.push(("RateLimit-Remaining", self.remaining.to_string()));
            pairs.push(("RateLimit-Reset", self.reset_after_secs.to_string()));
        }

        if self.legacy {
            pairs.push(("X-RateLimit-Limit", self.limit.to_string()));
            pairs.push(("X-RateLimit-Remaining", self.remaining.to_string()));
            pairs.push(("X-RateLimit-Reset", self.reset_at_secs.to_string()));
        }

        if let Some(retry_after) = self.retry_after_secs {
            pairs.push(("Retry-After", retry_after.to_string()));
        }

        pairs
    }
}

/// JSON body returned with a 429.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenyBody {
    pub success: bool,
    pub error: String,
    pub message: String,
    /// Seconds until the client may retry
    pub retry_after: u64,
}

impl DenyBody {
    pub fn new(message: impl Into<String>, retry_after: u64) -> Self {
        Self {
            success: false,
            error: RATE_LIMIT_EXCEEDED.to_string(),
            message: message.into(),
            retry_after,
        }
    }

    /// Serialize to the wire JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
