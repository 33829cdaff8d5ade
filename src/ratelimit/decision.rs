//! Admission decisions and completed-work outcomes.

use super::headers::{DenyBody, RateLimitHeaders};

/// Identifies the window a hit was counted in, so it can be rolled back.
///
/// A token only rolls back against the window it was issued for; once that
/// window has been replaced the token is inert.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HitToken {
    key: String,
    window_end_ms: u64,
}

impl HitToken {
    pub(crate) fn new(key: &str, window_end_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            window_end_ms,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn window_end_ms(&self) -> u64 {
        self.window_end_ms
    }
}

/// An admitted request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    /// Present when a hit was counted; absent for bypassed or fail-open admits
    pub token: Option<HitToken>,
    /// Hits left in the current window, absent when no hit was counted
    pub remaining: Option<u64>,
    /// Informational quota headers, absent when no hit was counted
    pub headers: Option<RateLimitHeaders>,
}

impl Admission {
    /// An admission that touched no limiter state.
    pub fn uncounted() -> Self {
        Self {
            token: None,
            remaining: None,
            headers: None,
        }
    }
}

/// A rate limited request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Denial {
    pub key: String,
    /// Seconds until the window resets, rounded up
    pub retry_after_secs: u64,
    pub headers: RateLimitHeaders,
    pub body: DenyBody,
}

/// The limiter's verdict on a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Admit(Admission),
    Deny(Denial),
}

impl Decision {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Decision::Admit(_))
    }

    /// Header pairs to attach to the response, whichever way it went.
    pub fn header_pairs(&self) -> Vec<(&'static str, String)> {
        match self {
            Decision::Admit(admission) => admission
                .headers
                .as_ref()
                .map(RateLimitHeaders::to_pairs)
                .unwrap_or_default(),
            Decision::Deny(denial) => denial.headers.to_pairs(),
        }
    }

    /// The rollback token for a counted admission.
    pub fn token(&self) -> Option<&HitToken> {
        match self {
            Decision::Admit(admission) => admission.token.as_ref(),
            Decision::Deny(_) => None,
        }
    }
}

/// How an admitted unit of work turned out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    /// HTTP-style status code of the response
    pub status: u16,
}

impl Outcome {
    pub fn from_status(status: u16) -> Self {
        Self { status }
    }

    /// Statuses below 400 count as success.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}
