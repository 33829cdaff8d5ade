//! Request identity and key derivation.

use std::net::IpAddr;
use std::sync::Arc;

use crate::error::{Result, TallyError};

/// Derives the rate limit key for a request.
pub type KeyFn = Arc<dyn Fn(&RequestContext) -> Result<String> + Send + Sync>;

/// Identifies requests exempt from rate limiting.
pub type BypassFn = Arc<dyn Fn(&RequestContext) -> bool + Send + Sync>;

/// What the limiter needs to know about an incoming request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Authenticated principal identifier, if the request is authenticated
    pub principal: Option<String>,
    /// Network origin of the request
    pub remote_addr: Option<IpAddr>,
    /// Request path, used to decide exemptions
    pub path: String,
}

impl RequestContext {
    /// Create a context for a request to `path`.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }
}

/// The default key: `user_<id>` for authenticated requests, else `ip_<addr>`.
///
/// Fails when the request carries neither, which the limiter treats as a
/// reason to admit.
pub fn default_key(ctx: &RequestContext) -> Result<String> {
    if let Some(principal) = ctx.principal.as_deref().filter(|p| !p.is_empty()) {
        return Ok(format!("user_{}", principal));
    }

    match ctx.remote_addr {
        Some(addr) => Ok(format!("ip_{}", addr)),
        None => Err(TallyError::KeyDerivation(format!(
            "request to {} has neither a principal nor a remote address",
            ctx.path
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_principal_takes_precedence() {
        let ctx = RequestContext::new("/events")
            .with_principal("42")
            .with_remote_addr("10.0.0.1".parse().unwrap());

        assert_eq!(default_key(&ctx).unwrap(), "user_42");
    }

    #[test]
    fn test_falls_back_to_remote_addr() {
        let ctx = RequestContext::new("/events").with_remote_addr("1.2.3.4".parse().unwrap());
        assert_eq!(default_key(&ctx).unwrap(), "ip_1.2.3.4");

        let ctx = RequestContext::new("/events")
            .with_principal("")
            .with_remote_addr("::1".parse().unwrap());
        assert_eq!(default_key(&ctx).unwrap(), "ip_::1");
    }

    #[test]
    fn test_anonymous_without_addr_fails() {
        let ctx = RequestContext::new("/events");
        assert!(matches!(default_key(&ctx), Err(TallyError::KeyDerivation(_))));
    }
}
