//! Error types for Tally.

use thiserror::Error;

/// Main error type for Tally operations.
#[derive(Error, Debug)]
pub enum TallyError {
    /// Configuration-related errors, raised at construction time
    #[error("Configuration error: {0}")]
    Config(String),

    /// Failure to derive a rate limit key from a request
    #[error("Key derivation error: {0}")]
    KeyDerivation(String),
}

/// Result type alias for Tally operations.
pub type Result<T> = std::result::Result<T, TallyError>;
