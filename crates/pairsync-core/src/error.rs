//! Error types for the pairsync system
//!
//! This module defines all error types used throughout the crate, together
//! with the classification the engine and schedulers use to decide whether a
//! failure is worth retrying.

use thiserror::Error;

/// Result type alias for pairsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the pairsync system
#[derive(Error, Debug)]
pub enum Error {
    /// Store adapter errors (primary or secondary)
    #[error("Store error: {0}")]
    Store(String),

    /// Pairing table errors
    #[error("Pairing table error: {0}")]
    PairingTable(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O errors (files, sockets)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client errors (from service adapters)
    #[error("HTTP error: {0}")]
    Http(String),

    /// Authentication errors
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Rate limiting errors
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// The remote side is temporarily unavailable (5xx and friends)
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// A store or pairing-table call exceeded its time budget
    #[error("Timed out: {0}")]
    Timeout(String),

    /// A store or pairing table has not finished initializing
    #[error("Not ready: {0}")]
    NotReady(String),

    /// Another pass for the same service is still in flight
    #[error("Reconciliation pass already in progress for service '{0}'")]
    PassInProgress(String),

    /// The pairing table breaks the 1:1 pairing invariant
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Service-adapter-specific error
    #[error("Service error ({service}): {message}")]
    Service {
        /// Service adapter name
        service: String,
        /// Error message
        message: String,
    },

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of an [`Error`]
///
/// The outer scheduler only needs to know whether trying again later can
/// help. Invariant violations are never "fixed" automatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network, timeout, rate-limit, readiness and similar conditions.
    /// Safe to retry on the next pass.
    Transient,
    /// The pairing table is inconsistent. Needs an operator.
    InvariantViolation,
    /// Bad or missing configuration. Fatal at startup.
    Configuration,
}

impl Error {
    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Create a pairing table error
    pub fn pairing_table(msg: impl Into<String>) -> Self {
        Self::PairingTable(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an HTTP error
    pub fn http(msg: impl Into<String>) -> Self {
        Self::Http(msg.into())
    }

    /// Create an authentication error
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Authentication(msg.into())
    }

    /// Create a rate limit error
    pub fn rate_limited(msg: impl Into<String>) -> Self {
        Self::RateLimited(msg.into())
    }

    /// Create an "unavailable" error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    /// Create a timeout error
    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    /// Create a "not ready" error
    pub fn not_ready(msg: impl Into<String>) -> Self {
        Self::NotReady(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    /// Create a "not found" error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a service-adapter-specific error
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Classify this error
    pub fn class(&self) -> ErrorClass {
        match self {
            Error::Config(_) | Error::Authentication(_) | Error::InvalidInput(_) => {
                ErrorClass::Configuration
            }
            Error::InvariantViolation(_) => ErrorClass::InvariantViolation,
            _ => ErrorClass::Transient,
        }
    }

    /// Whether retrying the same call within the current pass may succeed
    ///
    /// Narrower than [`ErrorClass::Transient`]: a missing record or a
    /// malformed response will not fix itself a few seconds later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Io(_)
                | Error::Http(_)
                | Error::RateLimited(_)
                | Error::Unavailable(_)
                | Error::Timeout(_)
        )
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classes() {
        assert_eq!(Error::config("x").class(), ErrorClass::Configuration);
        assert_eq!(Error::auth("x").class(), ErrorClass::Configuration);
        assert_eq!(Error::invariant("x").class(), ErrorClass::InvariantViolation);
        assert_eq!(Error::timeout("x").class(), ErrorClass::Transient);
        assert_eq!(
            Error::PassInProgress("deals".into()).class(),
            ErrorClass::Transient
        );
    }

    #[test]
    fn test_in_pass_retry_is_narrow() {
        assert!(Error::rate_limited("slow down").is_transient());
        assert!(Error::unavailable("502").is_transient());
        assert!(!Error::not_found("p1").is_transient());
        assert!(!Error::invariant("dup").is_transient());
        assert!(!Error::service("http", "bad payload").is_transient());
    }
}
