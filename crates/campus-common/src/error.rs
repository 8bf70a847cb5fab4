//! Common error types for Campus Guard components.

use thiserror::Error;

/// Common errors across Campus Guard components
#[derive(Debug, Error)]
pub enum GuardError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Redis connection/operation error
    #[error("Redis error: {0}")]
    Redis(String),

    /// CAPTCHA verification error
    #[error("CAPTCHA error: {0}")]
    Captcha(String),

    /// Session is unknown, expired, or failed validation
    #[error("Session error: {0}")]
    Session(String),

    /// Authentication/authorization error
    #[error("Auth error: {0}")]
    Auth(String),

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Two-factor code expired; a new one must be requested
    #[error("Verification code expired: {0}")]
    CodeExpired(String),

    /// Invalid input/request
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Requested item does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Upstream call failed (CAPTCHA endpoint, delivery webhook)
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Timeout
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl GuardError {
    /// Returns the HTTP status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Config(_) => 500,
            Self::Redis(_) => 503,
            Self::Captcha(_) => 400,
            Self::Session(_) => 401,
            Self::Auth(_) => 401,
            Self::RateLimited(_) => 429,
            Self::CodeExpired(_) => 410,
            Self::InvalidInput(_) => 400,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
            Self::Upstream(_) => 502,
            Self::Timeout(_) => 504,
        }
    }

    /// Returns true if this error should be retried
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Redis(_) | Self::Upstream(_) | Self::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(GuardError::RateLimited("x".into()).status_code(), 429);
        assert_eq!(GuardError::CodeExpired("x".into()).status_code(), 410);
        assert_eq!(GuardError::Session("x".into()).status_code(), 401);
    }

    #[test]
    fn test_retryable() {
        assert!(GuardError::Timeout("slow".into()).is_retryable());
        assert!(GuardError::Upstream("502".into()).is_retryable());
        assert!(!GuardError::Config("bad".into()).is_retryable());
        assert!(!GuardError::RateLimited("later".into()).is_retryable());
    }
}
