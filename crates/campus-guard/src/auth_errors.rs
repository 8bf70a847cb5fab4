//! Mapping of auth backend error messages to user-facing errors.

use serde::Serialize;

/// Category of an auth backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    RateLimited,
    AlreadyRegistered,
    InvalidCredentials,
    EmailNotConfirmed,
    CaptchaFailed,
    WeakPassword,
    Network,
    Unknown,
}

impl AuthErrorKind {
    /// Classify a backend message by substring (case-insensitive)
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();

        if msg.contains("rate limit") || msg.contains("too many requests") {
            Self::RateLimited
        } else if msg.contains("user already registered") || msg.contains("already exists") {
            Self::AlreadyRegistered
        } else if msg.contains("invalid login credentials") {
            Self::InvalidCredentials
        } else if msg.contains("email not confirmed") {
            Self::EmailNotConfirmed
        } else if msg.contains("captcha") {
            Self::CaptchaFailed
        } else if msg.contains("password")
            && (msg.contains("should") || msg.contains("at least") || msg.contains("weak"))
        {
            Self::WeakPassword
        } else if msg.contains("network") || msg.contains("fetch") || msg.contains("timeout") {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::RateLimited => "Too many attempts. Please wait a few minutes and try again.",
            Self::AlreadyRegistered => "An account with this email already exists. Try signing in.",
            Self::InvalidCredentials => "Incorrect email or password.",
            Self::EmailNotConfirmed => "Please confirm your email address before signing in.",
            Self::CaptchaFailed => "Security check failed. Please complete it again.",
            Self::WeakPassword => "Password is too weak. Use at least 8 characters with a mix of types.",
            Self::Network => "Connection problem. Please check your network and retry.",
            Self::Unknown => "Something went wrong. Please try again.",
        }
    }

    /// Only transient transport failures are retried automatically
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Classified error ready for a toast notification
#[derive(Debug, Clone, Serialize)]
pub struct ClassifiedAuthError {
    pub kind: AuthErrorKind,
    pub message: &'static str,
    pub recoverable: bool,
}

pub fn classify(message: &str) -> ClassifiedAuthError {
    let kind = AuthErrorKind::classify(message);
    ClassifiedAuthError {
        kind,
        message: kind.user_message(),
        recoverable: kind.is_recoverable(),
    }
}
