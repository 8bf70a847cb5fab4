//! Retry policy, error classification, and per-verification state.

use campus_common::constants::{CAPTCHA_RETRY_BASE_MS, CAPTCHA_RETRY_MAX_MS, MAX_CAPTCHA_ATTEMPTS};
use campus_common::GuardError;
use serde::Serialize;
use std::time::Duration;

/// Why a verification failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptchaErrorKind {
    Timeout,
    Network,
    Expired,
    Config,
    Other,
}

impl CaptchaErrorKind {
    /// Classify an error message by substring (case-insensitive)
    pub fn classify(message: &str) -> Self {
        let msg = message.to_ascii_lowercase();

        // "timeout-or-duplicate" is Turnstile's code for a spent token
        if msg.contains("expired") || msg.contains("timeout-or-duplicate") {
            Self::Expired
        } else if msg.contains("timeout") || msg.contains("timed out") {
            Self::Timeout
        } else if msg.contains("network") || msg.contains("fetch") || msg.contains("connection") {
            Self::Network
        } else if msg.contains("config")
            || msg.contains("sitekey")
            || msg.contains("secret")
        {
            Self::Config
        } else {
            Self::Other
        }
    }

    /// Transient failures worth another automatic attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Network | Self::Expired)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Timeout => "Security check timed out. Please try again.",
            Self::Network => "Network error during security check. Check your connection.",
            Self::Expired => "Security check expired. Please complete it again.",
            Self::Config => "Security check is misconfigured. Please contact support.",
            Self::Other => "Security check failed. Please try again.",
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Total attempts, first try included
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// `min(base * 2^retry_count, max)`
    pub fn delay_for(&self, retry_count: u32) -> Duration {
        let base_ms = self.base_delay.as_millis() as u64;
        let multiplier = 1u64.checked_shl(retry_count).unwrap_or(u64::MAX);
        let delay_ms = base_ms
            .saturating_mul(multiplier)
            .min(self.max_delay.as_millis() as u64);
        Duration::from_millis(delay_ms)
    }

    /// Whether another attempt may follow `attempts_made` attempts
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(CAPTCHA_RETRY_BASE_MS),
            max_delay: Duration::from_millis(CAPTCHA_RETRY_MAX_MS),
            max_attempts: MAX_CAPTCHA_ATTEMPTS,
        }
    }
}

/// Verification state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase", tag = "state", content = "error")]
pub enum CaptchaState {
    Idle,
    Loading,
    Success,
    Error(CaptchaErrorKind),
}

/// One verification, possibly spanning several attempts
#[derive(Debug, Clone)]
pub struct CaptchaAttempt {
    state: CaptchaState,
    attempts: u32,
}

impl CaptchaAttempt {
    pub fn new() -> Self {
        Self {
            state: CaptchaState::Idle,
            attempts: 0,
        }
    }

    pub fn state(&self) -> CaptchaState {
        self.state
    }

    /// Attempts started so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Retries already made (attempts beyond the first)
    pub fn retry_count(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    /// Idle or Error -> Loading
    pub fn start(&mut self) -> Result<(), GuardError> {
        match self.state {
            CaptchaState::Idle | CaptchaState::Error(_) => {
                self.state = CaptchaState::Loading;
                self.attempts += 1;
                Ok(())
            }
            other => Err(GuardError::Captcha(format!(
                "cannot start verification from {other:?}"
            ))),
        }
    }

    /// Loading -> Success
    pub fn succeed(&mut self) -> Result<(), GuardError> {
        self.finish(CaptchaState::Success)
    }

    /// Loading -> Error
    pub fn fail(&mut self, kind: CaptchaErrorKind) -> Result<(), GuardError> {
        self.finish(CaptchaState::Error(kind))
    }

    fn finish(&mut self, next: CaptchaState) -> Result<(), GuardError> {
        if self.state != CaptchaState::Loading {
            return Err(GuardError::Captcha(format!(
                "no verification in flight (state {:?})",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

impl Default for CaptchaAttempt {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_schedule() {
        let policy = RetryPolicy::default();
        let delays: Vec<u64> = (0..6)
            .map(|n| policy.delay_for(n).as_millis() as u64)
            .collect();
        assert_eq!(delays, vec![1000, 2000, 4000, 5000, 5000, 5000]);
        assert_eq!(policy.delay_for(200), Duration::from_millis(5000));
    }

    #[test]
    fn test_attempt_cap() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_classification() {
        assert_eq!(CaptchaErrorKind::classify("Request Timeout"), CaptchaErrorKind::Timeout);
        assert_eq!(
            CaptchaErrorKind::classify("Operation timed out: verify"),
            CaptchaErrorKind::Timeout
        );
        assert_eq!(CaptchaErrorKind::classify("Failed to fetch"), CaptchaErrorKind::Network);
        assert_eq!(CaptchaErrorKind::classify("timeout-or-duplicate"), CaptchaErrorKind::Expired);
        assert_eq!(CaptchaErrorKind::classify("Token expired"), CaptchaErrorKind::Expired);
        assert_eq!(
            CaptchaErrorKind::classify("invalid-input-secret"),
            CaptchaErrorKind::Config
        );
        assert_eq!(CaptchaErrorKind::classify("bad-request"), CaptchaErrorKind::Other);

        assert!(CaptchaErrorKind::Network.is_retryable());
        assert!(!CaptchaErrorKind::Config.is_retryable());
        assert!(!CaptchaErrorKind::Other.is_retryable());
    }

    #[test]
    fn test_state_machine() {
        let mut attempt = CaptchaAttempt::new();
        assert_eq!(attempt.state(), CaptchaState::Idle);

        attempt.start().unwrap();
        assert_eq!(attempt.state(), CaptchaState::Loading);
        // A second submit while loading is rejected
        assert!(attempt.start().is_err());

        attempt.fail(CaptchaErrorKind::Network).unwrap();
        assert_eq!(attempt.state(), CaptchaState::Error(CaptchaErrorKind::Network));

        attempt.start().unwrap();
        assert_eq!(attempt.retry_count(), 1);
        attempt.succeed().unwrap();
        assert_eq!(attempt.state(), CaptchaState::Success);
        assert!(attempt.start().is_err());
    }

    #[test]
    fn test_finish_requires_verification_in_flight() {
        let mut attempt = CaptchaAttempt::new();
        assert!(matches!(attempt.succeed(), Err(GuardError::Captcha(_))));
        assert!(matches!(
            attempt.fail(CaptchaErrorKind::Timeout),
            Err(GuardError::Captcha(_))
        ));
        assert_eq!(attempt.state(), CaptchaState::Idle);

        attempt.start().unwrap();
        attempt.succeed().unwrap();
        // A late failure cannot overwrite the result
        assert!(attempt.fail(CaptchaErrorKind::Network).is_err());
        assert_eq!(attempt.state(), CaptchaState::Success);
    }
}
