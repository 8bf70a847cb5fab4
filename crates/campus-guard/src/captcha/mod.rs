//! CAPTCHA verification.
//!
//! Tokens issued by the Turnstile widget are checked by a hosted function.
//! Transient failures (timeout, network, expired token) are retried with
//! bounded exponential backoff; everything else fails immediately.

mod retry;
mod verifier;

pub use retry::RetryPolicy;
pub use verifier::{CaptchaBackend, CaptchaGuard, CaptchaOutcome, RemoteCaptchaVerifier};
