//! CAPTCHA verification against the remote `validate-captcha` function.

use anyhow::{Context, Result};
use async_trait::async_trait;
use campus_common::constants::CAPTCHA_BYPASS_TOKEN;
use campus_common::{CaptchaValidationResult, GuardError, SecurityEventKind};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use super::retry::{CaptchaAttempt, CaptchaErrorKind, RetryPolicy};
use crate::events::SecurityEventLog;

/// Something that can check a CAPTCHA token once
#[async_trait]
pub trait CaptchaBackend: Send + Sync {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<CaptchaValidationResult, GuardError>;
}

#[derive(Serialize)]
struct VerifyBody<'a> {
    token: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    remoteip: Option<&'a str>,
}

/// HTTP client for the hosted verification function
pub struct RemoteCaptchaVerifier {
    client: reqwest::Client,
    verify_url: String,
}

impl RemoteCaptchaVerifier {
    pub fn new(verify_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build CAPTCHA HTTP client")?;

        Ok(Self {
            client,
            verify_url: verify_url.into(),
        })
    }
}

#[async_trait]
impl CaptchaBackend for RemoteCaptchaVerifier {
    async fn verify(
        &self,
        token: &str,
        remote_ip: Option<&str>,
    ) -> Result<CaptchaValidationResult, GuardError> {
        let response = self
            .client
            .post(&self.verify_url)
            .json(&VerifyBody {
                token,
                remoteip: remote_ip,
            })
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GuardError::Timeout("CAPTCHA verification request".to_string())
                } else {
                    GuardError::Upstream(format!("network error: {e}"))
                }
            })?;

        let status = response.status();

        // The function answers 4xx with a JSON body describing the failure
        match response.json::<CaptchaValidationResult>().await {
            Ok(result) => Ok(result),
            Err(_) if status.is_server_error() => Err(GuardError::Upstream(format!(
                "network error: validate-captcha returned {status}"
            ))),
            Err(e) => Err(GuardError::Captcha(format!(
                "unreadable validate-captcha response ({status}): {e}"
            ))),
        }
    }
}

/// Result of a verification including retries
#[derive(Debug, Clone, Serialize)]
pub struct CaptchaOutcome {
    #[serde(flatten)]
    pub result: CaptchaValidationResult,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<CaptchaErrorKind>,
}

/// Verification with bounded retry and the development bypass
pub struct CaptchaGuard {
    backend: Arc<dyn CaptchaBackend>,
    policy: RetryPolicy,
    bypass_enabled: bool,
    events: Arc<SecurityEventLog>,
    failures: AtomicU64,
}

impl CaptchaGuard {
    pub fn new(
        backend: Arc<dyn CaptchaBackend>,
        policy: RetryPolicy,
        bypass_enabled: bool,
        events: Arc<SecurityEventLog>,
    ) -> Self {
        if bypass_enabled {
            tracing::warn!("CAPTCHA development bypass is enabled");
        }
        Self {
            backend,
            policy,
            bypass_enabled,
            events,
            failures: AtomicU64::new(0),
        }
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    pub async fn verify(&self, token: &str, remote_ip: Option<&str>) -> CaptchaOutcome {
        let token = token.trim();

        if token.is_empty() {
            return CaptchaOutcome {
                result: CaptchaValidationResult::failed("Please complete the security check."),
                attempts: 0,
                error_kind: None,
            };
        }

        if self.bypass_enabled && token == CAPTCHA_BYPASS_TOKEN {
            self.events
                .record(
                    SecurityEventKind::CaptchaBypassed,
                    remote_ip,
                    "development bypass token accepted",
                )
                .await;
            return CaptchaOutcome {
                result: CaptchaValidationResult::bypassed(),
                attempts: 0,
                error_kind: None,
            };
        }

        let mut attempt = CaptchaAttempt::new();
        loop {
            if let Err(e) = attempt.start() {
                tracing::error!(error = %e, "CAPTCHA state machine out of sync");
                break;
            }

            let message = match self.backend.verify(token, remote_ip).await {
                Ok(result) if result.success => {
                    if let Err(e) = attempt.succeed() {
                        tracing::error!(error = %e, "CAPTCHA state machine out of sync");
                    }
                    tracing::debug!(attempts = attempt.attempts(), "CAPTCHA verified");
                    return CaptchaOutcome {
                        result: CaptchaValidationResult::passed(),
                        attempts: attempt.attempts(),
                        error_kind: None,
                    };
                }
                Ok(result) => result
                    .error
                    .unwrap_or_else(|| "verification failed".to_string()),
                Err(e) => e.to_string(),
            };

            let kind = CaptchaErrorKind::classify(&message);
            if let Err(e) = attempt.fail(kind) {
                tracing::error!(error = %e, kind = ?kind, "CAPTCHA state machine out of sync");
            }

            if kind.is_retryable() && self.policy.allows_retry(attempt.attempts()) {
                let delay = self.policy.delay_for(attempt.retry_count());
                tracing::debug!(
                    kind = ?kind,
                    attempt = attempt.attempts(),
                    delay_ms = delay.as_millis() as u64,
                    error = %message,
                    "Retrying CAPTCHA verification"
                );
                tokio::time::sleep(delay).await;
                continue;
            }

            return self.give_up(&attempt, kind, &message, remote_ip).await;
        }

        self.give_up(&attempt, CaptchaErrorKind::Other, "internal state error", remote_ip)
            .await
    }

    async fn give_up(
        &self,
        attempt: &CaptchaAttempt,
        kind: CaptchaErrorKind,
        message: &str,
        remote_ip: Option<&str>,
    ) -> CaptchaOutcome {
        self.failures.fetch_add(1, Ordering::Relaxed);
        self.events
            .record(
                SecurityEventKind::CaptchaFailed,
                remote_ip,
                format!("{kind:?} after {} attempt(s): {message}", attempt.attempts()),
            )
            .await;

        CaptchaOutcome {
            result: CaptchaValidationResult::failed(kind.user_message()),
            attempts: attempt.attempts(),
            error_kind: Some(kind),
        }
    }
}
