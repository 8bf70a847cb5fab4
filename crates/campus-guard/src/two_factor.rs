//! Two-factor authentication with an emailed six-digit code.
//!
//! A code is valid for ten minutes. Once it expires, verification is refused
//! until a new code is sent.

use anyhow::{Context, Result};
use async_trait::async_trait;
use campus_common::constants::{
    TWO_FACTOR_CODE_DIGITS, TWO_FACTOR_MAX_ATTEMPTS, TWO_FACTOR_RESEND_COOLDOWN_SECS,
};
use campus_common::{GuardError, SecurityEventKind};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::csrf::constant_time_eq;
use crate::events::SecurityEventLog;

/// Sends a code to the user out of band
#[async_trait]
pub trait CodeDelivery: Send + Sync {
    async fn deliver(&self, user_id: &str, code: &str, expires_in_secs: u64) -> Result<()>;
}

/// Posts codes to a mailer webhook as JSON
pub struct WebhookDelivery {
    client: reqwest::Client,
    url: String,
}

impl WebhookDelivery {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build 2FA delivery HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl CodeDelivery for WebhookDelivery {
    async fn deliver(&self, user_id: &str, code: &str, expires_in_secs: u64) -> Result<()> {
        let body = serde_json::json!({
            "user_id": user_id,
            "code": code,
            "expires_in_secs": expires_in_secs,
        });

        let response = self.client.post(&self.url).json(&body).send().await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "2FA delivery webhook failed: {}",
                response.status()
            ));
        }

        Ok(())
    }
}

/// Development delivery: writes the code to the debug log
pub struct LogDelivery;

#[async_trait]
impl CodeDelivery for LogDelivery {
    async fn deliver(&self, user_id: &str, code: &str, expires_in_secs: u64) -> Result<()> {
        tracing::debug!(user_id = %user_id, code = %code, expires_in_secs, "2FA code (log delivery)");
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct PendingCode {
    code: String,
    issued_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    attempts: u32,
}

impl PendingCode {
    fn is_same_issue(&self, other: &PendingCode) -> bool {
        self.issued_at == other.issued_at && self.code == other.code
    }
}

/// Pending two-factor challenges keyed by user id
pub struct TwoFactorManager {
    pending: RwLock<HashMap<String, PendingCode>>,
    delivery: Arc<dyn CodeDelivery>,
    ttl_secs: u64,
    events: Arc<SecurityEventLog>,
}

impl TwoFactorManager {
    pub fn new(delivery: Arc<dyn CodeDelivery>, ttl_secs: u64, events: Arc<SecurityEventLog>) -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            delivery,
            ttl_secs,
            events,
        }
    }

    pub async fn send_code(&self, user_id: &str) -> Result<u64, GuardError> {
        self.send_code_at(user_id, Utc::now()).await
    }

    /// Generate and deliver a code, replacing any pending one.
    ///
    /// Returns the validity in seconds.
    pub async fn send_code_at(&self, user_id: &str, now: DateTime<Utc>) -> Result<u64, GuardError> {
        let code = generate_code();
        let issued = PendingCode {
            code: code.clone(),
            issued_at: now,
            expires_at: now + ChronoDuration::seconds(self.ttl_secs as i64),
            attempts: 0,
        };

        // Cooldown check and replacement under one guard
        let previous = {
            let mut pending = self.pending.write().await;
            if let Some(existing) = pending.get(user_id) {
                let elapsed = (now - existing.issued_at).num_seconds();
                let cooldown = TWO_FACTOR_RESEND_COOLDOWN_SECS as i64;
                if elapsed < cooldown {
                    return Err(GuardError::RateLimited(format!(
                        "wait {} seconds before requesting a new code",
                        cooldown - elapsed
                    )));
                }
            }
            pending.insert(user_id.to_string(), issued.clone())
        };

        if let Err(e) = self.delivery.deliver(user_id, &code, self.ttl_secs).await {
            let mut pending = self.pending.write().await;
            // Only undo our own entry; a newer send may have replaced it
            if pending.get(user_id).is_some_and(|c| c.is_same_issue(&issued)) {
                match previous {
                    Some(previous) => {
                        pending.insert(user_id.to_string(), previous);
                    }
                    None => {
                        pending.remove(user_id);
                    }
                }
            }
            drop(pending);
            tracing::error!(user_id = %user_id, error = %e, "Failed to deliver 2FA code");
            return Err(GuardError::Upstream(format!("could not send verification code: {e}")));
        }

        self.events
            .record(SecurityEventKind::TwoFactorSent, Some(user_id), "verification code sent")
            .await;

        Ok(self.ttl_secs)
    }

    pub async fn verify_code(&self, user_id: &str, code: &str) -> Result<bool, GuardError> {
        self.verify_code_at(user_id, code, Utc::now()).await
    }

    /// Check a submitted code.
    ///
    /// `Ok(true)` consumes the challenge. `Ok(false)` is a wrong code.
    /// An expired or locked challenge is an error until a resend.
    pub async fn verify_code_at(
        &self,
        user_id: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, GuardError> {
        let code = code.trim();
        if code.len() != TWO_FACTOR_CODE_DIGITS || !code.chars().all(|c| c.is_ascii_digit()) {
            return Err(GuardError::InvalidInput(format!(
                "code must be {TWO_FACTOR_CODE_DIGITS} digits"
            )));
        }

        let mut pending = self.pending.write().await;
        let Some(challenge) = pending.get_mut(user_id) else {
            return Err(GuardError::Auth(
                "No verification code pending. Request a new code.".to_string(),
            ));
        };

        if now >= challenge.expires_at {
            return Err(GuardError::CodeExpired(
                "Request a new code to continue.".to_string(),
            ));
        }

        if challenge.attempts >= TWO_FACTOR_MAX_ATTEMPTS {
            return Err(GuardError::Auth(
                "Too many incorrect codes. Request a new code.".to_string(),
            ));
        }

        if constant_time_eq(challenge.code.as_bytes(), code.as_bytes()) {
            pending.remove(user_id);
            drop(pending);
            self.events
                .record(SecurityEventKind::TwoFactorVerified, Some(user_id), "code accepted")
                .await;
            return Ok(true);
        }

        challenge.attempts += 1;
        let attempts = challenge.attempts;
        drop(pending);

        self.events
            .record(
                SecurityEventKind::TwoFactorFailed,
                Some(user_id),
                format!("incorrect code, attempt {attempts} of {TWO_FACTOR_MAX_ATTEMPTS}"),
            )
            .await;
        Ok(false)
    }

    /// Countdown for the UI; None when nothing is pending
    pub async fn seconds_remaining_at(&self, user_id: &str, now: DateTime<Utc>) -> Option<u64> {
        let pending = self.pending.read().await;
        pending
            .get(user_id)
            .map(|c| (c.expires_at - now).num_seconds().max(0) as u64)
    }

    pub async fn cancel(&self, user_id: &str) {
        self.pending.write().await.remove(user_id);
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

fn generate_code() -> String {
    let n: u32 = rand::rng().random_range(0..1_000_000);
    format!("{:06}", n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::Mutex;
    use tokio_test::{assert_err, assert_ok};

    /// Captures delivered codes
    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl Outbox {
        async fn last_code(&self) -> String {
            self.sent.lock().await.last().unwrap().1.clone()
        }
    }

    #[async_trait]
    impl CodeDelivery for Outbox {
        async fn deliver(&self, user_id: &str, code: &str, _expires_in_secs: u64) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("smtp down");
            }
            self.sent
                .lock()
                .await
                .push((user_id.to_string(), code.to_string()));
            Ok(())
        }
    }

    fn manager() -> (TwoFactorManager, Arc<Outbox>) {
        let outbox = Arc::new(Outbox::default());
        let manager = TwoFactorManager::new(outbox.clone(), 600, Arc::new(SecurityEventLog::new()));
        (manager, outbox)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    fn wrong(code: &str) -> String {
        let first = code.as_bytes()[0];
        let replacement = if first == b'9' { '0' } else { (first + 1) as char };
        format!("{replacement}{}", &code[1..])
    }

    #[tokio::test]
    async fn test_correct_code_before_expiry() {
        let (manager, outbox) = manager();
        assert_eq!(assert_ok!(manager.send_code_at("u1", t(0)).await), 600);

        let code = outbox.last_code().await;
        assert_eq!(code.len(), 6);
        assert_eq!(manager.seconds_remaining_at("u1", t(100)).await, Some(500));

        assert!(assert_ok!(manager.verify_code_at("u1", &code, t(599)).await));
        // Consumed
        assert_err!(manager.verify_code_at("u1", &code, t(599)).await);
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_expired_code_blocked_until_resend() {
        let (manager, outbox) = manager();
        manager.send_code_at("u1", t(0)).await.unwrap();
        let code = outbox.last_code().await;

        let err = manager.verify_code_at("u1", &code, t(600)).await.unwrap_err();
        assert!(matches!(err, GuardError::CodeExpired(_)));
        assert_eq!(manager.seconds_remaining_at("u1", t(700)).await, Some(0));

        manager.send_code_at("u1", t(700)).await.unwrap();
        let fresh = outbox.last_code().await;
        assert!(manager.verify_code_at("u1", &fresh, t(701)).await.unwrap());
    }

    #[tokio::test]
    async fn test_wrong_codes_lock_challenge() {
        let (manager, outbox) = manager();
        manager.send_code_at("u1", t(0)).await.unwrap();
        let code = outbox.last_code().await;

        for _ in 0..TWO_FACTOR_MAX_ATTEMPTS {
            assert!(!manager.verify_code_at("u1", &wrong(&code), t(1)).await.unwrap());
        }
        let err = manager.verify_code_at("u1", &code, t(2)).await.unwrap_err();
        assert!(matches!(err, GuardError::Auth(_)));
    }

    #[tokio::test]
    async fn test_resend_cooldown_and_format() {
        let (manager, _) = manager();
        manager.send_code_at("u1", t(0)).await.unwrap();

        let err = manager.send_code_at("u1", t(10)).await.unwrap_err();
        assert!(matches!(err, GuardError::RateLimited(_)));
        assert!(manager.send_code_at("u1", t(31)).await.is_ok());

        let err = manager.verify_code_at("u1", "12ab56", t(32)).await.unwrap_err();
        assert!(matches!(err, GuardError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_delivery_failure_leaves_nothing_pending() {
        let outbox = Arc::new(Outbox {
            fail: AtomicBool::new(true),
            ..Default::default()
        });
        let manager = TwoFactorManager::new(outbox, 600, Arc::new(SecurityEventLog::new()));

        let err = manager.send_code_at("u1", t(0)).await.unwrap_err();
        assert!(matches!(err, GuardError::Upstream(_)));
        assert_eq!(manager.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_failed_resend_keeps_previous_code() {
        let (manager, outbox) = manager();
        assert_ok!(manager.send_code_at("u1", t(0)).await);
        let code = outbox.last_code().await;

        outbox.fail.store(true, Ordering::SeqCst);
        let err = manager.send_code_at("u1", t(31)).await.unwrap_err();
        assert!(matches!(err, GuardError::Upstream(_)));
        assert_eq!(manager.pending_count().await, 1);
        assert_eq!(manager.seconds_remaining_at("u1", t(100)).await, Some(500));

        assert!(assert_ok!(manager.verify_code_at("u1", &code, t(101)).await));
    }

    #[tokio::test]
    async fn test_concurrent_sends_respect_cooldown() {
        let (manager, outbox) = manager();
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let manager = manager.clone();
                tokio::spawn(async move { manager.send_code_at("u1", t(0)).await })
            })
            .collect();

        let mut sent = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                sent += 1;
            }
        }
        assert_eq!(sent, 1);
        assert_eq!(outbox.sent.lock().await.len(), 1);
    }

    #[test]
    fn test_generate_code_format() {
        for _ in 0..100 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
        }
    }
}
