//! Application state and shared resources.

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use campus_common::{ActionKind, Fingerprint, MetricsSnapshot, Role, SecurityEventKind};
use uuid::Uuid;

use crate::captcha::{CaptchaBackend, CaptchaGuard, RemoteCaptchaVerifier, RetryPolicy};
use crate::config::{AppConfig, StorageBackend};
use crate::csrf::CsrfTokens;
use crate::events::SecurityEventLog;
use crate::rate_limit::{MemoryStore, RateLimiter, RecordStore, RedisStore, RuleTable};
use crate::session::SessionRegistry;
use crate::two_factor::{CodeDelivery, LogDelivery, TwoFactorManager, WebhookDelivery};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: AppConfig,

    /// Capped security event log
    pub events: Arc<SecurityEventLog>,

    /// Role × action rate limiter
    pub rate_limiter: Arc<RateLimiter>,

    /// CAPTCHA verification with retry
    pub captcha: Arc<CaptchaGuard>,

    /// Fingerprinted session registry
    pub sessions: Arc<SessionRegistry>,

    /// Per-session CSRF tokens
    pub csrf: Arc<CsrfTokens>,

    /// Pending two-factor challenges
    pub two_factor: Arc<TwoFactorManager>,

    /// Redis connection when the redis backend is selected
    pub redis: Option<redis::aio::ConnectionManager>,

    /// Process start, for uptime reporting
    pub started_at: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    /// Create new application state, connecting to Redis if configured
    pub async fn new(config: AppConfig) -> Result<Self> {
        let (store, redis): (Arc<dyn RecordStore>, _) = match config.storage.backend {
            StorageBackend::Memory => (Arc::new(MemoryStore::new()) as Arc<dyn RecordStore>, None),
            StorageBackend::Redis => {
                let store = RedisStore::connect(&config.storage.redis_url).await?;
                let conn = store.connection();
                tracing::info!(redis_url = %config.storage.redis_url, "Redis connected");
                (Arc::new(store) as Arc<dyn RecordStore>, Some(conn))
            }
        };

        let captcha_backend: Arc<dyn CaptchaBackend> = Arc::new(RemoteCaptchaVerifier::new(
            config.captcha.verify_url.clone(),
            Duration::from_secs(config.captcha.request_timeout_secs),
        )?);

        let delivery: Arc<dyn CodeDelivery> = match config.two_factor.webhook_url {
            Some(ref url) => Arc::new(WebhookDelivery::new(
                url.clone(),
                Duration::from_secs(config.two_factor.request_timeout_secs),
            )?),
            None => {
                tracing::warn!("No 2FA webhook configured, codes go to the debug log");
                Arc::new(LogDelivery)
            }
        };

        Ok(Self::with_components(config, store, captcha_backend, delivery, redis))
    }

    /// Assemble state from explicit backends
    pub fn with_components(
        config: AppConfig,
        store: Arc<dyn RecordStore>,
        captcha_backend: Arc<dyn CaptchaBackend>,
        delivery: Arc<dyn CodeDelivery>,
        redis: Option<redis::aio::ConnectionManager>,
    ) -> Self {
        let events = Arc::new(SecurityEventLog::new());

        let rate_limiter = Arc::new(RateLimiter::new(
            RuleTable::with_overrides(&config.rate_limit.rules),
            store,
            events.clone(),
            config.rate_limit.max_block_secs,
        ));
        let captcha = Arc::new(CaptchaGuard::new(
            captcha_backend,
            RetryPolicy::default(),
            config.captcha_bypass_enabled(),
            events.clone(),
        ));
        let sessions = Arc::new(SessionRegistry::new(
            config.session.session_limits(),
            events.clone(),
        ));
        let csrf = Arc::new(CsrfTokens::new(config.csrf.token_ttl_secs, events.clone()));
        let two_factor = Arc::new(TwoFactorManager::new(
            delivery,
            config.two_factor.code_ttl_secs,
            events.clone(),
        ));

        Self {
            config,
            events,
            rate_limiter,
            captcha,
            sessions,
            csrf,
            two_factor,
            redis,
            started_at: chrono::Utc::now(),
        }
    }

    /// Open a session after a successful sign-in and clear the auth
    /// rate limit record for the user and the login identifier.
    pub async fn sign_in(
        &self,
        user_id: &str,
        identifier: Option<&str>,
        role: Role,
        ip: Option<String>,
        fingerprint: Fingerprint,
    ) -> Result<Uuid> {
        let session_id = self
            .sessions
            .create_secure_session(user_id, role, ip, fingerprint)
            .await;

        self.rate_limiter.reset(user_id, ActionKind::Auth).await?;
        if let Some(identifier) = identifier.filter(|id| !id.is_empty() && *id != user_id) {
            self.rate_limiter.reset(identifier, ActionKind::Auth).await?;
        }

        Ok(session_id)
    }

    /// Tear down everything tied to a user: sessions, their CSRF tokens,
    /// a pending 2FA challenge, and the auth rate limit record.
    pub async fn sign_out(&self, user_id: &str) -> Result<usize> {
        let ids = self.sessions.destroy_user_sessions(user_id).await;
        for id in &ids {
            self.csrf.revoke(*id).await;
        }
        self.two_factor.cancel(user_id).await;
        self.rate_limiter.reset(user_id, ActionKind::Auth).await?;

        self.events
            .record(
                SecurityEventKind::SignOut,
                Some(user_id),
                format!("signed out, {} session(s) closed", ids.len()),
            )
            .await;

        Ok(ids.len())
    }

    pub async fn metrics(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            active_sessions: self.sessions.len().await as u64,
            pending_two_factor: self.two_factor.pending_count().await as u64,
            csrf_tokens: self.csrf.len().await as u64,
            security_events: self.events.total_recorded(),
            rate_limit_denials: self.rate_limiter.denials(),
            captcha_failures: self.captcha.failures(),
        }
    }

    pub fn uptime_secs(&self) -> u64 {
        (chrono::Utc::now() - self.started_at).num_seconds().max(0) as u64
    }
}
