//! Per-session CSRF tokens.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use campus_common::SecurityEventKind;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::events::SecurityEventLog;

struct CsrfEntry {
    token: String,
    expires_at: DateTime<Utc>,
}

/// CSRF token store keyed by session id
pub struct CsrfTokens {
    tokens: RwLock<HashMap<Uuid, CsrfEntry>>,
    ttl: ChronoDuration,
    events: Arc<SecurityEventLog>,
}

impl CsrfTokens {
    pub fn new(ttl_secs: u64, events: Arc<SecurityEventLog>) -> Self {
        Self {
            tokens: RwLock::new(HashMap::new()),
            ttl: ChronoDuration::seconds(ttl_secs as i64),
            events,
        }
    }

    pub async fn issue(&self, session_id: Uuid) -> String {
        self.issue_at(session_id, Utc::now()).await
    }

    /// Issue a fresh token, replacing any earlier one for the session
    pub async fn issue_at(&self, session_id: Uuid, now: DateTime<Utc>) -> String {
        let token = generate_token();
        self.tokens.write().await.insert(
            session_id,
            CsrfEntry {
                token: token.clone(),
                expires_at: now + self.ttl,
            },
        );
        tracing::debug!(session_id = %session_id, "CSRF token issued");
        token
    }

    pub async fn validate(&self, session_id: Uuid, token: &str) -> bool {
        self.validate_at(session_id, token, Utc::now()).await
    }

    pub async fn validate_at(&self, session_id: Uuid, token: &str, now: DateTime<Utc>) -> bool {
        let mut tokens = self.tokens.write().await;
        let reason = match tokens.get(&session_id) {
            None => "no token issued",
            Some(entry) if now >= entry.expires_at => "token expired",
            Some(entry) if constant_time_eq(entry.token.as_bytes(), token.as_bytes()) => {
                return true;
            }
            Some(_) => "token mismatch",
        };
        if reason == "token expired" {
            tokens.remove(&session_id);
        }
        drop(tokens);

        self.events
            .record(
                SecurityEventKind::CsrfRejected,
                Some(&session_id.to_string()),
                reason,
            )
            .await;
        false
    }

    pub async fn revoke(&self, session_id: Uuid) {
        self.tokens.write().await.remove(&session_id);
    }

    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut tokens = self.tokens.write().await;
        let before = tokens.len();
        tokens.retain(|_, entry| now < entry.expires_at);
        before - tokens.len()
    }

    pub async fn len(&self) -> usize {
        self.tokens.read().await.len()
    }
}

/// 32 random bytes, base64url without padding
fn generate_token() -> String {
    let mut bytes = [0u8; 32];
    rand::Rng::fill(&mut rand::rng(), &mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Constant-time byte comparison
pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
