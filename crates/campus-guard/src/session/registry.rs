//! In-memory session registry with fingerprint checks and eviction.

use campus_common::{Fingerprint, Role, SecurityEventKind, SecuritySession, SessionValidation};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::fingerprint;
use crate::csrf::CsrfTokens;
use crate::events::SecurityEventLog;

/// Per-role session caps and idle timeouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct SessionLimit {
    pub max_concurrent: usize,
    pub idle_timeout_secs: u64,
}

/// Limits for every role
#[derive(Debug, Clone)]
pub struct SessionLimits {
    limits: HashMap<Role, SessionLimit>,
}

impl SessionLimits {
    pub fn get(&self, role: Role) -> SessionLimit {
        self.limits.get(&role).copied().unwrap_or(SessionLimit {
            max_concurrent: 1,
            idle_timeout_secs: 1800,
        })
    }

    pub fn set(&mut self, role: Role, limit: SessionLimit) {
        self.limits.insert(role, limit);
    }

    pub fn max_concurrent_sessions(&self, role: Role) -> usize {
        self.get(role).max_concurrent.max(1)
    }

    pub fn idle_timeout(&self, role: Role) -> ChronoDuration {
        ChronoDuration::seconds(self.get(role).idle_timeout_secs as i64)
    }
}

impl Default for SessionLimits {
    fn default() -> Self {
        let limit = |max_concurrent, idle_timeout_secs| SessionLimit {
            max_concurrent,
            idle_timeout_secs,
        };
        Self {
            limits: HashMap::from([
                (Role::Anonymous, limit(1, 30 * 60)),
                (Role::Student, limit(3, 2 * 60 * 60)),
                (Role::Instructor, limit(5, 4 * 60 * 60)),
                (Role::Admin, limit(2, 30 * 60)),
            ]),
        }
    }
}

/// Session registry
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SecuritySession>>,
    limits: SessionLimits,
    events: Arc<SecurityEventLog>,
}

impl SessionRegistry {
    pub fn new(limits: SessionLimits, events: Arc<SecurityEventLog>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            limits,
            events,
        }
    }

    pub fn limits(&self) -> &SessionLimits {
        &self.limits
    }

    pub async fn create_secure_session(
        &self,
        user_id: &str,
        role: Role,
        ip: Option<String>,
        fingerprint: Fingerprint,
    ) -> Uuid {
        self.create_secure_session_at(user_id, role, ip, fingerprint, Utc::now())
            .await
    }

    /// Register a new session, evicting the user's oldest ones past the cap
    pub async fn create_secure_session_at(
        &self,
        user_id: &str,
        role: Role,
        ip: Option<String>,
        fingerprint: Fingerprint,
        now: DateTime<Utc>,
    ) -> Uuid {
        let max = self.limits.max_concurrent_sessions(role);

        let mut session = SecuritySession::new(user_id.to_string(), role, ip, fingerprint);
        session.created_at = now;
        session.last_activity = now;
        let session_id = session.id;

        let evicted = {
            let mut sessions = self.sessions.write().await;

            let mut owned: Vec<(DateTime<Utc>, Uuid)> = sessions
                .values()
                .filter(|s| s.user_id == user_id)
                .map(|s| (s.created_at, s.id))
                .collect();
            owned.sort();

            let excess = (owned.len() + 1).saturating_sub(max);
            let evicted: Vec<Uuid> = owned.into_iter().take(excess).map(|(_, id)| id).collect();
            for id in &evicted {
                sessions.remove(id);
            }

            sessions.insert(session_id, session);
            evicted
        };

        for id in &evicted {
            self.events
                .record(
                    SecurityEventKind::SessionEvicted,
                    Some(user_id),
                    format!("session {id} evicted, {role} limit is {max}"),
                )
                .await;
        }
        self.events
            .record(
                SecurityEventKind::SessionCreated,
                Some(user_id),
                format!("session {session_id} created for {role}"),
            )
            .await;

        session_id
    }

    pub async fn validate_session(
        &self,
        session_id: Uuid,
        user_id: &str,
        fingerprint: &Fingerprint,
    ) -> SessionValidation {
        self.validate_session_at(session_id, user_id, fingerprint, Utc::now())
            .await
    }

    /// Check a session against its owner, idle timeout, and fingerprint.
    ///
    /// Expired and mismatched sessions are removed.
    pub async fn validate_session_at(
        &self,
        session_id: Uuid,
        user_id: &str,
        fingerprint: &Fingerprint,
        now: DateTime<Utc>,
    ) -> SessionValidation {
        let mut sessions = self.sessions.write().await;

        let Some(session) = sessions.get_mut(&session_id) else {
            return SessionValidation::invalid("Session not found");
        };

        if session.user_id != user_id {
            drop(sessions);
            self.events
                .record(
                    SecurityEventKind::SuspiciousActivity,
                    Some(user_id),
                    format!("session {session_id} presented by a different user"),
                )
                .await;
            return SessionValidation::invalid("Session does not belong to user");
        }

        if now - session.last_activity > self.limits.idle_timeout(session.role) {
            sessions.remove(&session_id);
            drop(sessions);
            self.events
                .record(
                    SecurityEventKind::SessionExpired,
                    Some(user_id),
                    format!("session {session_id} idle timeout"),
                )
                .await;
            return SessionValidation::invalid("Session expired");
        }

        if !session.fingerprint.matches(fingerprint) {
            let fields = session.fingerprint.mismatched_fields(fingerprint).join(", ");
            let stored = fingerprint::digest(&session.fingerprint);
            let presented = fingerprint::digest(fingerprint);
            sessions.remove(&session_id);
            drop(sessions);
            self.events
                .record(
                    SecurityEventKind::SuspiciousActivity,
                    Some(user_id),
                    format!(
                        "fingerprint mismatch on session {session_id} ({fields}): {stored} -> {presented}"
                    ),
                )
                .await;
            return SessionValidation::invalid("Session fingerprint mismatch");
        }

        session.last_activity = now;
        SessionValidation::valid()
    }

    /// Remove one session. Returns false if it did not exist.
    pub async fn destroy_session(&self, session_id: Uuid) -> bool {
        let removed = self.sessions.write().await.remove(&session_id);
        match removed {
            Some(session) => {
                self.events
                    .record(
                        SecurityEventKind::SessionDestroyed,
                        Some(&session.user_id),
                        format!("session {session_id} destroyed"),
                    )
                    .await;
                true
            }
            None => false,
        }
    }

    /// Remove all of a user's sessions, returning their ids
    pub async fn destroy_user_sessions(&self, user_id: &str) -> Vec<Uuid> {
        let mut sessions = self.sessions.write().await;
        let ids: Vec<Uuid> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .map(|s| s.id)
            .collect();
        for id in &ids {
            sessions.remove(id);
        }
        ids
    }

    /// A user's sessions, oldest first
    pub async fn active_sessions(&self, user_id: &str) -> Vec<SecuritySession> {
        let sessions = self.sessions.read().await;
        let mut owned: Vec<SecuritySession> = sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.created_at);
        owned
    }

    pub async fn contains(&self, session_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&session_id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn purge_expired(&self) -> usize {
        self.purge_expired_at(Utc::now()).await
    }

    /// Drop every session idle past its role's timeout
    pub async fn purge_expired_at(&self, now: DateTime<Utc>) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        let limits = &self.limits;
        sessions.retain(|_, s| now - s.last_activity <= limits.idle_timeout(s.role));
        before - sessions.len()
    }
}

/// Background worker that purges idle sessions and stale CSRF tokens
pub async fn session_purge_worker(
    registry: Arc<SessionRegistry>,
    csrf: Arc<CsrfTokens>,
    interval: Duration,
    mut shutdown: tokio::sync::broadcast::Receiver<()>,
) {
    tracing::info!(interval_secs = interval.as_secs(), "Session purge worker started");

    let mut ticker = tokio::time::interval(interval);
    // First tick fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let purged = registry.purge_expired().await;
                let tokens = csrf.purge_expired_at(Utc::now()).await;
                if purged > 0 || tokens > 0 {
                    tracing::debug!(purged = purged, tokens = tokens, "Purged idle sessions");
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Session purge worker shutting down");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp() -> Fingerprint {
        Fingerprint {
            user_agent: "Mozilla/5.0".into(),
            timezone: "Asia/Tokyo".into(),
            language: "ja-JP".into(),
            platform: "Win32".into(),
            screen_resolution: "1366x768".into(),
        }
    }

    fn registry() -> (SessionRegistry, Arc<SecurityEventLog>) {
        let events = Arc::new(SecurityEventLog::new());
        (SessionRegistry::new(SessionLimits::default(), events.clone()), events)
    }

    fn t(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_validate() {
        let (registry, _) = registry();
        let id = registry
            .create_secure_session_at("u1", Role::Student, Some("10.0.0.1".into()), fp(), t(0))
            .await;

        let result = registry.validate_session_at(id, "u1", &fp(), t(60)).await;
        assert!(result.is_valid);

        let sessions = registry.active_sessions("u1").await;
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].last_activity, t(60));
    }

    #[tokio::test]
    async fn test_cap_evicts_oldest() {
        let (registry, events) = registry();
        let max = registry.limits().max_concurrent_sessions(Role::Student);
        assert_eq!(max, 3);

        let mut ids = Vec::new();
        for i in 0..max as i64 {
            ids.push(
                registry
                    .create_secure_session_at("u1", Role::Student, None, fp(), t(i))
                    .await,
            );
        }

        let newest = registry
            .create_secure_session_at("u1", Role::Student, None, fp(), t(10))
            .await;

        let active: Vec<Uuid> = registry.active_sessions("u1").await.iter().map(|s| s.id).collect();
        assert_eq!(active.len(), max);
        assert!(!active.contains(&ids[0]));
        assert_eq!(active, vec![ids[1], ids[2], newest]);
        assert_eq!(events.count_of(SecurityEventKind::SessionEvicted).await, 1);

        // Other users are untouched
        registry
            .create_secure_session_at("u2", Role::Student, None, fp(), t(11))
            .await;
        assert_eq!(registry.active_sessions("u1").await.len(), max);
    }

    #[tokio::test]
    async fn test_fingerprint_mismatch_rejected_and_removed() {
        let (registry, events) = registry();
        let id = registry
            .create_secure_session_at("u1", Role::Instructor, None, fp(), t(0))
            .await;

        for changed in [
            Fingerprint { user_agent: "curl/8.0".into(), ..fp() },
            Fingerprint { timezone: "UTC".into(), ..fp() },
            Fingerprint { language: "en-US".into(), ..fp() },
            Fingerprint { platform: "Linux".into(), ..fp() },
        ] {
            let id = registry
                .create_secure_session_at("u3", Role::Instructor, None, fp(), t(0))
                .await;
            let result = registry.validate_session_at(id, "u3", &changed, t(1)).await;
            assert!(!result.is_valid);
            assert_eq!(result.reason.as_deref(), Some("Session fingerprint mismatch"));
        }
        assert_eq!(events.count_of(SecurityEventKind::SuspiciousActivity).await, 4);

        // Resolution changes are tolerated
        let resized = Fingerprint {
            screen_resolution: "3840x2160".into(),
            ..fp()
        };
        assert!(registry.validate_session_at(id, "u1", &resized, t(1)).await.is_valid);
    }

    #[tokio::test]
    async fn test_idle_timeout() {
        let (registry, _) = registry();
        let id = registry
            .create_secure_session_at("admin", Role::Admin, None, fp(), t(0))
            .await;

        let result = registry
            .validate_session_at(id, "admin", &fp(), t(31 * 60))
            .await;
        assert!(!result.is_valid);
        assert_eq!(result.reason.as_deref(), Some("Session expired"));
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_wrong_owner_and_unknown() {
        let (registry, _) = registry();
        let id = registry
            .create_secure_session_at("u1", Role::Student, None, fp(), t(0))
            .await;

        assert!(!registry.validate_session_at(id, "u2", &fp(), t(1)).await.is_valid);
        assert!(
            !registry
                .validate_session_at(Uuid::new_v4(), "u1", &fp(), t(1))
                .await
                .is_valid
        );
        // Owner mismatch does not destroy the real owner's session
        assert!(registry.validate_session_at(id, "u1", &fp(), t(2)).await.is_valid);
    }

    #[tokio::test]
    async fn test_purge_and_destroy() {
        let (registry, _) = registry();
        registry
            .create_secure_session_at("a", Role::Anonymous, None, fp(), t(0))
            .await;
        let keep = registry
            .create_secure_session_at("s", Role::Student, None, fp(), t(0))
            .await;
        registry
            .create_secure_session_at("s2", Role::Student, None, fp(), t(0))
            .await;

        // Anonymous times out after 30 minutes, students after 2 hours
        assert_eq!(registry.purge_expired_at(t(45 * 60)).await, 1);
        assert_eq!(registry.len().await, 2);

        assert!(registry.destroy_session(keep).await);
        assert!(!registry.destroy_session(keep).await);
        assert_eq!(registry.destroy_user_sessions("s2").await.len(), 1);
        assert_eq!(registry.len().await, 0);
    }

    #[tokio::test]
    async fn test_purge_worker_stops_on_shutdown() {
        let (registry, events) = registry();
        let registry = Arc::new(registry);
        let csrf = Arc::new(CsrfTokens::new(3600, events));
        let (tx, rx) = tokio::sync::broadcast::channel(1);

        let handle = tokio::spawn(session_purge_worker(
            registry,
            csrf,
            Duration::from_millis(10),
            rx,
        ));
        tokio::time::sleep(Duration::from_millis(30)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}
