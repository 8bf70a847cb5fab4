//! Core types shared across Campus Guard components.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::GuardError;

/// Platform role of the caller.
///
/// Rate limits, concurrent session caps, and idle timeouts are keyed on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Not signed in
    Anonymous,
    Student,
    Instructor,
    Admin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Anonymous, Role::Student, Role::Instructor, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Anonymous => "anonymous",
            Self::Student => "student",
            Self::Instructor => "instructor",
            Self::Admin => "admin",
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Anonymous
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = GuardError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "anonymous" | "anon" | "guest" => Ok(Self::Anonymous),
            "student" => Ok(Self::Student),
            "instructor" | "teacher" => Ok(Self::Instructor),
            "admin" => Ok(Self::Admin),
            other => Err(GuardError::InvalidInput(format!("unknown role '{other}'"))),
        }
    }
}

/// Kind of action being rate limited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Sign-in, sign-up, password reset
    Auth,
    /// Generic backend calls
    Api,
    /// Form submissions (forum posts, contact forms, reviews)
    Form,
}

impl ActionKind {
    pub const ALL: [ActionKind; 3] = [ActionKind::Auth, ActionKind::Api, ActionKind::Form];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Api => "api",
            Self::Form => "form",
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-identifier sliding window state.
///
/// Timestamps are Unix epoch milliseconds, oldest first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub identifier: String,

    /// Accepted requests inside the current window
    pub request_timestamps: VecDeque<i64>,

    /// Denials since the last forgiveness
    pub violation_count: u32,

    /// Requests are refused until this instant (epoch ms, 0 = not blocked)
    pub block_until: i64,

    /// Instant of the latest denial (epoch ms)
    #[serde(default)]
    pub last_violation: i64,
}

impl RateLimitRecord {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            request_timestamps: VecDeque::new(),
            violation_count: 0,
            block_until: 0,
            last_violation: 0,
        }
    }

    /// Drop timestamps at or before `cutoff`
    pub fn prune(&mut self, cutoff: i64) {
        while self
            .request_timestamps
            .front()
            .is_some_and(|&ts| ts <= cutoff)
        {
            self.request_timestamps.pop_front();
        }
    }

    pub fn is_blocked(&self, now_ms: i64) -> bool {
        now_ms < self.block_until
    }
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateLimitDecision {
    pub allowed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,

    /// Seconds until the caller may try again
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
}

impl RateLimitDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            retry_after: None,
        }
    }

    pub fn deny(reason: impl Into<String>, retry_after: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            retry_after: Some(retry_after),
        }
    }
}

/// Coarse client fingerprint captured at login
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub user_agent: String,
    pub timezone: String,
    pub language: String,
    pub platform: String,
    pub screen_resolution: String,
}

impl Fingerprint {
    /// Compare the stable signals.
    ///
    /// Screen resolution is ignored: it changes with external monitors and
    /// window zoom.
    pub fn matches(&self, other: &Fingerprint) -> bool {
        self.user_agent == other.user_agent
            && self.timezone == other.timezone
            && self.language == other.language
            && self.platform == other.platform
    }

    /// Names of the stable signals that differ from `other`
    pub fn mismatched_fields(&self, other: &Fingerprint) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.user_agent != other.user_agent {
            fields.push("user_agent");
        }
        if self.timezone != other.timezone {
            fields.push("timezone");
        }
        if self.language != other.language {
            fields.push("language");
        }
        if self.platform != other.platform {
            fields.push("platform");
        }
        fields
    }
}

/// A signed-in session tracked for hijack detection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecuritySession {
    pub id: Uuid,
    pub user_id: String,
    pub fingerprint: Fingerprint,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub role: Role,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

impl SecuritySession {
    pub fn new(user_id: String, role: Role, ip: Option<String>, fingerprint: Fingerprint) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            fingerprint,
            created_at: now,
            last_activity: now,
            role,
            ip,
        }
    }
}

/// Result of validating a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionValidation {
    pub is_valid: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl SessionValidation {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            reason: None,
        }
    }

    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason.into()),
        }
    }
}

/// CAPTCHA verification result
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptchaValidationResult {
    pub success: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Set when the development bypass accepted the token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bypass: Option<bool>,
}

impl CaptchaValidationResult {
    pub fn passed() -> Self {
        Self {
            success: true,
            error: None,
            bypass: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            bypass: None,
        }
    }

    pub fn bypassed() -> Self {
        Self {
            success: true,
            error: None,
            bypass: Some(true),
        }
    }
}

/// Category of a security event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SecurityEventKind {
    RateLimitExceeded,
    SessionCreated,
    SessionEvicted,
    SessionExpired,
    SessionDestroyed,
    SuspiciousActivity,
    CaptchaFailed,
    CaptchaBypassed,
    TwoFactorSent,
    TwoFactorFailed,
    TwoFactorVerified,
    CsrfRejected,
    SignOut,
}

impl SecurityEventKind {
    /// Events that point at an attack rather than routine bookkeeping
    pub fn is_suspicious(&self) -> bool {
        matches!(
            self,
            Self::RateLimitExceeded
                | Self::SuspiciousActivity
                | Self::CaptchaFailed
                | Self::TwoFactorFailed
                | Self::CsrfRejected
        )
    }
}

/// Entry in the security event log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub kind: SecurityEventKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,

    pub details: String,
    pub timestamp: DateTime<Utc>,
}

/// Metrics snapshot for monitoring
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub active_sessions: u64,
    pub pending_two_factor: u64,
    pub csrf_tokens: u64,
    pub security_events: u64,
    pub rate_limit_denials: u64,
    pub captcha_failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> Fingerprint {
        Fingerprint {
            user_agent: "Mozilla/5.0".into(),
            timezone: "Europe/Berlin".into(),
            language: "de-DE".into(),
            platform: "Linux x86_64".into(),
            screen_resolution: "1920x1080".into(),
        }
    }

    #[test]
    fn test_fingerprint_ignores_screen_resolution() {
        let a = fingerprint();
        let b = Fingerprint {
            screen_resolution: "2560x1440".into(),
            ..fingerprint()
        };
        assert!(a.matches(&b));
        assert!(a.mismatched_fields(&b).is_empty());
    }

    #[test]
    fn test_fingerprint_detects_stable_changes() {
        let a = fingerprint();
        let b = Fingerprint {
            timezone: "America/New_York".into(),
            platform: "MacIntel".into(),
            ..fingerprint()
        };
        assert!(!a.matches(&b));
        assert_eq!(a.mismatched_fields(&b), vec!["timezone", "platform"]);
    }

    #[test]
    fn test_role_parse() {
        assert_eq!("Student".parse::<Role>().unwrap(), Role::Student);
        assert_eq!("guest".parse::<Role>().unwrap(), Role::Anonymous);
        assert!("root".parse::<Role>().is_err());
    }

    #[test]
    fn test_record_prune() {
        let mut record = RateLimitRecord::new("alice");
        record.request_timestamps.extend([100, 200, 300]);
        record.prune(200);
        assert_eq!(record.request_timestamps, VecDeque::from(vec![300]));
    }

    #[test]
    fn test_decision_serialization_skips_empty() {
        let json = serde_json::to_string(&RateLimitDecision::allow()).unwrap();
        assert_eq!(json, r#"{"allowed":true}"#);
    }
}
