//! Capped in-memory security event log.
//!
//! Keeps the most recent events for the admin debug panel. Diagnostic only,
//! not an audit trail.

use campus_common::constants::SECURITY_LOG_CAPACITY;
use campus_common::{SecurityEvent, SecurityEventKind};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// Ring buffer of security events
pub struct SecurityEventLog {
    events: RwLock<VecDeque<SecurityEvent>>,
    capacity: usize,
    /// Total events ever recorded (survives trimming and clears)
    total: AtomicU64,
}

impl SecurityEventLog {
    pub fn new() -> Self {
        Self::with_capacity(SECURITY_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            events: RwLock::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            total: AtomicU64::new(0),
        }
    }

    /// Append an event, dropping the oldest once full
    pub async fn record(
        &self,
        kind: SecurityEventKind,
        identifier: Option<&str>,
        details: impl Into<String>,
    ) {
        let event = SecurityEvent {
            kind,
            identifier: identifier.map(str::to_string),
            details: details.into(),
            timestamp: chrono::Utc::now(),
        };

        if kind.is_suspicious() {
            tracing::warn!(
                kind = ?event.kind,
                identifier = ?event.identifier,
                details = %event.details,
                "Security event"
            );
        } else {
            tracing::info!(
                kind = ?event.kind,
                identifier = ?event.identifier,
                details = %event.details,
                "Security event"
            );
        }

        let mut events = self.events.write().await;
        while events.len() >= self.capacity {
            events.pop_front();
        }
        events.push_back(event);
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    /// Most recent events, newest first
    pub async fn recent(&self, limit: usize) -> Vec<SecurityEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Number of retained events of the given kind
    pub async fn count_of(&self, kind: SecurityEventKind) -> usize {
        let events = self.events.read().await;
        events.iter().filter(|e| e.kind == kind).count()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }

    pub fn total_recorded(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

impl Default for SecurityEventLog {
    fn default() -> Self {
        Self::new()
    }
}
