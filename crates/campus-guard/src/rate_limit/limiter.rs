//! Sliding-window limiter with escalating blocks.

use anyhow::Result;
use campus_common::constants::{IP_KEY_PREFIX, VIOLATION_RESET_SECS};
use campus_common::{ActionKind, RateLimitDecision, RateLimitRecord, Role, SecurityEventKind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex;

use super::rules::{RateLimitRule, RuleTable};
use super::store::RecordStore;
use crate::events::SecurityEventLog;

/// Rate limiter keyed by identifier and, optionally, client IP
pub struct RateLimiter {
    rules: RuleTable,
    store: Arc<dyn RecordStore>,
    events: Arc<SecurityEventLog>,
    max_block_secs: u64,
    /// Serialises load-modify-save within this process
    lock: Mutex<()>,
    denials: AtomicU64,
}

impl RateLimiter {
    pub fn new(
        rules: RuleTable,
        store: Arc<dyn RecordStore>,
        events: Arc<SecurityEventLog>,
        max_block_secs: u64,
    ) -> Self {
        Self {
            rules,
            store,
            events,
            max_block_secs,
            lock: Mutex::new(()),
            denials: AtomicU64::new(0),
        }
    }

    pub fn store_backend(&self) -> &'static str {
        self.store.backend_name()
    }

    /// Total denials since startup
    pub fn denials(&self) -> u64 {
        self.denials.load(Ordering::Relaxed)
    }

    /// Check (and, if allowed, record) one request
    pub async fn check_limit(
        &self,
        identifier: &str,
        action: ActionKind,
        role: Role,
        ip: Option<&str>,
    ) -> Result<RateLimitDecision> {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.check_limit_at(identifier, action, role, ip, now_ms).await
    }

    pub async fn check_limit_at(
        &self,
        identifier: &str,
        action: ActionKind,
        role: Role,
        ip: Option<&str>,
        now_ms: i64,
    ) -> Result<RateLimitDecision> {
        let _guard = self.lock.lock().await;
        let rule = self.rules.get(role, action);

        let key = record_key(action, identifier);
        let mut record = self.load(&key).await?;
        let decision = self.evaluate(&mut record, &rule, now_ms);
        if !decision.allowed {
            self.save(&record, &rule, now_ms).await?;
            self.on_denied(identifier, action, role, &decision).await;
            return Ok(decision);
        }

        // The identifier's slot is only committed once the IP check passes
        if let Some(ip) = ip.filter(|ip| !ip.is_empty()) {
            let ip_key = format!("{}{}", IP_KEY_PREFIX, record_key(action, ip));
            let ip_rule = rule.for_ip(role);
            let mut ip_record = self.load(&ip_key).await?;
            let mut ip_decision = self.evaluate(&mut ip_record, &ip_rule, now_ms);
            self.save(&ip_record, &ip_rule, now_ms).await?;
            if !ip_decision.allowed {
                ip_decision.reason = Some(format!(
                    "Too many requests from this network. Try again in {} seconds.",
                    ip_decision.retry_after.unwrap_or(1)
                ));
                self.on_denied(ip, action, role, &ip_decision).await;
                return Ok(ip_decision);
            }
        }

        self.save(&record, &rule, now_ms).await?;
        Ok(decision)
    }

    /// Forget the record for an identifier (e.g. after a successful sign-in)
    pub async fn reset(&self, identifier: &str, action: ActionKind) -> Result<()> {
        let _guard = self.lock.lock().await;
        self.store.remove(&record_key(action, identifier)).await
    }

    /// Current record for an identifier, if any
    pub async fn record(
        &self,
        identifier: &str,
        action: ActionKind,
    ) -> Result<Option<RateLimitRecord>> {
        self.store.load(&record_key(action, identifier)).await
    }

    async fn load(&self, key: &str) -> Result<RateLimitRecord> {
        Ok(self
            .store
            .load(key)
            .await?
            .unwrap_or_else(|| RateLimitRecord::new(key)))
    }

    /// Decide one request against `record`, updating it in place
    fn evaluate(&self, record: &mut RateLimitRecord, rule: &RateLimitRule, now_ms: i64) -> RateLimitDecision {
        record.prune(now_ms - rule.window_ms());

        if record.violation_count > 0
            && !record.is_blocked(now_ms)
            && now_ms - record.last_violation > VIOLATION_RESET_SECS * 1000
        {
            tracing::debug!(key = %record.identifier, violations = record.violation_count, "Violations forgiven");
            record.violation_count = 0;
        }

        if record.is_blocked(now_ms) {
            let retry_after = self.register_violation(record, rule, now_ms);
            RateLimitDecision::deny(
                format!("Temporarily blocked. Try again in {retry_after} seconds."),
                retry_after,
            )
        } else if (record.request_timestamps.len() as u64) < rule.max_requests as u64 {
            record.request_timestamps.push_back(now_ms);
            RateLimitDecision::allow()
        } else {
            let retry_after = self.register_violation(record, rule, now_ms);
            RateLimitDecision::deny(
                format!("Too many requests. Try again in {retry_after} seconds."),
                retry_after,
            )
        }
    }

    async fn save(&self, record: &RateLimitRecord, rule: &RateLimitRule, now_ms: i64) -> Result<()> {
        let block_remaining_secs = ((record.block_until - now_ms).max(0) / 1000) as u64;
        let mut ttl = rule.window_secs.max(block_remaining_secs) + 1;
        if record.violation_count > 0 {
            ttl = ttl.max(VIOLATION_RESET_SECS as u64);
        }
        self.store.save(record, ttl).await
    }

    /// Escalate the block and return the retry delay in whole seconds
    fn register_violation(&self, record: &mut RateLimitRecord, rule: &RateLimitRule, now_ms: i64) -> u64 {
        record.violation_count = record.violation_count.saturating_add(1);
        record.last_violation = now_ms;
        let block_ms = rule.block_ms(record.violation_count, self.max_block_secs);
        record.block_until = now_ms.saturating_add(block_ms);

        let remaining_ms = (record.block_until - now_ms).max(0) as u64;
        remaining_ms.div_ceil(1000).max(1)
    }

    async fn on_denied(
        &self,
        identifier: &str,
        action: ActionKind,
        role: Role,
        decision: &RateLimitDecision,
    ) {
        self.denials.fetch_add(1, Ordering::Relaxed);
        self.events
            .record(
                SecurityEventKind::RateLimitExceeded,
                Some(identifier),
                format!(
                    "{} limit for role {} exceeded, retry after {}s",
                    action,
                    role,
                    decision.retry_after.unwrap_or(0)
                ),
            )
            .await;
    }
}

fn record_key(action: ActionKind, identifier: &str) -> String {
    format!("{}:{}", action, identifier)
}
