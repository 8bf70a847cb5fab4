//! Static rule table keyed by role and action.

use campus_common::{ActionKind, Role};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Limits for one (role, action) pair
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RateLimitRule {
    /// Requests allowed inside one window
    pub max_requests: u32,
    /// Sliding window length in seconds
    pub window_secs: u64,
    /// Base block applied on the first violation
    pub block_duration_secs: u64,
    /// Multiplier applied per repeated violation
    pub escalation_factor: f64,
}

impl RateLimitRule {
    pub const fn new(
        max_requests: u32,
        window_secs: u64,
        block_duration_secs: u64,
        escalation_factor: f64,
    ) -> Self {
        Self {
            max_requests,
            window_secs,
            block_duration_secs,
            escalation_factor,
        }
    }

    pub fn window_ms(&self) -> i64 {
        (self.window_secs as i64).saturating_mul(1000)
    }

    /// The per-IP variant of this rule. Anonymous traffic gets half the budget.
    pub fn for_ip(&self, role: Role) -> Self {
        match role {
            Role::Anonymous => Self {
                max_requests: (self.max_requests / 2).max(1),
                ..*self
            },
            _ => *self,
        }
    }

    /// Block length in milliseconds after `violations` denials (1-based),
    /// clamped to `max_block_secs`.
    pub fn block_ms(&self, violations: u32, max_block_secs: u64) -> i64 {
        let exponent = violations.saturating_sub(1).min(i32::MAX as u32) as i32;
        let factor = self.escalation_factor.max(1.0).powi(exponent);
        let base_ms = self.block_duration_secs as f64 * 1000.0;
        let max_ms = max_block_secs as f64 * 1000.0;
        (base_ms * factor).min(max_ms) as i64
    }
}

/// Rule override loaded from configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RuleOverride {
    pub role: Role,
    pub action: ActionKind,
    #[serde(flatten)]
    pub rule: RateLimitRule,
}

/// Role × action rule table
#[derive(Debug, Clone)]
pub struct RuleTable {
    rules: HashMap<(Role, ActionKind), RateLimitRule>,
}

impl RuleTable {
    /// Look up the rule for a pair; every pair is populated by `default()`.
    pub fn get(&self, role: Role, action: ActionKind) -> RateLimitRule {
        self.rules
            .get(&(role, action))
            .or_else(|| self.rules.get(&(Role::Anonymous, action)))
            .copied()
            .unwrap_or(RateLimitRule::new(1, 60, 60, 2.0))
    }

    pub fn set(&mut self, role: Role, action: ActionKind, rule: RateLimitRule) {
        self.rules.insert((role, action), rule);
    }

    /// Default table with configuration overrides applied
    pub fn with_overrides(overrides: &[RuleOverride]) -> Self {
        let mut table = Self::default();
        for o in overrides {
            tracing::debug!(role = %o.role, action = %o.action, rule = ?o.rule, "Rate limit rule override");
            table.set(o.role, o.action, o.rule);
        }
        table
    }
}

impl Default for RuleTable {
    fn default() -> Self {
        use ActionKind::*;
        use Role::*;

        let entries = [
            // Sign-in attempts: small budget, long window
            ((Anonymous, Auth), RateLimitRule::new(2, 900, 900, 2.0)),
            ((Anonymous, Api), RateLimitRule::new(30, 60, 60, 1.5)),
            ((Anonymous, Form), RateLimitRule::new(5, 60, 300, 2.0)),
            ((Student, Auth), RateLimitRule::new(5, 900, 600, 2.0)),
            ((Student, Api), RateLimitRule::new(100, 60, 60, 1.5)),
            ((Student, Form), RateLimitRule::new(20, 60, 120, 2.0)),
            ((Instructor, Auth), RateLimitRule::new(10, 900, 300, 2.0)),
            ((Instructor, Api), RateLimitRule::new(200, 60, 30, 1.5)),
            ((Instructor, Form), RateLimitRule::new(40, 60, 60, 2.0)),
            ((Admin, Auth), RateLimitRule::new(20, 900, 300, 2.0)),
            ((Admin, Api), RateLimitRule::new(500, 60, 30, 1.5)),
            ((Admin, Form), RateLimitRule::new(100, 60, 60, 2.0)),
        ];

        Self {
            rules: entries.into_iter().collect(),
        }
    }
}
