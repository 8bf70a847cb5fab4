//! Rate limiting module.
//!
//! Sliding-window limits per identifier and per IP, keyed by role and
//! action, with exponentially escalating blocks on repeated violations.

mod limiter;
mod rules;
mod store;

pub use limiter::RateLimiter;
pub use rules::{RuleOverride, RuleTable};
pub use store::{MemoryStore, RecordStore, RedisStore};
