//! Shared constants for Campus Guard components.

/// Default Redis connection URL
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";

/// Default HTTP listen address
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8890";

/// Maximum CAPTCHA verification attempts (first try included)
pub const MAX_CAPTCHA_ATTEMPTS: u32 = 3;

/// Base CAPTCHA retry delay in milliseconds
pub const CAPTCHA_RETRY_BASE_MS: u64 = 1000;

/// Upper bound on a single CAPTCHA retry delay in milliseconds
pub const CAPTCHA_RETRY_MAX_MS: u64 = 5000;

/// Sentinel token accepted by the development CAPTCHA bypass
pub const CAPTCHA_BYPASS_TOKEN: &str = "dev-bypass-token";

/// Security event log capacity
pub const SECURITY_LOG_CAPACITY: usize = 100;

/// Session purge interval (5 minutes)
pub const SESSION_PURGE_INTERVAL_SECS: u64 = 300;

/// Two-factor code validity (10 minutes)
pub const TWO_FACTOR_TTL_SECS: u64 = 600;

/// Minimum delay between two-factor resends
pub const TWO_FACTOR_RESEND_COOLDOWN_SECS: u64 = 30;

/// Wrong two-factor codes tolerated before a resend is required
pub const TWO_FACTOR_MAX_ATTEMPTS: u32 = 5;

/// Two-factor code length in digits
pub const TWO_FACTOR_CODE_DIGITS: usize = 6;

/// CSRF token validity (1 hour)
pub const CSRF_TOKEN_TTL_SECS: u64 = 3600;

/// Rate limit violations are forgotten after this long without a new one
pub const VIOLATION_RESET_SECS: i64 = 86_400;

/// Ceiling on any escalated rate limit block (24 hours)
pub const DEFAULT_MAX_BLOCK_SECS: u64 = 86_400;

/// Redis key prefixes
pub mod redis_keys {
    /// Rate limit records: ratelimit:{identifier}
    pub const RATELIMIT_PREFIX: &str = "ratelimit:";
}

/// Key prefix for per-IP rate limit records
pub const IP_KEY_PREFIX: &str = "ip:";

/// HTTP header names
pub mod headers {
    /// IANA timezone reported by the client
    pub const X_CLIENT_TIMEZONE: &str = "X-Client-Timezone";

    /// Client OS/platform string
    pub const X_CLIENT_PLATFORM: &str = "X-Client-Platform";

    /// Client screen resolution, e.g. "1920x1080"
    pub const X_SCREEN_RESOLUTION: &str = "X-Screen-Resolution";

    /// CSRF token echoed by forms
    pub const X_CSRF_TOKEN: &str = "X-CSRF-Token";
}
