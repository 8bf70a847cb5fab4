//! Configuration management for Campus Guard.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use campus_common::Role;
use campus_common::constants::{
    CSRF_TOKEN_TTL_SECS, DEFAULT_LISTEN_ADDR, DEFAULT_MAX_BLOCK_SECS, DEFAULT_REDIS_URL,
    SESSION_PURGE_INTERVAL_SECS, TWO_FACTOR_TTL_SECS,
};

use crate::rate_limit::RuleOverride;
use crate::session::{SessionLimit, SessionLimits};

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Deployment environment
    #[serde(default)]
    pub environment: Environment,

    /// Origins allowed to call the API cross-origin
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Rate limit record storage
    #[serde(default)]
    pub storage: StorageConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// CAPTCHA configuration
    #[serde(default)]
    pub captcha: CaptchaConfig,

    /// Session security configuration
    #[serde(default)]
    pub session: SessionConfig,

    /// Two-factor configuration
    #[serde(default)]
    pub two_factor: TwoFactorConfig,

    /// CSRF configuration
    #[serde(default)]
    pub csrf: CsrfConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl std::str::FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Self::Development),
            "production" | "prod" => Ok(Self::Production),
            other => anyhow::bail!("unknown environment '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

/// Where rate limit records live
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,

    /// Redis connection URL (used by the redis backend)
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            redis_url: default_redis_url(),
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Ceiling on an escalated block in seconds
    #[serde(default = "default_max_block")]
    pub max_block_secs: u64,

    /// Replacements for entries of the built-in rule table
    #[serde(default)]
    pub rules: Vec<RuleOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_block_secs: default_max_block(),
            rules: Vec::new(),
        }
    }
}

/// CAPTCHA-specific configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CaptchaConfig {
    /// URL of the validate-captcha function
    #[serde(default = "default_verify_url")]
    pub verify_url: String,

    /// Per-request timeout in seconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Accept the development bypass token (ignored in production)
    #[serde(default)]
    pub bypass_enabled: bool,
}

impl Default for CaptchaConfig {
    fn default() -> Self {
        Self {
            verify_url: default_verify_url(),
            request_timeout_secs: default_request_timeout(),
            bypass_enabled: false,
        }
    }
}

/// Per-role session limit override
#[derive(Debug, Clone, Deserialize)]
pub struct RoleSessionLimit {
    pub role: Role,
    #[serde(flatten)]
    pub limit: SessionLimit,
}

/// Session security configuration
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Idle session purge interval in seconds
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,

    #[serde(default)]
    pub limits: Vec<RoleSessionLimit>,
}

impl SessionConfig {
    pub fn session_limits(&self) -> SessionLimits {
        let mut limits = SessionLimits::default();
        for o in &self.limits {
            limits.set(o.role, o.limit);
        }
        limits
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            purge_interval_secs: default_purge_interval(),
            limits: Vec::new(),
        }
    }
}

/// Two-factor configuration
#[derive(Debug, Clone, Deserialize)]
pub struct TwoFactorConfig {
    /// Mailer webhook; codes only go to the debug log when unset
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Code validity in seconds
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,

    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for TwoFactorConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            code_ttl_secs: default_code_ttl(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// CSRF configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    #[serde(default = "default_csrf_ttl")]
    pub token_ttl_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            token_ttl_secs: default_csrf_ttl(),
        }
    }
}

// Default value functions
fn default_redis_url() -> String { DEFAULT_REDIS_URL.to_string() }
fn default_listen_addr() -> String { DEFAULT_LISTEN_ADDR.to_string() }
fn default_max_block() -> u64 { DEFAULT_MAX_BLOCK_SECS }
fn default_verify_url() -> String { "http://127.0.0.1:54321/functions/v1/validate-captcha".to_string() }
fn default_request_timeout() -> u64 { 10 }
fn default_purge_interval() -> u64 { SESSION_PURGE_INTERVAL_SECS } // 5 minutes
fn default_code_ttl() -> u64 { TWO_FACTOR_TTL_SECS } // 10 minutes
fn default_csrf_ttl() -> u64 { CSRF_TOKEN_TTL_SECS } // 1 hour

impl AppConfig {
    /// Load configuration from file, with CLI overrides
    pub fn load(config_path: &str, args: &super::Args) -> Result<Self> {
        let mut config = if Path::new(config_path).exists() {
            Self::from_file(config_path)?
        } else {
            // Use defaults if config file doesn't exist
            tracing::warn!("Config file not found, using defaults");
            Self::default()
        };

        // Apply CLI overrides
        if let Some(ref redis_url) = args.redis_url {
            config.storage.redis_url = redis_url.clone();
            config.storage.backend = StorageBackend::Redis;
        }
        if let Some(ref listen) = args.listen {
            config.listen_addr = listen.clone();
        }
        if let Some(environment) = args.environment {
            config.environment = environment;
        }

        Ok(config)
    }

    pub fn from_file(config_path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
            .context("Failed to load config file")?;

        settings
            .try_deserialize()
            .context("Failed to parse config")
    }

    /// The bypass never applies in production
    pub fn captcha_bypass_enabled(&self) -> bool {
        self.captcha.bypass_enabled && self.environment != Environment::Production
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            environment: Environment::default(),
            allowed_origins: Vec::new(),
            storage: StorageConfig::default(),
            rate_limit: RateLimitConfig::default(),
            captcha: CaptchaConfig::default(),
            session: SessionConfig::default(),
            two_factor: TwoFactorConfig::default(),
            csrf: CsrfConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_common::ActionKind;

    #[test]
    fn test_from_toml_with_overrides() {
        let toml = r#"
            listen_addr = "0.0.0.0:9999"
            environment = "production"

            [storage]
            backend = "redis"

            [captcha]
            bypass_enabled = true

            [[rate_limit.rules]]
            role = "student"
            action = "api"
            max_requests = 7
            window_secs = 10
            block_duration_secs = 10
            escalation_factor = 3.0

            [[session.limits]]
            role = "admin"
            max_concurrent = 1
            idle_timeout_secs = 600
        "#;

        let config: AppConfig = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:9999");
        assert_eq!(config.storage.backend, StorageBackend::Redis);
        assert_eq!(config.storage.redis_url, DEFAULT_REDIS_URL);
        assert!(!config.captcha_bypass_enabled());

        let rule = &config.rate_limit.rules[0];
        assert_eq!((rule.role, rule.action), (Role::Student, ActionKind::Api));
        assert_eq!(rule.rule.max_requests, 7);

        let limits = config.session.session_limits();
        assert_eq!(limits.max_concurrent_sessions(Role::Admin), 1);
        assert_eq!(limits.max_concurrent_sessions(Role::Student), 3);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::default();
        assert_eq!(config.environment, Environment::Development);
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.session.purge_interval_secs, 300);
        assert_eq!(config.two_factor.code_ttl_secs, 600);
        assert!(!config.captcha_bypass_enabled());
    }

    #[test]
    fn test_bypass_allowed_in_development() {
        let mut config = AppConfig::default();
        config.captcha.bypass_enabled = true;
        assert!(config.captcha_bypass_enabled());
    }
}
