//! # Campus Common
//!
//! Shared types, traits, and utilities used across Campus Guard components.
//!
//! ## Modules
//! - `types` - Core data structures (Role, RateLimitRecord, SecuritySession, etc.)
//! - `error` - Common error types
//! - `constants` - Shared configuration constants

pub mod constants;
pub mod error;
pub mod types;

pub use error::GuardError;
pub use types::*;
