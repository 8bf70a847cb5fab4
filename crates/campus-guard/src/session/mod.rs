//! Session security.
//!
//! Tracks signed-in sessions with a coarse client fingerprint, caps
//! concurrent sessions per role, and expires idle ones.

pub mod fingerprint;
mod registry;

pub use registry::{SessionLimit, SessionLimits, SessionRegistry, session_purge_worker};
