//! Security components for the request pipeline
//!
//! Tokens, sessions, rate limiting, RBAC, the failure-policy table, and the
//! audit sink.  Composed in order by `pipeline::Pipeline`.

pub mod audit;
pub mod error;
pub mod policy;
pub mod rate_limiter;
pub mod rbac;
pub mod session;
pub mod token;

// Re-export the main types for convenience
pub use audit::{AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
pub use error::SecurityError;
pub use policy::{Criticality, FailureAction, PolicyTable};
pub use rate_limiter::{LimiterClass, RateDecision, RateLimiter};
pub use rbac::{Permission, Role, RoleError, RoleRegistry};
pub use session::{Session, SessionManager};
pub use token::{IssuedToken, TokenService};

use std::time::{SystemTime, UNIX_EPOCH};

/// Current Unix timestamp in seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Current Unix timestamp in milliseconds.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
