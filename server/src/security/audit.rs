use serde::Serialize;
use tracing::{info, warn};

/// Pipeline decision outcome for the audit trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOutcome {
    Admitted,
    Rejected,
}

/// One event per pipeline decision.
///
/// This is the collaborator surface the (out-of-scope) GDPR/observability
/// tooling consumes.  The pipeline emits it best-effort; nothing here is
/// required for admission correctness.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// What was attempted, e.g. `"recipe:create"` or `"auth:login"`.
    pub action: String,
    /// Authenticated user id, when one was established before the decision.
    pub subject: Option<i64>,
    /// Resource the request targeted.
    pub resource: String,
    pub outcome: AuditOutcome,
    /// Internal failure detail (taxonomy variant name); never sent to the
    /// caller.
    pub detail: Option<String>,
    /// Coarse risk marker: `"low"` for admissions, `"medium"`/`"high"` for
    /// rejections depending on what tripped.
    pub risk: &'static str,
}

pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured log lines.
#[derive(Debug, Clone, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, event: AuditEvent) {
        match event.outcome {
            AuditOutcome::Admitted => info!(
                action = %event.action,
                subject = ?event.subject,
                resource = %event.resource,
                risk = event.risk,
                "pipeline admitted request"
            ),
            AuditOutcome::Rejected => warn!(
                action = %event.action,
                subject = ?event.subject,
                resource = %event.resource,
                detail = ?event.detail,
                risk = event.risk,
                "pipeline rejected request"
            ),
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Captures events for assertions.
    #[derive(Debug, Default)]
    pub struct CapturingSink {
        pub events: Mutex<Vec<AuditEvent>>,
    }

    impl AuditSink for CapturingSink {
        fn record(&self, event: AuditEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
