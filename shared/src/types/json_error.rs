use serde::{Deserialize, Serialize};

/// Standard error response structure.
///
/// Every rejection the pipeline produces uses this envelope with a coarse
/// code + message.  The fine-grained failure cause (expired vs revoked vs
/// wrong kind, …) is deliberately never echoed here — it lives only in the
/// structured logs and audit events, so a caller cannot use the response as
/// an oracle.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub status: String,
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            status: "error".to_string(),
            code: code.to_string(),
            message: message.to_string(),
        }
    }

    /// 429 envelope.
    pub fn rate_limited() -> Self {
        Self::new("RATE_LIMITED", "Too many requests")
    }

    /// 401 envelope — identical wording for every authentication failure.
    pub fn unauthorized() -> Self {
        Self::new("UNAUTHORIZED", "Authentication required")
    }

    /// 403 envelope.
    pub fn forbidden() -> Self {
        Self::new("FORBIDDEN", "Insufficient privileges")
    }

    /// 503 envelope for a fail-closed store outage.
    pub fn unavailable() -> Self {
        Self::new("UNAVAILABLE", "Service temporarily unavailable")
    }
}
