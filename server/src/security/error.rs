use hyper::StatusCode;
use thiserror::Error;

use crate::store::StoreError;
use shared::types::ErrorResponse;

/// The full failure taxonomy of the pipeline.
///
/// Callers outside the process never see these variants: the HTTP surface
/// collapses them to a coarse status + generic message via
/// [`SecurityError::public_body`], so an attacker cannot use the response
/// to distinguish "expired" from "revoked" from "wrong kind".  The precise
/// variant is preserved in logs and audit events.
#[derive(Error, Debug)]
pub enum SecurityError {
    #[error("rate limit exceeded (limit {limit}, retry after {retry_after_secs}s)")]
    RateLimited {
        limit: u32,
        remaining: u32,
        reset_secs: u64,
        retry_after_secs: u64,
    },

    #[error("invalid token")]
    TokenInvalid,

    #[error("token expired")]
    TokenExpired,

    #[error("token revoked")]
    TokenRevoked,

    #[error("session not found")]
    SessionNotFound,

    #[error("session user mismatch")]
    SessionMismatch,

    #[error("session inactive")]
    SessionInactive,

    #[error("permission denied")]
    PermissionDenied,

    #[error("security store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("internal security error: {0}")]
    Internal(String),
}

impl SecurityError {
    /// The HTTP-visible error class.  Fixed by the stage that failed:
    /// 429 for rate limiting, 401 for token/session failures, 403 for
    /// permission failures.
    pub fn status(&self) -> StatusCode {
        match self {
            SecurityError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            SecurityError::TokenInvalid
            | SecurityError::TokenExpired
            | SecurityError::TokenRevoked
            | SecurityError::SessionNotFound
            | SecurityError::SessionMismatch
            | SecurityError::SessionInactive => StatusCode::UNAUTHORIZED,
            SecurityError::PermissionDenied => StatusCode::FORBIDDEN,
            SecurityError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            SecurityError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The generic envelope sent to the caller.  Deliberately lossy.
    pub fn public_body(&self) -> ErrorResponse {
        match self {
            SecurityError::RateLimited { .. } => ErrorResponse::rate_limited(),
            SecurityError::PermissionDenied => ErrorResponse::forbidden(),
            SecurityError::StoreUnavailable(_) => ErrorResponse::unavailable(),
            SecurityError::Internal(_) => {
                ErrorResponse::new("INTERNAL_ERROR", "An internal error occurred")
            }
            _ => ErrorResponse::unauthorized(),
        }
    }

    pub fn from_store(e: StoreError) -> Self {
        SecurityError::StoreUnavailable(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_failures_collapse_to_one_public_shape() {
        let bodies: Vec<_> = [
            SecurityError::TokenInvalid,
            SecurityError::TokenExpired,
            SecurityError::TokenRevoked,
            SecurityError::SessionNotFound,
            SecurityError::SessionMismatch,
            SecurityError::SessionInactive,
        ]
        .iter()
        .map(|e| (e.status(), e.public_body()))
        .collect();

        for (status, body) in &bodies {
            assert_eq!(*status, StatusCode::UNAUTHORIZED);
            assert_eq!(body.code, "UNAUTHORIZED");
            assert_eq!(body.message, bodies[0].1.message);
        }
    }

    #[test]
    fn stage_status_classes() {
        assert_eq!(
            SecurityError::RateLimited {
                limit: 1,
                remaining: 0,
                reset_secs: 1,
                retry_after_secs: 1
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            SecurityError::PermissionDenied.status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            SecurityError::StoreUnavailable("down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }
}
