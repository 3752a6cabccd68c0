use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use shared::types::IpBinding;

use super::error::SecurityError;
use super::now_secs;
use crate::store::{SecurityStore, keys, with_timeout};

/// Server-side login record.
///
/// The single authority for "is this login still valid": a non-expired,
/// non-revoked access token whose session is inactive must be rejected.
/// Tokens are necessary but not sufficient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: i64,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: u64,
    pub expires_at: u64,
    pub active: bool,
}

/// Creates and validates session records in the shared store.
///
/// Sessions expire with the refresh-token TTL, and token issuance caps
/// every credential's expiry at its session's, so a session always
/// outlives or equals its tokens.
#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn SecurityStore>,
    session_ttl: Duration,
    ip_binding: IpBinding,
    store_timeout: Duration,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn SecurityStore>,
        session_ttl_secs: u64,
        ip_binding: IpBinding,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            session_ttl: Duration::from_secs(session_ttl_secs),
            ip_binding,
            store_timeout,
        }
    }

    /// Create a session for a fresh login.
    pub async fn create(
        &self,
        user_id: i64,
        ip: Option<&str>,
        user_agent: Option<&str>,
    ) -> Result<Session, SecurityError> {
        let now = now_secs();
        let session = Session {
            session_id: Uuid::new_v4().to_string(),
            user_id,
            ip: ip.map(str::to_string),
            user_agent: user_agent.map(str::to_string),
            created_at: now,
            expires_at: now + self.session_ttl.as_secs(),
            active: true,
        };
        self.write(&session).await?;
        debug!(user_id, session_id = %session.session_id, "session created");
        Ok(session)
    }

    /// Validate that a session exists, is active, belongs to the claimed
    /// user, and (depending on `IpBinding`) is being used from its bound IP.
    ///
    /// A user mismatch is a forgery signal, not a transient error: the
    /// token claimed a session that belongs to someone else.
    pub async fn validate(
        &self,
        session_id: &str,
        user_id: i64,
        ip: Option<&str>,
    ) -> Result<Session, SecurityError> {
        let session = self
            .get(session_id)
            .await?
            .ok_or(SecurityError::SessionNotFound)?;

        if session.expires_at <= now_secs() {
            // TTL should have removed it; treat a stale record as absent.
            return Err(SecurityError::SessionNotFound);
        }

        if session.user_id != user_id {
            warn!(
                session_id,
                claimed = user_id,
                actual = session.user_id,
                "session user mismatch — possible token forgery"
            );
            return Err(SecurityError::SessionMismatch);
        }

        if !session.active {
            return Err(SecurityError::SessionInactive);
        }

        if let (Some(bound), Some(current)) = (session.ip.as_deref(), ip) {
            if bound != current {
                match self.ip_binding {
                    IpBinding::Enforce => {
                        warn!(session_id, bound, current, "session IP drift — rejecting");
                        return Err(SecurityError::SessionMismatch);
                    }
                    IpBinding::LogOnly => {
                        // Mobile/NAT roaming is legitimate; surface to audit
                        // without blocking.
                        warn!(session_id, bound, current, "session IP drift");
                    }
                    IpBinding::Off => {}
                }
            }
        }

        Ok(session)
    }

    pub async fn get(&self, session_id: &str) -> Result<Option<Session>, SecurityError> {
        let raw = with_timeout(
            self.store_timeout,
            self.store.get_value(&keys::session(session_id)),
        )
        .await
        .map_err(SecurityError::from_store)?;

        match raw {
            Some(json) => match serde_json::from_str(&json) {
                Ok(session) => Ok(Some(session)),
                Err(e) => {
                    warn!(session_id, "corrupt session record: {}", e);
                    Ok(None)
                }
            },
            None => Ok(None),
        }
    }

    /// Mark a session inactive.  The record is kept until its natural TTL
    /// so "logged out" is observable as `SessionInactive` rather than
    /// indistinguishable from "never existed".
    ///
    /// This alone is NOT a complete logout: outstanding tokens must be
    /// revoked in the same logical unit (see `handlers::http::auth`).
    pub async fn deactivate(&self, session_id: &str) -> Result<(), SecurityError> {
        let Some(mut session) = self.get(session_id).await? else {
            return Ok(());
        };
        session.active = false;

        let remaining = session.expires_at.saturating_sub(now_secs());
        let mut ttl = Duration::from_secs(remaining);
        if remaining == 0 {
            ttl = Duration::from_secs(1);
        }
        self.write_with_ttl(&session, ttl).await?;
        debug!(session_id, "session deactivated");
        Ok(())
    }

    async fn write(&self, session: &Session) -> Result<(), SecurityError> {
        self.write_with_ttl(session, self.session_ttl).await
    }

    async fn write_with_ttl(&self, session: &Session, ttl: Duration) -> Result<(), SecurityError> {
        let json = serde_json::to_string(session)
            .map_err(|e| SecurityError::Internal(format!("session encode failed: {}", e)))?;
        with_timeout(
            self.store_timeout,
            self.store
                .put_value(&keys::session(&session.session_id), &json, Some(ttl)),
        )
        .await
        .map_err(SecurityError::from_store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager(ip_binding: IpBinding) -> SessionManager {
        SessionManager::new(
            Arc::new(MemoryStore::new()),
            3600,
            ip_binding,
            Duration::from_millis(200),
        )
    }

    #[tokio::test]
    async fn create_then_validate_roundtrips() {
        let mgr = manager(IpBinding::LogOnly);
        let session = mgr
            .create(42, Some("203.0.113.9"), Some("test-agent"))
            .await
            .unwrap();

        let validated = mgr
            .validate(&session.session_id, 42, Some("203.0.113.9"))
            .await
            .unwrap();
        assert_eq!(validated.user_id, 42);
        assert!(validated.active);
        assert!(validated.expires_at > validated.created_at);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let mgr = manager(IpBinding::LogOnly);
        let err = mgr.validate("no-such-session", 42, None).await.unwrap_err();
        assert!(matches!(err, SecurityError::SessionNotFound));
    }

    #[tokio::test]
    async fn user_mismatch_rejects_even_a_perfectly_valid_session() {
        let mgr = manager(IpBinding::LogOnly);
        let session = mgr.create(42, None, None).await.unwrap();

        let err = mgr
            .validate(&session.session_id, 99, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::SessionMismatch));
    }

    #[tokio::test]
    async fn deactivated_session_reads_as_inactive_not_missing() {
        let mgr = manager(IpBinding::LogOnly);
        let session = mgr.create(42, None, None).await.unwrap();

        mgr.deactivate(&session.session_id).await.unwrap();
        let err = mgr
            .validate(&session.session_id, 42, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::SessionInactive));
    }

    #[tokio::test]
    async fn deactivate_is_idempotent_and_tolerates_absence() {
        let mgr = manager(IpBinding::LogOnly);
        mgr.deactivate("never-existed").await.unwrap();

        let session = mgr.create(42, None, None).await.unwrap();
        mgr.deactivate(&session.session_id).await.unwrap();
        mgr.deactivate(&session.session_id).await.unwrap();
    }

    #[tokio::test]
    async fn ip_drift_behaviour_follows_the_binding_mode() {
        // Enforce: hard failure.
        let mgr = manager(IpBinding::Enforce);
        let session = mgr.create(42, Some("203.0.113.9"), None).await.unwrap();
        let err = mgr
            .validate(&session.session_id, 42, Some("198.51.100.7"))
            .await
            .unwrap_err();
        assert!(matches!(err, SecurityError::SessionMismatch));

        // LogOnly: admitted.
        let mgr = manager(IpBinding::LogOnly);
        let session = mgr.create(42, Some("203.0.113.9"), None).await.unwrap();
        mgr.validate(&session.session_id, 42, Some("198.51.100.7"))
            .await
            .unwrap();

        // Off: admitted.
        let mgr = manager(IpBinding::Off);
        let session = mgr.create(42, Some("203.0.113.9"), None).await.unwrap();
        mgr.validate(&session.session_id, 42, Some("198.51.100.7"))
            .await
            .unwrap();
    }
}
