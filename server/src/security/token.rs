use std::sync::Arc;
use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, errors::ErrorKind};
use tracing::{debug, warn};
use uuid::Uuid;

use shared::types::{AuthConfig, CLAIMS_VERSION, TokenClaims, TokenKind};

use super::error::SecurityError;
use super::now_secs;
use super::policy::{Criticality, FailureAction, PolicyTable};
use super::session::Session;
use crate::store::{SecurityStore, keys, with_timeout};

/// Who a credential is being issued to.
#[derive(Debug, Clone)]
pub struct TokenSubject<'a> {
    pub user_id: i64,
    pub email: &'a str,
    pub roles: &'a [String],
}

/// A freshly signed credential together with its claims.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    pub claims: TokenClaims,
}

impl IssuedToken {
    /// Seconds until expiry, for `expires_in` response fields.
    pub fn expires_in(&self) -> u64 {
        self.claims.exp.saturating_sub(self.claims.iat)
    }
}

/// Issues, validates, and revokes signed credentials.
///
/// Credentials are immutable once signed; the only mutable aspect is the
/// revocation status, tracked out-of-band in the store by `jti`.
#[derive(Clone)]
pub struct TokenService {
    store: Arc<dyn SecurityStore>,
    encoding: EncodingKey,
    decoding: DecodingKey,
    auth: AuthConfig,
    policy: PolicyTable,
    store_timeout: Duration,
}

impl TokenService {
    pub fn new(
        secret: &str,
        auth: AuthConfig,
        policy: PolicyTable,
        store: Arc<dyn SecurityStore>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            auth,
            policy,
            store_timeout,
        }
    }

    fn ttl_secs(&self, kind: TokenKind) -> u64 {
        match kind {
            TokenKind::Access => self.auth.access_ttl_secs,
            TokenKind::Refresh => self.auth.refresh_ttl_secs,
            TokenKind::Csrf => self.auth.csrf_ttl_secs,
        }
    }

    /// Issue a credential of `kind` bound to an existing session.
    ///
    /// Expiry is the kind's TTL, capped at the session's own expiry: a
    /// credential minted late in a session's life must still die with the
    /// session, not `ttl` seconds after issuance.
    ///
    /// The `jti` is recorded in the per-user index so `revoke_all_for_user`
    /// can enumerate outstanding tokens later.  Failure to record is logged
    /// but does not fail issuance — login must stay available even when the
    /// denylist index is degraded.
    pub async fn issue(
        &self,
        kind: TokenKind,
        subject: &TokenSubject<'_>,
        session: &Session,
        bound_ip: Option<&str>,
        bound_user_agent: Option<&str>,
    ) -> Result<IssuedToken, SecurityError> {
        let now = now_secs();
        let claims = TokenClaims {
            ver: CLAIMS_VERSION,
            user_id: subject.user_id,
            email: subject.email.to_string(),
            roles: subject.roles.to_vec(),
            kind,
            session_id: session.session_id.clone(),
            jti: Uuid::new_v4().to_string(),
            iat: now,
            nbf: now,
            exp: (now + self.ttl_secs(kind)).min(session.expires_at),
            bound_ip: bound_ip.map(str::to_string),
            bound_user_agent: bound_user_agent.map(str::to_string),
        };

        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SecurityError::Internal(format!("token signing failed: {}", e)))?;

        // Index TTL matches the longest possible credential lifetime so the
        // store self-cleans.
        let index_ttl = Duration::from_secs(self.auth.max_token_ttl_secs());
        let index_write = with_timeout(
            self.store_timeout,
            self.store
                .index_add(&keys::user_tokens(subject.user_id), &claims.jti, Some(index_ttl)),
        )
        .await;
        if let Err(e) = index_write {
            warn!(
                user_id = subject.user_id,
                jti = %claims.jti,
                "failed to record token in revocation index: {}",
                e
            );
        }

        debug!(user_id = subject.user_id, %kind, jti = %claims.jti, "issued token");
        Ok(IssuedToken { token, claims })
    }

    /// Validate a raw credential against an expected kind.
    ///
    /// Four checks, in order: signature + algorithm, expiry/not-before,
    /// kind match, revocation marker.  Callers receive the precise variant
    /// for logging, but the HTTP surface collapses all of them to one
    /// generic 401 (see `SecurityError::public_body`).
    pub async fn validate(
        &self,
        raw: &str,
        expected: TokenKind,
        criticality: Criticality,
    ) -> Result<TokenClaims, SecurityError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_nbf = true;
        validation.leeway = 0;

        let decoded = jsonwebtoken::decode::<TokenClaims>(raw, &self.decoding, &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => SecurityError::TokenExpired,
                _ => {
                    debug!("token rejected: {}", e);
                    SecurityError::TokenInvalid
                }
            })?;
        let claims = decoded.claims;

        if claims.ver != CLAIMS_VERSION {
            warn!(ver = claims.ver, "token with unknown claims version");
            return Err(SecurityError::TokenInvalid);
        }

        // Kind confusion is the primary attack this guards against — a CSRF
        // token must never validate as an access token.
        if claims.kind != expected {
            warn!(
                got = %claims.kind,
                expected = %expected,
                user_id = claims.user_id,
                "token kind mismatch"
            );
            return Err(SecurityError::TokenInvalid);
        }

        match with_timeout(self.store_timeout, self.store.get_value(&keys::revoked(&claims.jti)))
            .await
        {
            Ok(Some(_)) => Err(SecurityError::TokenRevoked),
            Ok(None) => Ok(claims),
            Err(e) => match self.policy.on_revocation_outage(criticality) {
                FailureAction::Open => {
                    warn!(jti = %claims.jti, "revocation check unavailable, admitting read: {}", e);
                    Ok(claims)
                }
                FailureAction::Closed => Err(SecurityError::from_store(e)),
            },
        }
    }

    /// Idempotently mark a token dead until its natural expiry would have
    /// passed.  The marker TTL is the *maximum* credential lifetime, so a
    /// revoked refresh token cannot outlive its marker.
    pub async fn revoke(&self, jti: &str) -> Result<(), SecurityError> {
        let ttl = Duration::from_secs(self.auth.max_token_ttl_secs());
        with_timeout(
            self.store_timeout,
            self.store.put_value(&keys::revoked(jti), "1", Some(ttl)),
        )
        .await
        .map_err(SecurityError::from_store)?;
        debug!(%jti, "token revoked");
        Ok(())
    }

    /// Revoke every outstanding token recorded for a user by walking the
    /// per-user index — never by scanning all tokens.  Returns how many
    /// markers were written.
    pub async fn revoke_all_for_user(&self, user_id: i64) -> Result<usize, SecurityError> {
        let index_key = keys::user_tokens(user_id);
        let jtis = with_timeout(self.store_timeout, self.store.index_members(&index_key))
            .await
            .map_err(SecurityError::from_store)?;

        for jti in &jtis {
            self.revoke(jti).await?;
        }

        with_timeout(self.store_timeout, self.store.index_clear(&index_key))
            .await
            .map_err(SecurityError::from_store)?;

        debug!(user_id, revoked = jtis.len(), "revoked all tokens for user");
        Ok(jtis.len())
    }
}
