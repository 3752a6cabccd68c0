use serde::{Deserialize, Serialize};
use std::fmt;

/// Current claim schema version.  Bumped whenever a field is added or its
/// meaning changes; `validate` rejects tokens carrying any other version so
/// old credentials die at the boundary instead of being half-understood.
pub const CLAIMS_VERSION: u8 = 1;

/// The three credential kinds the server issues.
///
/// The kind is baked into the signed payload and checked on every
/// validation — a CSRF token must never pass as an access token no matter
/// how valid its signature is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
    Csrf,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Access => write!(f, "access"),
            TokenKind::Refresh => write!(f, "refresh"),
            TokenKind::Csrf => write!(f, "csrf"),
        }
    }
}

/// Claims embedded in every credential issued by the server.
///
/// Closed schema: every field is typed and the payload carries a version
/// number, so a token of one kind can never structurally smuggle the fields
/// of another.
///
/// # Fast path (GET requests)
/// Decode and verify the HMAC signature — zero store reads.  The claims
/// carry enough to identify and authorise the user.
///
/// # Secure path (POST / PUT / PATCH / DELETE)
/// Decode, then:
///   1. Check the revocation marker for `jti`.
///   2. Look up `session_id` in the session store to confirm the login
///      hasn't been revoked (logout / ban / password change).
///   3. Compare the session's bound IP against the current request IP
///      (behaviour configurable — see `IpBinding`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Claim schema version — must equal [`CLAIMS_VERSION`].
    pub ver: u8,

    /// Numeric user ID the credential was issued to.
    pub user_id: i64,

    /// Email captured at issue time; informational, never used for lookups.
    pub email: String,

    /// Role names frozen at issue time.  A promoted/demoted user must
    /// re-authenticate for this set to change.
    pub roles: Vec<String>,

    /// Which of the three credential kinds this is.
    #[serde(rename = "typ")]
    pub kind: TokenKind,

    /// Opaque session identifier.  This is the revocation handle: an
    /// inactive session invalidates the token even before `exp`.
    pub session_id: String,

    /// Unique token ID (collision-resistant random).  Revocation markers
    /// are keyed by this.
    pub jti: String,

    /// Issued-at (Unix timestamp, seconds).
    pub iat: u64,

    /// Not-before (Unix timestamp, seconds).
    pub nbf: u64,

    /// Expiry (Unix timestamp, seconds).
    pub exp: u64,

    /// Client IP captured at issue time, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_ip: Option<String>,

    /// User-agent captured at issue time, if known.  Compared warn-only on
    /// later requests — UA strings legitimately change on browser update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bound_user_agent: Option<String>,
}

/// What a successful pipeline admission hands to the business layer.
///
/// Attached to the request extensions by the security middleware; the only
/// interface downstream handlers have into the pipeline.
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub user_id: i64,
    pub roles: Vec<String>,
    pub session_id: String,
}
