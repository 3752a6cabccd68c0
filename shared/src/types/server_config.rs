use serde::Deserialize;
use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
}

// ---------------------------------------------------------------------------
// Config structs
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    /// Access-token lifetime.  Deliberately short; the session and refresh
    /// token carry the long-lived login state.
    #[serde(default = "default_access_ttl")]
    pub access_ttl_secs: u64,

    /// Refresh-token lifetime.  Also the session TTL — a session must
    /// outlive (or equal) every token issued under it, which the loader
    /// enforces against the other two TTLs.
    #[serde(default = "default_refresh_ttl")]
    pub refresh_ttl_secs: u64,

    /// CSRF-token lifetime, independent of the other two.
    #[serde(default = "default_csrf_ttl")]
    pub csrf_ttl_secs: u64,

    /// HMAC key used to sign and verify credentials.
    ///
    /// Prefer loading this via the `JWT_SECRET` environment variable.  This
    /// config field is the fallback for deployments that cannot inject env
    /// vars at runtime (e.g. certain container setups).
    ///
    /// **Minimum length:** 32 characters.
    /// **Hot-reload safe:** NO — rotating the secret invalidates every
    /// outstanding credential, so it is read once at startup.
    pub jwt_secret: Option<String>,
}

/// What to do when the IP bound to a session differs from the request IP.
///
/// The original product never settled whether IP drift is an attack signal
/// or mobile/NAT roaming, so it is an explicit switch instead of a guess.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum IpBinding {
    /// Hard-fail the session check on any drift.
    Enforce,
    /// Log + audit the drift, admit the request.
    LogOnly,
    /// Ignore the bound IP entirely.
    Off,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SecurityConfig {
    #[serde(default = "default_ip_binding")]
    pub ip_binding: IpBinding,

    /// The single fail-open/fail-closed switch.  When true, a store outage
    /// during the revocation check is tolerated (log + allow) for read-only
    /// requests.  Privileged operations always fail closed regardless.
    #[serde(default)]
    pub fail_open_reads: bool,

    /// Upper bound on any single store call made by the pipeline.
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
}

/// One limiter class: `limit` requests per trailing `window_secs`, with an
/// optional penalty block installed when the limit is breached.
#[derive(Debug, Deserialize, Clone)]
pub struct LimiterRule {
    pub limit: u32,
    pub window_secs: u64,
    #[serde(default)]
    pub block_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_global_rule")]
    pub global: LimiterRule,
    #[serde(default = "default_per_ip_rule")]
    pub per_ip: LimiterRule,
    #[serde(default = "default_per_user_rule")]
    pub per_user: LimiterRule,
    #[serde(default = "default_per_endpoint_rule")]
    pub per_endpoint: LimiterRule,
    /// Login/refresh endpoints: tight limit, long block — brute-force
    /// mitigation.
    #[serde(default = "default_auth_rule")]
    pub auth: LimiterRule,
    #[serde(default = "default_upload_rule")]
    pub upload: LimiterRule,

    /// Burst circuit breaker: more than `burst_threshold` requests inside
    /// `burst_window_secs` installs a `burst_block_secs` block directly,
    /// independent of the per-class windows.
    #[serde(default = "default_burst_threshold")]
    pub burst_threshold: u32,
    #[serde(default = "default_burst_window")]
    pub burst_window_secs: u64,
    #[serde(default = "default_burst_block")]
    pub burst_block_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global: default_global_rule(),
            per_ip: default_per_ip_rule(),
            per_user: default_per_user_rule(),
            per_endpoint: default_per_endpoint_rule(),
            auth: default_auth_rule(),
            upload: default_upload_rule(),
            burst_threshold: default_burst_threshold(),
            burst_window_secs: default_burst_window(),
            burst_block_secs: default_burst_block(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Full bind address, e.g. `"0.0.0.0:8080"`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }
}

impl AuthConfig {
    /// The longest lifetime any credential kind can have.  Revocation
    /// markers use this TTL so a revoked refresh token can never outlive
    /// its marker.
    pub fn max_token_ttl_secs(&self) -> u64 {
        self.access_ttl_secs
            .max(self.refresh_ttl_secs)
            .max(self.csrf_ttl_secs)
    }

    /// Resolve the signing secret with `JWT_SECRET` env-var taking priority
    /// over the config file field.
    ///
    /// Returns `None` when neither source is set (startup treats this as a
    /// hard error).
    pub fn resolved_jwt_secret(&self) -> Option<String> {
        std::env::var("JWT_SECRET")
            .ok()
            .filter(|s| !s.is_empty())
            .or_else(|| self.jwt_secret.clone())
            .filter(|s| !s.is_empty())
    }
}

// ---------------------------------------------------------------------------
// Serde defaults
// ---------------------------------------------------------------------------

pub fn default_port() -> u16 {
    8080
}

pub fn default_max_connections() -> usize {
    1000
}

fn default_access_ttl() -> u64 {
    15 * 60
}

fn default_refresh_ttl() -> u64 {
    14 * 24 * 60 * 60
}

fn default_csrf_ttl() -> u64 {
    12 * 60 * 60
}

fn default_ip_binding() -> IpBinding {
    IpBinding::LogOnly
}

fn default_store_timeout_ms() -> u64 {
    500
}

fn default_global_rule() -> LimiterRule {
    LimiterRule {
        limit: 1000,
        window_secs: 60,
        block_secs: None,
    }
}

fn default_per_ip_rule() -> LimiterRule {
    LimiterRule {
        limit: 120,
        window_secs: 60,
        block_secs: Some(5 * 60),
    }
}

fn default_per_user_rule() -> LimiterRule {
    LimiterRule {
        limit: 240,
        window_secs: 60,
        block_secs: None,
    }
}

fn default_per_endpoint_rule() -> LimiterRule {
    LimiterRule {
        limit: 60,
        window_secs: 60,
        block_secs: None,
    }
}

fn default_auth_rule() -> LimiterRule {
    LimiterRule {
        limit: 5,
        window_secs: 5 * 60,
        block_secs: Some(30 * 60),
    }
}

fn default_upload_rule() -> LimiterRule {
    LimiterRule {
        limit: 10,
        window_secs: 60,
        block_secs: Some(10 * 60),
    }
}

fn default_burst_threshold() -> u32 {
    25
}

fn default_burst_window() -> u64 {
    10
}

fn default_burst_block() -> u64 {
    60 * 60
}
