pub mod claims;
pub mod json_error;
pub mod server_config;

pub use self::claims::{AuthContext, CLAIMS_VERSION, TokenClaims, TokenKind};
pub use self::json_error::ErrorResponse;
pub use self::server_config::{
    AppConfig, AuthConfig, ConfigError, IpBinding, LimiterRule, RateLimitConfig, SecurityConfig,
    ServerConfig,
};
