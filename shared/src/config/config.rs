use std::fs;
use tracing::{debug, error, info};

use crate::types::server_config::{AppConfig, ConfigError, LimiterRule};

pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    info!("Loading configuration from: {}", path);

    let contents = fs::read_to_string(path)?;
    debug!("Processing file: {}", path);

    if contents.trim().is_empty() {
        error!("Configuration file is empty");
        return Err(ConfigError::InvalidConfig("empty file".into()));
    }

    let config: AppConfig = toml::from_str(&contents)?;

    info!("Configuration loaded successfully");
    debug!("Config: {:?}", config);

    validate_config(&config)?;

    info!("Config validated");

    Ok(config)
}

pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    if config.server.bind.is_empty() {
        return Err(ConfigError::InvalidConfig("bind cannot be empty".into()));
    }

    if config.server.max_connections == 0 {
        return Err(ConfigError::InvalidConfig(
            "max_connections must be greater than 0".into(),
        ));
    }

    if config.auth.access_ttl_secs == 0
        || config.auth.refresh_ttl_secs == 0
        || config.auth.csrf_ttl_secs == 0
    {
        return Err(ConfigError::InvalidConfig(
            "all token TTLs must be greater than 0".into(),
        ));
    }

    // Sessions expire with the refresh TTL, and a session must outlive or
    // equal every token issued under it.  Enforced here once so issuance
    // never has to re-check it.
    if config.auth.access_ttl_secs > config.auth.refresh_ttl_secs {
        return Err(ConfigError::InvalidConfig(
            "access_ttl_secs must not exceed refresh_ttl_secs".into(),
        ));
    }
    if config.auth.csrf_ttl_secs > config.auth.refresh_ttl_secs {
        return Err(ConfigError::InvalidConfig(
            "csrf_ttl_secs must not exceed refresh_ttl_secs".into(),
        ));
    }

    // Signing secret must be resolvable (env var or config field) and long
    // enough.  Rejected at load so a bad deployment fails before the first
    // login rather than at it.
    match config.auth.resolved_jwt_secret() {
        None => {
            return Err(ConfigError::InvalidConfig(
                "jwt_secret must be set via the JWT_SECRET env var or auth.jwt_secret config field"
                    .into(),
            ));
        }
        Some(secret) if secret.len() < 32 => {
            return Err(ConfigError::InvalidConfig(
                "jwt_secret must be at least 32 characters long".into(),
            ));
        }
        _ => {}
    }

    if config.security.store_timeout_ms == 0 {
        return Err(ConfigError::InvalidConfig(
            "store_timeout_ms must be greater than 0".into(),
        ));
    }

    for (name, rule) in limiter_rules(config) {
        if rule.limit == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "rate_limit.{} limit must be greater than 0",
                name
            )));
        }
        if rule.window_secs == 0 {
            return Err(ConfigError::InvalidConfig(format!(
                "rate_limit.{} window_secs must be greater than 0",
                name
            )));
        }
        if rule.block_secs == Some(0) {
            return Err(ConfigError::InvalidConfig(format!(
                "rate_limit.{} block_secs must be greater than 0 when set",
                name
            )));
        }
    }

    if config.rate_limit.burst_threshold == 0 || config.rate_limit.burst_window_secs == 0 {
        return Err(ConfigError::InvalidConfig(
            "burst_threshold and burst_window_secs must be greater than 0".into(),
        ));
    }

    Ok(())
}

fn limiter_rules(config: &AppConfig) -> [(&'static str, &LimiterRule); 6] {
    let rl = &config.rate_limit;
    [
        ("global", &rl.global),
        ("per_ip", &rl.per_ip),
        ("per_user", &rl.per_user),
        ("per_endpoint", &rl.per_endpoint),
        ("auth", &rl.auth),
        ("upload", &rl.upload),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::server_config::IpBinding;

    fn base_toml() -> String {
        r#"
            [server]
            bind = "127.0.0.1"
            port = 8080

            [auth]
            access_ttl_secs = 900
            refresh_ttl_secs = 1209600
            csrf_ttl_secs = 43200
            jwt_secret = "0123456789abcdef0123456789abcdef"

            [security]
            ip_binding = "log_only"
        "#
        .to_string()
    }

    #[test]
    fn minimal_config_parses_and_validates() {
        let config: AppConfig = toml::from_str(&base_toml()).unwrap();
        validate_config(&config).unwrap();
        assert_eq!(config.server.addr(), "127.0.0.1:8080");
        assert_eq!(config.security.ip_binding, IpBinding::LogOnly);
        // Defaults fill in the rate-limit classes.
        assert_eq!(config.rate_limit.auth.limit, 5);
        assert!(config.rate_limit.auth.block_secs.is_some());
    }

    #[test]
    fn short_secret_is_rejected() {
        let toml_str = base_toml().replace("0123456789abcdef0123456789abcdef", "tooshort");
        let config: AppConfig = toml::from_str(&toml_str).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn access_ttl_longer_than_refresh_is_rejected() {
        let toml_str = base_toml().replace("access_ttl_secs = 900", "access_ttl_secs = 9999999999");
        let config: AppConfig = toml::from_str(&toml_str).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn zero_limit_rule_is_rejected() {
        let mut toml_str = base_toml();
        toml_str.push_str(
            r#"
            [rate_limit.per_ip]
            limit = 0
            window_secs = 60
        "#,
        );
        let config: AppConfig = toml::from_str(&toml_str).unwrap();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn max_token_ttl_is_the_refresh_ttl_here() {
        let config: AppConfig = toml::from_str(&base_toml()).unwrap();
        assert_eq!(config.auth.max_token_ttl_secs(), 1_209_600);
    }
}
