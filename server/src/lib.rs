pub mod directory;
pub mod handlers;
pub mod pipeline;
pub mod security;
pub mod store;
pub mod tower_middle;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use shared::types::AppConfig;

use crate::directory::UserDirectory;
use crate::pipeline::Pipeline;
use crate::security::{
    AuditSink, PolicyTable, RateLimiter, RoleRegistry, SessionManager, TokenService,
};
use crate::store::SecurityStore;

/// Everything the handlers and middleware share.
///
/// Cheap to clone: services hold `Arc`s internally and carry no
/// per-request state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn SecurityStore>,
    pub tokens: TokenService,
    pub sessions: SessionManager,
    pub limiter: RateLimiter,
    pub roles: Arc<RoleRegistry>,
    pub pipeline: Arc<Pipeline>,
    pub directory: Arc<dyn UserDirectory>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        store: Arc<dyn SecurityStore>,
        directory: Arc<dyn UserDirectory>,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self> {
        let secret = config
            .auth
            .resolved_jwt_secret()
            .context("jwt secret is not configured")?;
        let store_timeout = Duration::from_millis(config.security.store_timeout_ms);
        let policy = PolicyTable::new(&config.security);

        let tokens = TokenService::new(
            &secret,
            config.auth.clone(),
            policy,
            Arc::clone(&store),
            store_timeout,
        );
        let sessions = SessionManager::new(
            Arc::clone(&store),
            config.auth.refresh_ttl_secs,
            config.security.ip_binding,
            store_timeout,
        );
        let limiter = RateLimiter::new(
            Arc::clone(&store),
            config.rate_limit.clone(),
            policy,
            store_timeout,
        );
        let roles = Arc::new(RoleRegistry::with_system_roles(
            Arc::clone(&store),
            store_timeout,
        ));

        let pipeline = Arc::new(Pipeline::new(
            limiter.clone(),
            tokens.clone(),
            sessions.clone(),
            Arc::clone(&roles),
            audit,
        ));

        Ok(Self {
            config: Arc::new(config),
            store,
            tokens,
            sessions,
            limiter,
            roles,
            pipeline,
            directory,
        })
    }
}
