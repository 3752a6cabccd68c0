use std::sync::Arc;
use std::time::Duration;

use tracing::warn;

use shared::types::{LimiterRule, RateLimitConfig};

use super::error::SecurityError;
use super::now_ms;
use super::policy::{FailureAction, PolicyTable};
use crate::store::{SecurityStore, keys, with_timeout};

/// The independent limiter classes a request can be subject to.
///
/// Distinct classes are separate limiters with separate keys and rules; a
/// request checked against several is rejected if *any* of them rejects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimiterClass {
    Global,
    PerIp,
    PerUser,
    PerEndpoint,
    /// Login/refresh: tight limit, long block — brute-force mitigation.
    Auth,
    Upload,
}

impl LimiterClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            LimiterClass::Global => "global",
            LimiterClass::PerIp => "per_ip",
            LimiterClass::PerUser => "per_user",
            LimiterClass::PerEndpoint => "per_endpoint",
            LimiterClass::Auth => "auth",
            LimiterClass::Upload => "upload",
        }
    }

    fn rule<'a>(&self, config: &'a RateLimitConfig) -> &'a LimiterRule {
        match self {
            LimiterClass::Global => &config.global,
            LimiterClass::PerIp => &config.per_ip,
            LimiterClass::PerUser => &config.per_user,
            LimiterClass::PerEndpoint => &config.per_endpoint,
            LimiterClass::Auth => &config.auth,
            LimiterClass::Upload => &config.upload,
        }
    }
}

/// Outcome of an admission check, carrying what the rate-limit response
/// headers need.  `remaining` is computed from the pre-insert count, so
/// clients see accurate headroom.
#[derive(Debug, Clone, Copy)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_secs: u64,
    pub retry_after_secs: u64,
}

impl RateDecision {
    pub fn into_error(self) -> SecurityError {
        SecurityError::RateLimited {
            limit: self.limit,
            remaining: self.remaining,
            reset_secs: self.reset_secs,
            retry_after_secs: self.retry_after_secs,
        }
    }
}

/// Sliding-window rate limiter with a block list and a burst circuit
/// breaker, all state in the shared store.
///
/// The per-key window update is one atomic store batch (prune, count,
/// insert, refresh expiry), so two concurrent requests can never both
/// observe the same pre-increment count when only one slot remains.
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn SecurityStore>,
    config: RateLimitConfig,
    policy: PolicyTable,
    store_timeout: Duration,
}

impl RateLimiter {
    pub fn new(
        store: Arc<dyn SecurityStore>,
        config: RateLimitConfig,
        policy: PolicyTable,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            config,
            policy,
            store_timeout,
        }
    }

    /// Check one limiter class for one key at the current time.
    pub async fn check(&self, class: LimiterClass, key: &str) -> Result<RateDecision, SecurityError> {
        self.check_at(class, key, now_ms()).await
    }

    /// Check every applicable class; the request is admitted only if all of
    /// them admit it.  `burst_key` (normally the client IP) additionally
    /// feeds the burst circuit breaker exactly once per request.
    ///
    /// Returns the first denial, or — when everything admits — the
    /// decision with the least headroom, which is what the response
    /// headers report.
    pub async fn admit(
        &self,
        burst_key: &str,
        checks: &[(LimiterClass, String)],
    ) -> Result<RateDecision, SecurityError> {
        if let Some(denied) = self.burst_guard(burst_key, now_ms()).await? {
            return Ok(denied);
        }

        let mut tightest: Option<RateDecision> = None;
        for (class, key) in checks {
            let decision = self.check(*class, key).await?;
            if !decision.allowed {
                return Ok(decision);
            }
            if tightest.map_or(true, |t| decision.remaining < t.remaining) {
                tightest = Some(decision);
            }
        }

        Ok(tightest.unwrap_or(RateDecision {
            allowed: true,
            limit: 0,
            remaining: 0,
            reset_secs: 0,
            retry_after_secs: 0,
        }))
    }

    pub(crate) async fn check_at(
        &self,
        class: LimiterClass,
        key: &str,
        now_ms: u64,
    ) -> Result<RateDecision, SecurityError> {
        let rule = class.rule(&self.config);

        // Block entry short-circuits the window entirely — this is also
        // what protects the window structure from unbounded growth under
        // sustained attack.
        if let Some(until_ms) = self.blocked_until(class.as_str(), key).await? {
            if until_ms > now_ms {
                let retry = (until_ms - now_ms).div_ceil(1000);
                return Ok(denied(rule, retry));
            }
        }

        let window_ms = rule.window_secs * 1000;
        let count_before = match with_timeout(
            self.store_timeout,
            self.store
                .window_slide(&keys::rate_window(class.as_str(), key), now_ms, window_ms),
        )
        .await
        {
            Ok(count) => count,
            Err(e) => {
                return match self.policy.on_rate_outage(class) {
                    FailureAction::Open => {
                        // A store hiccup must not blanket-deny the system.
                        warn!(class = class.as_str(), key, "rate store unavailable, admitting: {}", e);
                        Ok(RateDecision {
                            allowed: true,
                            limit: rule.limit,
                            remaining: 0,
                            reset_secs: rule.window_secs,
                            retry_after_secs: 0,
                        })
                    }
                    FailureAction::Closed => Err(SecurityError::from_store(e)),
                };
            }
        };

        let allowed = count_before < u64::from(rule.limit);
        let remaining = u32::try_from(u64::from(rule.limit).saturating_sub(count_before))
            .unwrap_or(0);

        if allowed {
            return Ok(RateDecision {
                allowed: true,
                limit: rule.limit,
                remaining,
                reset_secs: rule.window_secs,
                retry_after_secs: 0,
            });
        }

        // The violating request escalates to a timed block, written in the
        // same admission call that rejects it.
        let retry = if let Some(block_secs) = rule.block_secs {
            self.install_block(class.as_str(), key, now_ms, block_secs)
                .await;
            block_secs
        } else {
            rule.window_secs
        };

        warn!(class = class.as_str(), key, limit = rule.limit, "rate limit exceeded");
        Ok(denied(rule, retry))
    }

    /// Secondary very-short-window counter: detects burst/bot behaviour
    /// independently of the primary windows and installs a long block on
    /// breach.  A fast-path denial-of-service circuit breaker layered on
    /// top of the standard limiter, not a replacement for it.
    async fn burst_guard(
        &self,
        key: &str,
        now_ms: u64,
    ) -> Result<Option<RateDecision>, SecurityError> {
        if let Some(until_ms) = self.blocked_until("burst", key).await? {
            if until_ms > now_ms {
                let retry = (until_ms - now_ms).div_ceil(1000);
                return Ok(Some(RateDecision {
                    allowed: false,
                    limit: self.config.burst_threshold,
                    remaining: 0,
                    reset_secs: retry,
                    retry_after_secs: retry,
                }));
            }
        }

        let window_ms = self.config.burst_window_secs * 1000;
        let count_before = match with_timeout(
            self.store_timeout,
            self.store
                .window_slide(&keys::burst_window(key), now_ms, window_ms),
        )
        .await
        {
            Ok(count) => count,
            // The breaker is an extra layer; it always fails open.
            Err(e) => {
                warn!(key, "burst window unavailable: {}", e);
                return Ok(None);
            }
        };

        if count_before >= u64::from(self.config.burst_threshold) {
            warn!(key, count = count_before + 1, "burst detected, installing long block");
            self.install_block("burst", key, now_ms, self.config.burst_block_secs)
                .await;
            return Ok(Some(RateDecision {
                allowed: false,
                limit: self.config.burst_threshold,
                remaining: 0,
                reset_secs: self.config.burst_block_secs,
                retry_after_secs: self.config.burst_block_secs,
            }));
        }

        Ok(None)
    }

    async fn blocked_until(&self, class: &str, key: &str) -> Result<Option<u64>, SecurityError> {
        match with_timeout(
            self.store_timeout,
            self.store.get_value(&keys::block(class, key)),
        )
        .await
        {
            Ok(value) => Ok(value.and_then(|v| v.parse().ok())),
            // An unreadable block list cannot fail the check on its own;
            // the window check that follows still applies.
            Err(e) => {
                warn!(class, key, "block list unavailable: {}", e);
                Ok(None)
            }
        }
    }

    async fn install_block(&self, class: &str, key: &str, now_ms: u64, block_secs: u64) {
        let until_ms = now_ms + block_secs * 1000;
        let write = with_timeout(
            self.store_timeout,
            self.store.put_value(
                &keys::block(class, key),
                &until_ms.to_string(),
                Some(Duration::from_secs(block_secs)),
            ),
        )
        .await;
        if let Err(e) = write {
            warn!(class, key, "failed to install block entry: {}", e);
        }
    }
}

fn denied(rule: &LimiterRule, retry_after_secs: u64) -> RateDecision {
    RateDecision {
        allowed: false,
        limit: rule.limit,
        remaining: 0,
        reset_secs: retry_after_secs,
        retry_after_secs,
    }
}
