//! The request-admission state machine.
//!
//! `RateCheck → TokenValidate → SessionValidate → PermissionCheck`,
//! strictly in order: a stage runs only if the previous one passed, and
//! the first failure fixes the response class (429, 401, 401, 403) and
//! aborts the rest.  Later stages never execute on a request that failed
//! an earlier one — a skipped stage provides no guarantee, so running it
//! "anyway" would only manufacture false confidence.

use std::sync::Arc;

use hyper::Method;
use tracing::debug;

use shared::types::{AuthContext, TokenKind};

use crate::security::{
    AuditEvent, AuditOutcome, AuditSink, Criticality, LimiterClass, RateDecision, RateLimiter,
    RoleRegistry, SecurityError, SessionManager, TokenService,
};

/// What the middleware extracted from the raw request before admission.
#[derive(Debug, Clone)]
pub struct RequestMeta {
    pub method: Method,
    pub path: String,
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub bearer: Option<String>,
    pub csrf: Option<String>,
}

/// Per-route admission requirements, looked up by the middleware before
/// the pipeline runs.
#[derive(Debug, Clone)]
pub struct RouteGuard {
    /// RBAC resource this route touches, e.g. `"recipe"`.
    pub resource: String,
    /// RBAC action, e.g. `"create"`.
    pub action: String,
    /// Extra limiter classes beyond the always-on global + per-IP pair.
    pub classes: Vec<LimiterClass>,
    /// Routes that legitimately run without a CSRF token (e.g. the login
    /// form itself, token-refresh).
    pub csrf_exempt: bool,
}

impl RouteGuard {
    pub fn new(resource: &str, action: &str) -> Self {
        Self {
            resource: resource.to_string(),
            action: action.to_string(),
            classes: Vec::new(),
            csrf_exempt: false,
        }
    }

    pub fn with_classes(mut self, classes: &[LimiterClass]) -> Self {
        self.classes = classes.to_vec();
        self
    }

    pub fn csrf_exempt(mut self) -> Self {
        self.csrf_exempt = true;
        self
    }
}

/// Method + path pattern → guard, shared between router and middleware so
/// the two can never disagree about which routes are protected.
pub struct GuardTable {
    guards: Vec<(Method, String, RouteGuard)>,
}

impl GuardTable {
    pub fn new() -> Self {
        Self { guards: Vec::new() }
    }

    pub fn guard(mut self, method: Method, path: &str, guard: RouteGuard) -> Self {
        self.guards.push((method, path.to_string(), guard));
        self
    }

    pub fn lookup(&self, method: &Method, path: &str) -> Option<&RouteGuard> {
        self.guards
            .iter()
            .find(|(m, pattern, _)| m == method && path_matches(pattern, path))
            .map(|(_, _, g)| g)
    }
}

impl Default for GuardTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Segment-by-segment matching with `:param` wildcards, query string
/// stripped.  e.g. `"/recipes/:id"` matches `"/recipes/42"`.
pub fn path_matches(route_path: &str, request_path: &str) -> bool {
    let clean = request_path.split('?').next().unwrap_or(request_path);

    if route_path == clean {
        return true;
    }

    let route_segs: Vec<&str> = route_path.split('/').collect();
    let path_segs: Vec<&str> = clean.split('/').collect();

    if route_segs.len() != path_segs.len() {
        return false;
    }

    route_segs
        .iter()
        .zip(path_segs.iter())
        .all(|(r, p)| r.starts_with(':') || r == p)
}

/// The admitted request's context plus the rate decision the response
/// headers report.
#[derive(Debug, Clone)]
pub struct Admission {
    pub context: AuthContext,
    pub rate: RateDecision,
}

/// A refused admission.  When RateCheck itself passed, its decision rides
/// along so even a 401/403 response can report the quota it consumed; a
/// 429 carries the quota inside the error instead.
#[derive(Debug)]
pub struct Rejection {
    pub error: SecurityError,
    pub rate: Option<RateDecision>,
}

/// Composes the four security components into one admission decision and
/// emits exactly one audit event per decision.
///
/// Holds no per-request state; all mutable security state lives in the
/// shared store, so this is safe for unbounded concurrent invocation.
#[derive(Clone)]
pub struct Pipeline {
    limiter: RateLimiter,
    tokens: TokenService,
    sessions: SessionManager,
    roles: Arc<RoleRegistry>,
    audit: Arc<dyn AuditSink>,
}

impl Pipeline {
    pub fn new(
        limiter: RateLimiter,
        tokens: TokenService,
        sessions: SessionManager,
        roles: Arc<RoleRegistry>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            limiter,
            tokens,
            sessions,
            roles,
            audit,
        }
    }

    /// Run the full state machine for one request.
    pub async fn admit(
        &self,
        meta: &RequestMeta,
        guard: &RouteGuard,
    ) -> Result<Admission, Rejection> {
        let result = self.run_stages(meta, guard).await;
        self.record(meta, guard, &result);
        result
    }

    async fn run_stages(
        &self,
        meta: &RequestMeta,
        guard: &RouteGuard,
    ) -> Result<Admission, Rejection> {
        // ── RateCheck ─────────────────────────────────────────────────────
        let rate = match self.rate_check(meta, guard).await {
            Ok(decision) => decision,
            Err(error) => return Err(Rejection { error, rate: None }),
        };

        // The remaining stages cannot un-consume the quota, so their
        // failures keep the decision for the response headers.
        match self.credential_stages(meta, guard).await {
            Ok(context) => Ok(Admission { context, rate }),
            Err(error) => Err(Rejection {
                error,
                rate: Some(rate),
            }),
        }
    }

    async fn credential_stages(
        &self,
        meta: &RequestMeta,
        guard: &RouteGuard,
    ) -> Result<AuthContext, SecurityError> {
        // ── TokenValidate ─────────────────────────────────────────────────
        let raw = meta.bearer.as_deref().ok_or(SecurityError::TokenInvalid)?;
        let criticality = Criticality::of_method(&meta.method);
        let claims = self
            .tokens
            .validate(raw, TokenKind::Access, criticality)
            .await?;

        // ── SessionValidate ───────────────────────────────────────────────
        self.sessions
            .validate(&claims.session_id, claims.user_id, meta.ip.as_deref())
            .await?;

        // ── PermissionCheck ───────────────────────────────────────────────
        // CSRF first: a state-changing request without a valid CSRF proof
        // is a cross-origin forgery signal, rejected as 403 regardless of
        // how valid the bearer credential is.
        if requires_csrf(&meta.method) && !guard.csrf_exempt {
            let csrf = meta.csrf.as_deref().ok_or(SecurityError::PermissionDenied)?;
            let csrf_claims = self
                .tokens
                .validate(csrf, TokenKind::Csrf, criticality)
                .await
                .map_err(|e| match e {
                    // Store outage keeps its class; everything else is a
                    // forgery signal, not an authentication problem.
                    SecurityError::StoreUnavailable(_) => e,
                    _ => SecurityError::PermissionDenied,
                })?;
            if csrf_claims.session_id != claims.session_id {
                debug!(user_id = claims.user_id, "CSRF token from a different session");
                return Err(SecurityError::PermissionDenied);
            }
        }

        if !self
            .roles
            .has_permission(&claims.roles, &guard.resource, &guard.action)
            .await
        {
            return Err(SecurityError::PermissionDenied);
        }

        Ok(AuthContext {
            user_id: claims.user_id,
            roles: claims.roles,
            session_id: claims.session_id,
        })
    }

    async fn rate_check(
        &self,
        meta: &RequestMeta,
        guard: &RouteGuard,
    ) -> Result<RateDecision, SecurityError> {
        let ip = meta.ip.as_deref().unwrap_or("unknown");

        let mut checks: Vec<(LimiterClass, String)> = vec![
            (LimiterClass::Global, "all".to_string()),
            (LimiterClass::PerIp, ip.to_string()),
        ];
        for class in &guard.classes {
            let key = match class {
                LimiterClass::PerEndpoint => format!("{}:{}", meta.method, meta.path),
                // Identity is not established yet at this stage, so the
                // per-user class keys by client IP.
                LimiterClass::PerUser => format!("ip:{}", ip),
                _ => ip.to_string(),
            };
            checks.push((*class, key));
        }

        let decision = self.limiter.admit(ip, &checks).await?;
        if !decision.allowed {
            return Err(decision.into_error());
        }
        Ok(decision)
    }

    fn record(&self, meta: &RequestMeta, guard: &RouteGuard, result: &Result<Admission, Rejection>) {
        let action = format!("{}:{}", guard.resource, guard.action);
        let event = match result {
            Ok(admission) => AuditEvent {
                action,
                subject: Some(admission.context.user_id),
                resource: meta.path.clone(),
                outcome: AuditOutcome::Admitted,
                detail: None,
                risk: "low",
            },
            Err(Rejection { error: e, .. }) => AuditEvent {
                action,
                subject: None,
                resource: meta.path.clone(),
                outcome: AuditOutcome::Rejected,
                detail: Some(format!("{:?}", e)),
                risk: match e {
                    SecurityError::RateLimited { .. } => "medium",
                    SecurityError::PermissionDenied => "high",
                    SecurityError::TokenInvalid
                    | SecurityError::TokenRevoked
                    | SecurityError::SessionMismatch => "high",
                    _ => "medium",
                },
            },
        };
        self.audit.record(event);
    }
}

fn requires_csrf(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}
