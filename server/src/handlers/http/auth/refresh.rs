use anyhow::Result;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use std::convert::Infallible;
use tracing::{debug, warn};

use shared::types::TokenKind;

use crate::AppState;
use crate::handlers::http::utils;
use crate::security::token::TokenSubject;
use crate::security::{Criticality, LimiterClass};
use crate::tower_middle::{apply_rate_headers, rejection_response};

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub csrf_token: String,
    pub expires_in: u64,
}

/// Exchange a refresh token for a fresh credential triple.
///
/// The presented refresh token is revoked before the new one is issued
/// (rotation): a captured refresh token is good for at most one exchange,
/// and a second use of it surfaces as `TokenRevoked`.
pub async fn handle_refresh(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let ip = utils::get_client_ip(&req);
    let user_agent = utils::get_user_agent(&req);
    let rate_key = ip.clone().unwrap_or_else(|| "unknown".to_string());

    let checks = [
        (LimiterClass::Global, "all".to_string()),
        (LimiterClass::PerIp, rate_key.clone()),
        (LimiterClass::Auth, rate_key.clone()),
    ];
    let decision = match state.limiter.admit(&rate_key, &checks).await {
        Ok(d) if d.allowed => d,
        Ok(d) => return Ok(rejection_response(&d.into_error())),
        Err(e) => return Ok(rejection_response(&e)),
    };

    // Quota is spent whether or not the exchange succeeds; report it on
    // every response.
    let mut response = exchange(req, &state, ip.as_deref(), user_agent.as_deref()).await?;
    apply_rate_headers(&mut response, &decision);
    Ok(response)
}

async fn exchange(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let Some(raw) = utils::get_bearer_token(&req) else {
        return Ok(rejection_response(&crate::security::SecurityError::TokenInvalid));
    };

    let claims = match state
        .tokens
        .validate(&raw, TokenKind::Refresh, Criticality::Privileged)
        .await
    {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Refresh rejected: {}", e);
            return Ok(rejection_response(&e));
        }
    };

    // The session record drives the expiry cap on the reissued triple.
    let session = match state
        .sessions
        .validate(&claims.session_id, claims.user_id, ip)
        .await
    {
        Ok(session) => session,
        Err(e) => {
            warn!(user_id = claims.user_id, "refresh against bad session: {}", e);
            return Ok(rejection_response(&e));
        }
    };

    // Rotate before reissuing; a failure here aborts the exchange so the
    // old token can never coexist with its successor.
    if let Err(e) = state.tokens.revoke(&claims.jti).await {
        return Ok(rejection_response(&e));
    }

    let subject = TokenSubject {
        user_id: claims.user_id,
        email: &claims.email,
        roles: &claims.roles,
    };
    let issue = |kind| state.tokens.issue(kind, &subject, &session, ip, user_agent);
    let access = match issue(TokenKind::Access).await {
        Ok(t) => t,
        Err(e) => return Ok(rejection_response(&e)),
    };
    let refresh = match issue(TokenKind::Refresh).await {
        Ok(t) => t,
        Err(e) => return Ok(rejection_response(&e)),
    };
    let csrf = match issue(TokenKind::Csrf).await {
        Ok(t) => t,
        Err(e) => return Ok(rejection_response(&e)),
    };

    debug!(user_id = claims.user_id, "refresh token rotated");
    utils::deliver_serialized_json(
        &RefreshResponse {
            expires_in: access.expires_in(),
            access_token: access.token,
            refresh_token: refresh.token,
            csrf_token: csrf.token,
        },
        StatusCode::OK,
    )
}
