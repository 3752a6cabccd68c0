use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response};
use std::convert::Infallible;
use tracing::{info, warn};

use shared::types::TokenKind;

use crate::AppState;
use crate::handlers::http::utils;
use crate::security::Criticality;
use crate::tower_middle::rejection_response;

use super::terminate_login;

/// Log the caller out everywhere.
///
/// Requires a valid access token — an attacker must not be able to log a
/// victim out with a guessed session id.
pub async fn handle_logout(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let Some(raw) = utils::get_bearer_token(&req) else {
        return Ok(rejection_response(&crate::security::SecurityError::TokenInvalid));
    };

    let claims = match state
        .tokens
        .validate(&raw, TokenKind::Access, Criticality::Privileged)
        .await
    {
        Ok(claims) => claims,
        Err(e) => {
            warn!("Logout with bad token: {}", e);
            return Ok(rejection_response(&e));
        }
    };

    if let Err(e) = terminate_login(&state, &claims.session_id, claims.user_id).await {
        return Ok(rejection_response(&e));
    }

    info!(user_id = claims.user_id, "user logged out");

    let cookie = utils::delete_cookie("session_id").context("Failed to clear session cookie")?;
    let mut response = utils::deliver_success_json::<()>(None)?;
    response.headers_mut().insert("set-cookie", cookie);
    Ok(response)
}
