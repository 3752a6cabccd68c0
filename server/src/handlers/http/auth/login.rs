use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::BodyExt;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{info, warn};

use shared::types::TokenKind;

use crate::AppState;
use crate::handlers::http::utils;
use crate::security::LimiterClass;
use crate::security::token::TokenSubject;
use crate::tower_middle::{apply_rate_headers, rejection_response};

/// Login request data
#[derive(Debug, Deserialize)]
pub struct LoginData {
    pub email: String,
    pub password: String,
}

/// Login response codes
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LoginResponse {
    Success {
        user_id: i64,
        access_token: String,
        refresh_token: String,
        csrf_token: String,
        expires_in: u64,
    },
    Error {
        code: String,
        message: String,
    },
}

/// Error codes for login
pub enum LoginError {
    InvalidCredentials,
    MissingField(String),
    InternalError,
}

impl LoginError {
    fn to_code(&self) -> &'static str {
        match self {
            Self::InvalidCredentials => "INVALID_CREDENTIALS",
            Self::MissingField(_) => "MISSING_FIELD",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    fn to_message(&self) -> String {
        match self {
            // One message for "no such user" and "wrong password" — the
            // response must not discriminate between them.
            Self::InvalidCredentials => "Invalid email or password".to_string(),
            Self::MissingField(field) => format!("Missing required field: {}", field),
            Self::InternalError => "An internal error occurred".to_string(),
        }
    }

    fn to_response(&self) -> LoginResponse {
        LoginResponse::Error {
            code: self.to_code().to_string(),
            message: self.to_message(),
        }
    }
}

/// Main login handler
///
/// The login route sits outside the guarded pipeline (there is no bearer
/// credential yet), so the auth-class rate limit is applied here directly
/// before anything touches the password hash.
pub async fn handle_login(
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
        Ok(d) => d,
        Err(e) => return Ok(rejection_response(&e)),
    };
    if !decision.allowed {
        warn!(ip = %rate_key, "login attempt rate limited");
        return Ok(rejection_response(&decision.into_error()));
    }

    // Every response past this point consumed quota, so every one of them
    // reports it, the failures included.
    let mut response = process_login(req, &state, ip.as_deref(), user_agent.as_deref()).await?;
    apply_rate_headers(&mut response, &decision);
    Ok(response)
}

async fn process_login(
    req: Request<hyper::body::Incoming>,
    state: &AppState,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    // Parse login form
    let login_data = match parse_login_form(req).await {
        Ok(data) => data,
        Err(login_error) => {
            warn!("Login parsing failed: {}", login_error.to_code());
            return utils::deliver_serialized_json(
                &login_error.to_response(),
                StatusCode::BAD_REQUEST,
            );
        }
    };

    match attempt_login(&login_data, state, ip, user_agent).await {
        Ok((response_data, session_id)) => {
            info!("User logged in: {}", login_data.email);

            let cookie = utils::create_session_cookie(
                "session_id",
                &session_id,
                Duration::from_secs(state.config.auth.refresh_ttl_secs),
                true,
            )
            .context("Failed to create session cookie")?;

            let mut response =
                utils::deliver_serialized_json(&response_data, StatusCode::OK)?;
            response.headers_mut().insert("set-cookie", cookie);
            Ok(response)
        }
        Err(login_error) => {
            warn!("Login failed for {}: {}", login_data.email, login_error.to_code());
            utils::deliver_serialized_json(
                &login_error.to_response(),
                StatusCode::UNAUTHORIZED,
            )
        }
    }
}

/// Parse login form data
async fn parse_login_form(
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<LoginData, LoginError> {
    let body = req
        .collect()
        .await
        .map_err(|_| LoginError::InternalError)?
        .to_bytes();

    let params = form_urlencoded::parse(body.as_ref())
        .into_owned()
        .collect::<HashMap<String, String>>();

    let email = params
        .get("email")
        .ok_or(LoginError::MissingField("email".to_string()))?
        .trim()
        .to_string();

    let password = params
        .get("password")
        .ok_or(LoginError::MissingField("password".to_string()))?
        .to_string();

    if email.is_empty() {
        return Err(LoginError::MissingField("email".to_string()));
    }
    if password.is_empty() {
        return Err(LoginError::MissingField("password".to_string()));
    }

    Ok(LoginData { email, password })
}

/// Verify credentials and mint the session + credential triple.
async fn attempt_login(
    data: &LoginData,
    state: &AppState,
    ip: Option<&str>,
    user_agent: Option<&str>,
) -> std::result::Result<(LoginResponse, String), LoginError> {
    let user = state
        .directory
        .find_by_email(&data.email)
        .await
        .map_err(|e| {
            tracing::error!("Directory lookup failed: {e:#}");
            LoginError::InternalError
        })?
        .ok_or(LoginError::InvalidCredentials)?;

    let password_valid = crate::directory::verify_password(&user.password_hash, &data.password)
        .map_err(|e| {
            tracing::error!("Password verification error: {e:#}");
            LoginError::InternalError
        })?;
    if !password_valid {
        return Err(LoginError::InvalidCredentials);
    }

    // Directory roles plus any assignments made through the role registry.
    let mut roles = user.roles.clone();
    if let Ok(assigned) = state.roles.roles_for_user(user.id).await {
        for role in assigned {
            if !roles.contains(&role) {
                roles.push(role);
            }
        }
    }

    let session = state
        .sessions
        .create(user.id, ip, user_agent)
        .await
        .map_err(|e| {
            tracing::error!("Session creation failed: {}", e);
            LoginError::InternalError
        })?;

    let subject = TokenSubject {
        user_id: user.id,
        email: &user.email,
        roles: &roles,
    };

    let issue = |kind| state.tokens.issue(kind, &subject, &session, ip, user_agent);
    let access = issue(TokenKind::Access).await.map_err(internal)?;
    let refresh = issue(TokenKind::Refresh).await.map_err(internal)?;
    let csrf = issue(TokenKind::Csrf).await.map_err(internal)?;

    Ok((
        LoginResponse::Success {
            user_id: user.id,
            expires_in: access.expires_in(),
            access_token: access.token,
            refresh_token: refresh.token,
            csrf_token: csrf.token,
        },
        session.session_id,
    ))
}

fn internal(e: crate::security::SecurityError) -> LoginError {
    tracing::error!("Token issuance failed: {}", e);
    LoginError::InternalError
}
