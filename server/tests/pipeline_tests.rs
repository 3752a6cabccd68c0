//! End-to-end admission flow over the real composition root: login,
//! guarded write with and without CSRF, logout, replay.

use std::sync::Arc;

use hyper::Method;

use server::AppState;
use server::directory::{MemoryDirectory, UserDirectory, verify_password};
use server::handlers::http::auth::terminate_login;
use server::pipeline::{RequestMeta, RouteGuard};
use server::security::token::TokenSubject;
use server::security::{Criticality, SecurityError, TracingAuditSink};
use server::store::MemoryStore;
use shared::types::{AppConfig, TokenKind};

const SECRET: &str = "integration-test-secret-0123456789abcdef";

fn test_config() -> AppConfig {
    let toml_str = format!(
        r#"
        [server]
        bind = "127.0.0.1"
        port = 0

        [auth]
        access_ttl_secs = 900
        refresh_ttl_secs = 86400
        csrf_ttl_secs = 3600
        jwt_secret = "{SECRET}"

        [security]
        ip_binding = "log_only"

        [rate_limit]
        burst_threshold = 10000
        "#
    );
    toml::from_str(&toml_str).expect("test config parses")
}

async fn state_with_user() -> (AppState, i64) {
    let directory = Arc::new(MemoryDirectory::new());
    let user_id = directory
        .add_user("alice@example.com", "correct horse battery", &["user"])
        .await
        .unwrap();

    let state = AppState::new(
        test_config(),
        Arc::new(MemoryStore::new()),
        Arc::clone(&directory) as Arc<dyn UserDirectory>,
        Arc::new(TracingAuditSink),
    )
    .unwrap();
    (state, user_id)
}

/// The handler-level login sequence, inlined: verify password, create
/// session, issue the credential triple.
async fn login(state: &AppState, email: &str, password: &str) -> (String, String, String, String) {
    let user = state
        .directory
        .find_by_email(email)
        .await
        .unwrap()
        .expect("user exists");
    assert!(verify_password(&user.password_hash, password).unwrap());

    let session = state
        .sessions
        .create(user.id, Some("203.0.113.9"), Some("it-agent"))
        .await
        .unwrap();
    let subject = TokenSubject {
        user_id: user.id,
        email: &user.email,
        roles: &user.roles,
    };
    let access = state
        .tokens
        .issue(TokenKind::Access, &subject, &session, None, None)
        .await
        .unwrap();
    let refresh = state
        .tokens
        .issue(TokenKind::Refresh, &subject, &session, None, None)
        .await
        .unwrap();
    let csrf = state
        .tokens
        .issue(TokenKind::Csrf, &subject, &session, None, None)
        .await
        .unwrap();
    (session.session_id, access.token, refresh.token, csrf.token)
}

fn post_recipes(access: Option<&str>, csrf: Option<&str>) -> RequestMeta {
    RequestMeta {
        method: Method::POST,
        path: "/recipes".to_string(),
        ip: Some("203.0.113.9".to_string()),
        user_agent: Some("it-agent".to_string()),
        bearer: access.map(str::to_string),
        csrf: csrf.map(str::to_string),
    }
}

#[tokio::test]
async fn login_write_logout_replay() {
    let (state, user_id) = state_with_user().await;
    let (session_id, access, _refresh, csrf) =
        login(&state, "alice@example.com", "correct horse battery").await;
    let guard = RouteGuard::new("recipe", "create");

    // Write without CSRF → the 403 class, with the consumed quota kept
    // for the response headers.
    let err = state
        .pipeline
        .admit(&post_recipes(Some(&access), None), &guard)
        .await
        .unwrap_err();
    assert!(matches!(err.error, SecurityError::PermissionDenied));
    assert!(err.rate.is_some());

    // Write with CSRF → admitted, context attached.
    let admission = state
        .pipeline
        .admit(&post_recipes(Some(&access), Some(&csrf)), &guard)
        .await
        .unwrap();
    assert_eq!(admission.context.user_id, user_id);
    assert_eq!(admission.context.session_id, session_id);

    // Logout: session deactivated AND all tokens revoked, as one unit.
    terminate_login(&state, &session_id, user_id).await.unwrap();

    // The very same access token is now dead — 401 class, not 403.
    let err = state
        .pipeline
        .admit(&post_recipes(Some(&access), Some(&csrf)), &guard)
        .await
        .unwrap_err();
    assert!(matches!(
        err.error,
        SecurityError::TokenRevoked | SecurityError::SessionInactive
    ));
    assert_eq!(err.error.status(), hyper::StatusCode::UNAUTHORIZED);
}

/// The same flow through the actual tower middleware: guard lookup,
/// admission, context extension, rate headers, rejection statuses.
#[tokio::test]
async fn tower_layer_enforces_the_guarded_route() {
    use bytes::Bytes;
    use http_body_util::combinators::BoxBody;
    use http_body_util::{BodyExt, Full};
    use hyper::header::HeaderValue;
    use hyper::{Request, Response, StatusCode};
    use server::handlers::http::routes;
    use server::tower_middle::AuthPipelineLayer;
    use shared::types::AuthContext;
    use std::convert::Infallible;
    use tower::{Layer, Service, ServiceExt};

    let (state, _user_id) = state_with_user().await;
    let (_session, access, _refresh, csrf) =
        login(&state, "alice@example.com", "correct horse battery").await;

    // Inner service reports whether admission attached a context.
    let inner = tower::service_fn(|req: Request<Full<Bytes>>| async move {
        let saw = req.extensions().get::<AuthContext>().is_some();
        let mut response: Response<BoxBody<Bytes, Infallible>> =
            Response::new(Full::new(Bytes::new()).boxed());
        response.headers_mut().insert(
            "x-saw-context",
            HeaderValue::from_static(if saw { "yes" } else { "no" }),
        );
        Ok::<_, Infallible>(response)
    });
    let mut svc = AuthPipelineLayer::new(Arc::clone(&state.pipeline), routes::guard_table())
        .layer(inner);

    let request = |bearer: Option<&str>, csrf: Option<&str>| {
        let mut builder = Request::builder().method(Method::POST).uri("/recipes");
        if let Some(b) = bearer {
            builder = builder.header("authorization", format!("Bearer {}", b));
        }
        if let Some(c) = csrf {
            builder = builder.header("x-csrf-token", c);
        }
        builder
            .header("x-forwarded-for", "203.0.113.9")
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    // No credential at all → 401, inner never ran.
    let response = svc
        .ready()
        .await
        .unwrap()
        .call(request(None, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().get("x-saw-context").is_none());

    // Valid access token but no CSRF → 403.  The request still consumed
    // quota, so even the rejection reports it.
    let response = svc
        .ready()
        .await
        .unwrap()
        .call(request(Some(&access), None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));

    // Full credential set → 200, context attached, quota headers present.
    let response = svc
        .ready()
        .await
        .unwrap()
        .call(request(Some(&access), Some(&csrf)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["x-saw-context"], "yes");
    assert!(response.headers().contains_key("x-ratelimit-limit"));
    assert!(response.headers().contains_key("x-ratelimit-remaining"));

    // Unguarded route passes through without a context.
    let health = Request::builder()
        .method(Method::GET)
        .uri("/health")
        .body(Full::new(Bytes::new()))
        .unwrap();
    let response = svc.ready().await.unwrap().call(health).await.unwrap();
    assert_eq!(response.headers()["x-saw-context"], "no");
}

#[tokio::test]
async fn refresh_rotation_kills_the_presented_token() {
    let (state, _user_id) = state_with_user().await;
    let (_session_id, _access, refresh, _csrf) =
        login(&state, "alice@example.com", "correct horse battery").await;

    let claims = state
        .tokens
        .validate(&refresh, TokenKind::Refresh, Criticality::Privileged)
        .await
        .unwrap();

    // Rotation step from the refresh handler: revoke before reissue.
    state.tokens.revoke(&claims.jti).await.unwrap();

    let err = state
        .tokens
        .validate(&refresh, TokenKind::Refresh, Criticality::Privileged)
        .await
        .unwrap_err();
    assert!(matches!(err, SecurityError::TokenRevoked));
}

#[tokio::test]
async fn revocation_of_one_user_leaves_another_untouched() {
    let (state, _alice) = state_with_user().await;
    let directory = &state.directory;
    // Bob has no directory entry; issue his credentials directly.
    let bob_roles = vec!["user".to_string()];
    let bob_subject = TokenSubject {
        user_id: 9_999,
        email: "bob@example.com",
        roles: &bob_roles,
    };
    let bob_session = state.sessions.create(9_999, None, None).await.unwrap();
    let bob_access = state
        .tokens
        .issue(TokenKind::Access, &bob_subject, &bob_session, None, None)
        .await
        .unwrap();

    let (alice_session, alice_access, _r, _c) =
        login(&state, "alice@example.com", "correct horse battery").await;
    let alice = directory
        .find_by_email("alice@example.com")
        .await
        .unwrap()
        .unwrap();

    terminate_login(&state, &alice_session, alice.id).await.unwrap();

    assert!(
        state
            .tokens
            .validate(&alice_access, TokenKind::Access, Criticality::ReadOnly)
            .await
            .is_err()
    );
    assert!(
        state
            .tokens
            .validate(&bob_access.token, TokenKind::Access, Criticality::ReadOnly)
            .await
            .is_ok()
    );
}
