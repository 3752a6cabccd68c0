use anyhow::{Context, Result};
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Method, Request, Response, StatusCode};
use std::convert::Infallible;
use std::sync::Arc;

use crate::AppState;
use crate::handlers::http::utils::json_response;
use crate::handlers::http::{auth, recipes};
use crate::pipeline::{GuardTable, RouteGuard, path_matches};
use crate::security::LimiterClass;

/// The guard table the middleware consults, declared next to the route
/// dispatch so the two can never drift apart.  Routes absent from this
/// table are open: the login/refresh/logout trio does its own credential
/// and rate handling, and `/health` is deliberately unauthenticated.
pub fn guard_table() -> Arc<GuardTable> {
    Arc::new(
        GuardTable::new()
            .guard(
                Method::POST,
                "/recipes",
                RouteGuard::new("recipe", "create")
                    .with_classes(&[LimiterClass::PerUser, LimiterClass::PerEndpoint]),
            )
            .guard(
                Method::GET,
                "/recipes/:id",
                RouteGuard::new("recipe", "read").with_classes(&[LimiterClass::PerUser]),
            ),
    )
}

/// Dispatch one request to its handler.
pub async fn route(
    req: Request<hyper::body::Incoming>,
    state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    match (&method, path.as_str()) {
        (&Method::GET, "/health") => json_response::deliver_success_json::<()>(None),

        (&Method::POST, "/auth/login") => auth::handle_login(req, state).await,
        (&Method::POST, "/auth/refresh") => auth::handle_refresh(req, state).await,
        (&Method::POST, "/auth/logout") => auth::handle_logout(req, state).await,

        (&Method::POST, "/recipes") => recipes::handle_create_recipe(req, state).await,
        (&Method::GET, p) if path_matches("/recipes/:id", p) => {
            recipes::handle_get_recipe(req, state).await
        }

        _ => json_response::deliver_error_json(
            "NOT_FOUND",
            "Endpoint not found",
            StatusCode::NOT_FOUND,
        )
        .context("Failed to deliver 404 response"),
    }
}
