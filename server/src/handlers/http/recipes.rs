//! Demonstration business handlers behind the guarded pipeline.
//!
//! The real recipe CRUD lives in the application layer; these handlers
//! exist to show the contract it gets: by the time a guarded handler
//! runs, admission has already happened and the request carries a
//! validated [`AuthContext`] extension.

use anyhow::Result;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper::{Request, Response, StatusCode};
use serde_json::json;
use std::convert::Infallible;
use tracing::debug;

use shared::types::AuthContext;

use crate::AppState;
use crate::handlers::http::utils;

/// POST /recipes — guarded: `recipe:create` + CSRF.
pub async fn handle_create_recipe(
    req: Request<hyper::body::Incoming>,
    _state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let Some(context) = req.extensions().get::<AuthContext>() else {
        // A guarded route reached without admission is a wiring bug, not
        // a client error.
        return utils::deliver_error_json(
            "INTERNAL_ERROR",
            "An internal error occurred",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    };

    debug!(user_id = context.user_id, "creating recipe");
    utils::deliver_serialized_json(
        &json!({
            "status": "success",
            "owner": context.user_id,
        }),
        StatusCode::CREATED,
    )
}

/// GET /recipes/:id — guarded: `recipe:read`.
pub async fn handle_get_recipe(
    req: Request<hyper::body::Incoming>,
    _state: AppState,
) -> Result<Response<BoxBody<Bytes, Infallible>>> {
    let Some(context) = req.extensions().get::<AuthContext>() else {
        return utils::deliver_error_json(
            "INTERNAL_ERROR",
            "An internal error occurred",
            StatusCode::INTERNAL_SERVER_ERROR,
        );
    };

    let id = req
        .uri()
        .path()
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();

    utils::deliver_serialized_json(
        &json!({
            "status": "success",
            "data": { "id": id, "viewer": context.user_id },
        }),
        StatusCode::OK,
    )
}
