use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::header::HeaderValue;
use hyper::{Request, Response};
use tower::{Layer, Service};
use tracing::debug;

use crate::handlers::http::utils::headers;
use crate::pipeline::{GuardTable, Pipeline, RequestMeta};
use crate::security::{RateDecision, SecurityError};

/// Tower layer running the full admission pipeline in front of a service.
///
/// Routes without a guard entry pass through untouched (the login form
/// itself, health checks).  Guarded routes are admitted or rejected here;
/// the wrapped service only ever sees requests that carry a validated
/// `AuthContext` extension.
#[derive(Clone)]
pub struct AuthPipelineLayer {
    pipeline: Arc<Pipeline>,
    guards: Arc<GuardTable>,
}

impl AuthPipelineLayer {
    pub fn new(pipeline: Arc<Pipeline>, guards: Arc<GuardTable>) -> Self {
        Self { pipeline, guards }
    }
}

impl<S> Layer<S> for AuthPipelineLayer {
    type Service = AuthPipelineService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthPipelineService {
            inner,
            pipeline: Arc::clone(&self.pipeline),
            guards: Arc::clone(&self.guards),
        }
    }
}

/// The actual service that performs admission
#[derive(Clone)]
pub struct AuthPipelineService<S> {
    inner: S,
    pipeline: Arc<Pipeline>,
    guards: Arc<GuardTable>,
}

impl<S, ReqBody> Service<Request<ReqBody>> for AuthPipelineService<S>
where
    S: Service<Request<ReqBody>, Response = Response<BoxBody<Bytes, Infallible>>>
        + Clone
        + Send
        + 'static,
    S::Future: Send + 'static,
    ReqBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let pipeline = Arc::clone(&self.pipeline);
        let guards = Arc::clone(&self.guards);
        let mut inner = self.inner.clone();

        Box::pin(async move {
            let Some(guard) = guards.lookup(req.method(), req.uri().path()).cloned() else {
                return inner.call(req).await;
            };

            let meta = RequestMeta {
                method: req.method().clone(),
                path: req.uri().path().to_string(),
                ip: headers::get_client_ip(&req),
                user_agent: headers::get_user_agent(&req),
                bearer: headers::get_bearer_token(&req),
                csrf: headers::get_csrf_token(&req),
            };

            match pipeline.admit(&meta, &guard).await {
                Ok(admission) => {
                    let mut req = req;
                    req.extensions_mut().insert(admission.context);
                    let mut response = inner.call(req).await?;
                    apply_rate_headers(&mut response, &admission.rate);
                    Ok(response)
                }
                Err(rejection) => {
                    debug!("{} {} rejected: {}", meta.method, meta.path, rejection.error);
                    let mut response = rejection_response(&rejection.error);
                    if let Some(rate) = &rejection.rate {
                        apply_rate_headers(&mut response, rate);
                    }
                    Ok(response)
                }
            }
        })
    }
}

/// `X-RateLimit-{Limit,Remaining,Reset}` on every rate-limited request,
/// successful or not.  Also used by the open auth handlers, which run
/// their own admission checks.
pub fn apply_rate_headers<T>(response: &mut Response<T>, decision: &RateDecision) {
    let headers = response.headers_mut();
    if let Ok(v) = HeaderValue::from_str(&decision.limit.to_string()) {
        headers.insert("x-ratelimit-limit", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.remaining.to_string()) {
        headers.insert("x-ratelimit-remaining", v);
    }
    if let Ok(v) = HeaderValue::from_str(&decision.reset_secs.to_string()) {
        headers.insert("x-ratelimit-reset", v);
    }
}

/// Build the coarse public rejection, never failing.  Also used by the
/// open auth handlers, which run their own admission checks.
pub fn rejection_response(error: &SecurityError) -> Response<BoxBody<Bytes, Infallible>> {
    let body = error.public_body();
    let json = serde_json::to_string(&body)
        .unwrap_or_else(|_| r#"{"status":"error","code":"INTERNAL_ERROR","message":"error"}"#.to_string());

    let mut response = Response::new(Full::new(Bytes::from(json)).boxed());
    *response.status_mut() = error.status();
    response
        .headers_mut()
        .insert("content-type", HeaderValue::from_static("application/json"));

    if let SecurityError::RateLimited {
        limit,
        remaining,
        reset_secs,
        retry_after_secs,
    } = error
    {
        if let Ok(v) = HeaderValue::from_str(&retry_after_secs.to_string()) {
            response.headers_mut().insert("retry-after", v);
        }
        apply_rate_headers(
            &mut response,
            &RateDecision {
                allowed: false,
                limit: *limit,
                remaining: *remaining,
                reset_secs: *reset_secs,
                retry_after_secs: *retry_after_secs,
            },
        );
    }

    response
}
