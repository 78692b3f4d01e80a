//! Request context and tracing stage
//!
//! Binds a [`RequestContext`] for the rest of the chain, wraps it in a
//! `request` span, records HTTP metrics and stamps `X-Request-ID`.

use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use tracing::Instrument;

use super::{client_ip, inbound_request_id, user_agent, REQUEST_ID_HEADER};
use crate::auth::middleware::AuthUser;
use crate::context::RequestContext;
use crate::metrics::{self, Timer};

/// Decrements the in-flight gauge even when the request is dropped
struct InFlight;

impl InFlight {
    fn start() -> Self {
        metrics::adjust_http_requests_in_flight(1.0);
        Self
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        metrics::adjust_http_requests_in_flight(-1.0);
    }
}

pub async fn request_context(request: Request<Body>, next: Next) -> Response {
    let user_id = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.user_id.clone());
    let ctx = RequestContext::begin(inbound_request_id(&request), user_id);
    let request_id = ctx.request_id().to_string();

    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let endpoint = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_string())
        .unwrap_or_else(|| path.clone());

    ctx.set_metadata("path", path.clone());
    ctx.set_metadata("method", method.clone());
    ctx.set_metadata("client_ip", client_ip(&request));
    ctx.set_metadata("user_agent", user_agent(&request));

    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %method,
        path = %path,
    );

    let _in_flight = InFlight::start();
    let timer = Timer::new();

    let mut response = ctx.scope(next.run(request)).instrument(span).await;

    metrics::record_http_request(
        &method,
        &endpoint,
        response.status().as_u16(),
        timer.elapsed_secs(),
    );

    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}
