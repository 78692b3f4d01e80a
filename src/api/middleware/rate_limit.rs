//! Rate limiting stage
//!
//! Denied requests short-circuit with 429 before any inner stage runs, so this
//! stage stamps its own `X-Request-ID` on the denial.

use axum::{
    body::Body,
    extract::State,
    http::{HeaderValue, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use super::{client_identifier, inbound_request_id, REQUEST_ID_HEADER};
use crate::metrics;
use crate::models::responses::ErrorResponse;
use crate::AppState;

pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let limiter = &state.rate_limiter;
    if !limiter.is_enabled() {
        return next.run(request).await;
    }

    let identifier = client_identifier(&request);
    let path = request.uri().path().to_string();

    let decision = limiter.is_rate_limited(&identifier, &path).await;

    if decision.limited {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let retry_after = decision.info.reset_at.saturating_sub(now_secs).max(1);
        let request_id =
            inbound_request_id(&request).unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::warn!(
            request_id = %request_id,
            identifier = %identifier,
            path = %path,
            retry_after,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(&path);

        let body = ErrorResponse::new(
            "Too many requests. Please try again later.",
            "RATE_LIMIT_EXCEEDED",
            "RateLimitExceeded",
            &request_id,
        );
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        let headers = response.headers_mut();
        headers.insert("Retry-After", HeaderValue::from(retry_after));
        headers.insert("X-RateLimit-Remaining", HeaderValue::from(0u64));
        headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.info.reset_at));
        if let Ok(value) = HeaderValue::from_str(&request_id) {
            headers.insert(REQUEST_ID_HEADER, value);
        }
        return response;
    }

    let mut response = next.run(request).await;

    // Add rate limit headers
    let headers = response.headers_mut();
    headers.insert(
        "X-RateLimit-Remaining",
        HeaderValue::from(decision.info.remaining),
    );
    headers.insert("X-RateLimit-Reset", HeaderValue::from(decision.info.reset_at));

    response
}
