//! API Middleware
//!
//! Stages wrapping every request, outermost first:
//! - security headers
//! - rate limiting
//! - request context, tracing span and HTTP metrics
//! - error translation
//! - request logging
//!
//! `routes::create_app` applies them in this order, inside CORS and user
//! identification.

pub mod error_translation;
pub mod logging;
pub mod rate_limit;
pub mod request_context;
pub mod security_headers;

pub use error_translation::error_translation;
pub use logging::request_logging;
pub use rate_limit::rate_limit;
pub use request_context::request_context;
pub use security_headers::security_headers;

use axum::{
    body::Body,
    extract::ConnectInfo,
    http::{header, Request},
};
use std::net::SocketAddr;

use crate::auth::middleware::AuthUser;

pub const REQUEST_ID_HEADER: &str = "x-request-id";
const FORWARDED_FOR_HEADER: &str = "X-Forwarded-For";

/// Inbound request id, if the caller supplied a usable one
pub fn inbound_request_id(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// First forwarded-for hop, else the peer address
pub fn client_ip(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(FORWARDED_FOR_HEADER)
        .and_then(|h| h.to_str().ok())
        .and_then(|s| s.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(|| {
            request
                .extensions()
                .get::<ConnectInfo<SocketAddr>>()
                .map(|ConnectInfo(addr)| addr.ip().to_string())
        })
}

/// Rate-limit identifier, namespaced by kind
pub fn client_identifier(request: &Request<Body>) -> String {
    if let Some(user) = request.extensions().get::<AuthUser>() {
        return format!("user:{}", user.user_id);
    }
    match client_ip(request) {
        Some(ip) => format!("ip:{}", ip),
        None => "ip:unknown".to_string(),
    }
}

pub fn user_agent(request: &Request<Body>) -> Option<String> {
    request
        .headers()
        .get(header::USER_AGENT)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
}
