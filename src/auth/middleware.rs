use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::headers::{authorization::Bearer, Authorization, HeaderMapExt};
use std::sync::Arc;

use crate::auth::jwt::TokenVerifier;
use crate::errors::ServiceError;
use crate::AppState;

pub const USER_ID_HEADER: &str = "X-User-ID";
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

/// Attach the calling user when one can be identified; never rejects
pub async fn identify_user(
    State(state): State<Arc<AppState>>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    if let Some(user) = resolve_user(&state, request.headers()) {
        request.extensions_mut().insert(user);
    }
    next.run(request).await
}

fn resolve_user(state: &AppState, headers: &HeaderMap) -> Option<AuthUser> {
    // Check if auth is disabled (development mode)
    if state.config.is_auth_disabled() {
        let user_id = headers
            .get(USER_ID_HEADER)
            .and_then(|h| h.to_str().ok())
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(ANONYMOUS_USER)
            .to_string();
        tracing::debug!("Auth disabled - using user: {}", user_id);
        return Some(AuthUser { user_id });
    }

    let bearer = headers.typed_get::<Authorization<Bearer>>()?;

    let verifier = TokenVerifier::new(
        &state.config.auth.jwt_secret,
        state.config.auth.jwt_expiry_seconds,
    );
    match verifier.verify(bearer.token()) {
        Ok(claims) => Some(AuthUser {
            user_id: claims.sub,
        }),
        Err(e) => {
            tracing::debug!("Ignoring invalid bearer token: {}", e);
            None
        }
    }
}

/// Reject requests that reached this point without a user
pub async fn require_auth(request: Request<Body>, next: Next) -> Response {
    if request.extensions().get::<AuthUser>().is_none() {
        return ServiceError::Unauthorized("Authentication required".to_string()).into_response();
    }
    next.run(request).await
}
