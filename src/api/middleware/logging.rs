//! Request logging stage
//!
//! Emits exactly one completion record per request. A request that unwinds or
//! is dropped before producing a response is logged as failed from `Drop`.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use serde_json::Value;

use crate::context;
use crate::errors::ServiceError;

struct Completion {
    method: String,
    path: String,
    done: bool,
}

impl Drop for Completion {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        context::set_metadata("duration_ms", context::duration_ms());
        context::set_metadata("error", "request did not complete");
        tracing::error!(
            method = %self.method,
            path = %self.path,
            duration_ms = context::duration_ms(),
            metadata = %serde_json::Value::Object(context::get_all_metadata()),
            "Request failed"
        );
    }
}

pub async fn request_logging(request: Request<Body>, next: Next) -> Response {
    let mut completion = Completion {
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        done: false,
    };

    let response = next.run(request).await;
    completion.done = true;

    let status = response.status().as_u16();
    let duration_ms = context::duration_ms();
    context::set_metadata("status_code", status);
    context::set_metadata("duration_ms", duration_ms);

    let error = response.extensions().get::<ServiceError>();
    if let Some(err) = error {
        context::set_metadata("error", err.to_string());
        context::set_metadata("error_type", err.error_type());
    }
    let metadata = Value::Object(context::get_all_metadata());

    if error.is_some() || status >= 500 {
        tracing::error!(
            method = %completion.method,
            path = %completion.path,
            status,
            duration_ms,
            metadata = %metadata,
            "Request failed"
        );
    } else {
        tracing::info!(
            method = %completion.method,
            path = %completion.path,
            status,
            duration_ms,
            metadata = %metadata,
            "Request completed"
        );
    }

    response
}
