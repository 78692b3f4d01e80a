//! Error translation stage
//!
//! Renders `ServiceError` responses with the bound request id and converts
//! panics into the generic internal-error body. Both are logged at ERROR with
//! the request context before the response leaves.

use axum::{body::Body, http::Request, middleware::Next, response::Response};
use futures::FutureExt;
use serde_json::{json, Value};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use tracing::Level;

use crate::context::{self, RequestContext};
use crate::errors::{internal_error_response, ServiceError};
use crate::logging::{self, LogCategory};

pub async fn error_translation(request: Request<Body>, next: Next) -> Response {
    match AssertUnwindSafe(next.run(request)).catch_unwind().await {
        Ok(mut response) => match response.extensions_mut().remove::<ServiceError>() {
            Some(err) => {
                let request_id = current_request_id();
                logging::log(
                    LogCategory::Error,
                    Level::ERROR,
                    &format!("Model service error: {}", err),
                    &json!({
                        "error_code": err.error_code(),
                        "error_type": err.error_type(),
                        "status": err.status_code().as_u16(),
                        "context": context_fields(),
                    }),
                );
                err.to_response(&request_id)
            }
            None => response,
        },
        Err(panic) => {
            let request_id = current_request_id();
            let message = panic_message(panic.as_ref());
            context::set_metadata("error", message.clone());
            context::set_metadata("error_type", "UnhandledException");
            logging::log(
                LogCategory::Error,
                Level::ERROR,
                &format!("Unhandled error: {}", message),
                &json!({ "context": context_fields() }),
            );
            internal_error_response(&request_id)
        }
    }
}

fn current_request_id() -> String {
    context::current_request_id().unwrap_or_else(|| "unknown".to_string())
}

fn context_fields() -> Value {
    RequestContext::current()
        .map(|ctx| ctx.context_fields())
        .unwrap_or(Value::Null)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
