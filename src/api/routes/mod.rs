use axum::{
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::api::handlers;
use crate::api::middleware;
use crate::auth::middleware::{identify_user, require_auth};
use crate::AppState;

pub fn create_router() -> Router<Arc<AppState>> {
    // Protected routes (auth required)
    let chat_routes = Router::new()
        .route("/chat/analyze", post(handlers::chat::analyze_symptoms))
        .route("/chat/feedback", post(handlers::chat::submit_feedback))
        .route_layer(axum_middleware::from_fn(require_auth));

    let api_routes = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/health/model", get(handlers::health::model_health))
        .merge(chat_routes);

    Router::new()
        .route("/", get(handlers::root::root))
        .route("/metrics", get(handlers::metrics::metrics))
        .nest("/api/v1", api_routes)
}

/// Full application: routes wrapped in the middleware chain.
///
/// Outermost first: user identification, CORS, security headers, rate
/// limiting, request context, error translation, request logging.
pub fn create_app(state: Arc<AppState>) -> Router {
    create_router()
        .layer(axum_middleware::from_fn(middleware::request_logging))
        .layer(axum_middleware::from_fn(middleware::error_translation))
        .layer(axum_middleware::from_fn(middleware::request_context))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::rate_limit,
        ))
        .layer(axum_middleware::from_fn(middleware::security_headers))
        .layer(cors_layer(&state.config.server.cors_origins))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            identify_user,
        ))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();
    layer.allow_origin(origins)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::jwt::issue_token;
    use crate::config::AppConfig;
    use crate::metrics::MetricsRegistry;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        response::Response,
    };
    use parking_lot::Mutex;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::io;
    use tower::ServiceExt;

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl LogCapture {
        fn records(&self) -> Vec<Value> {
            String::from_utf8(self.0.lock().clone())
                .unwrap()
                .lines()
                .filter_map(|line| serde_json::from_str(line).ok())
                .collect()
        }
    }

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn test_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.logging.file_sinks_enabled = false;
        config.auth.jwt_secret = "route-test-secret".to_string();
        config
    }

    fn app_with(config: AppConfig) -> (Router, Arc<AppState>) {
        let metrics = MetricsRegistry::install().unwrap();
        let state = Arc::new(AppState::new(config, metrics).unwrap());
        (create_app(state.clone()), state)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn request_id(response: &Response) -> String {
        response.headers()["x-request-id"]
            .to_str()
            .unwrap()
            .to_string()
    }

    #[tokio::test]
    async fn test_root() {
        let (app, _) = app_with(test_config());
        let response = app.oneshot(get_request("/")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_health_carries_request_id_and_headers() {
        let (app, _) = app_with(test_config());
        let response = app.oneshot(get_request("/api/v1/health")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let id = request_id(&response);
        assert!(!id.is_empty());
        assert_eq!(response.headers()["x-frame-options"], "DENY");
        assert_eq!(response.headers()["x-ratelimit-remaining"], "199");
        assert!(response.headers().contains_key("x-ratelimit-reset"));

        let body = json_body(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["request_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_inbound_request_id_is_reused() {
        let (app, _) = app_with(test_config());
        let request = Request::builder()
            .uri("/api/v1/health")
            .header("X-Request-ID", "trace-abc")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(request_id(&response), "trace-abc");
    }

    #[tokio::test]
    async fn test_not_found_still_gets_request_id() {
        let (app, _) = app_with(test_config());
        let response = app.oneshot(get_request("/nowhere")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(!request_id(&response).is_empty());
        assert_eq!(response.headers()["x-content-type-options"], "nosniff");
    }

    #[tokio::test]
    async fn test_rate_limit_denies_after_max() {
        let mut config = test_config();
        config.rate_limit.path_limits = HashMap::from([("/api/v1/health".to_string(), 2)]);
        let (app, _) = app_with(config);

        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_writer(move || writer.clone())
            .finish();
        let _guard = tracing::subscriber::set_default(subscriber);

        let call = || {
            Request::builder()
                .uri("/api/v1/health")
                .header("X-Forwarded-For", "198.51.100.7")
                .body(Body::empty())
                .unwrap()
        };

        for _ in 0..2 {
            let response = app.clone().oneshot(call()).await.unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let denied = app.clone().oneshot(call()).await.unwrap();
        assert_eq!(denied.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(denied.headers().contains_key("retry-after"));
        let denied_id = request_id(&denied);
        assert!(!denied_id.is_empty());
        let logged = capture
            .records()
            .into_iter()
            .find(|r| r["fields"]["message"] == "Rate limit exceeded")
            .expect("denial logged");
        assert_eq!(logged["fields"]["request_id"], denied_id.as_str());
        assert_eq!(logged["fields"]["path"], "/api/v1/health");
        assert_eq!(
            denied.headers()["strict-transport-security"],
            "max-age=31536000; includeSubDomains"
        );
        let body = json_body(denied).await;
        assert_eq!(body["error_code"], "RATE_LIMIT_EXCEEDED");

        // A different client is unaffected
        let other = Request::builder()
            .uri("/api/v1/health")
            .header("X-Forwarded-For", "198.51.100.8")
            .body(Body::empty())
            .unwrap();
        assert_eq!(app.oneshot(other).await.unwrap().status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_disabled_rate_limit_sets_no_quota_headers() {
        let mut config = test_config();
        config.rate_limit.enabled = false;
        let (app, _) = app_with(config);
        let response = app.oneshot(get_request("/api/v1/health")).await.unwrap();
        assert!(!response.headers().contains_key("x-ratelimit-remaining"));
    }

    #[tokio::test]
    async fn test_analyze_requires_authentication() {
        let (app, _) = app_with(test_config());
        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/chat/analyze")
            .header("content-type", "application/json")
            .body(Body::from(r#"{"symptoms": "fever and cough"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let id = request_id(&response);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "UNAUTHORIZED");
        assert_eq!(body["request_id"], id.as_str());
    }

    #[tokio::test]
    async fn test_upstream_failure_body_hides_internal_details() {
        let mut config = test_config();
        config.auth.disabled = true;
        config.llm.base_url = "http://127.0.0.1:1/internal-llm-gateway".to_string();
        let (app, _) = app_with(config);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/chat/analyze")
            .header("content-type", "application/json")
            .header("X-User-ID", "dev-user")
            .body(Body::from(r#"{"symptoms": "fever and cough"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let id = request_id(&response);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "MODEL_INFERENCE_ERROR");
        assert_eq!(body["request_id"], id.as_str());
        let text = body.to_string();
        assert!(!text.contains("127.0.0.1"));
        assert!(!text.contains("internal-llm-gateway"));
        assert!(!text.contains("os error"));
    }

    #[tokio::test]
    async fn test_invalid_body_is_validation_error() {
        let config = test_config();
        let token = issue_token(&config.auth.jwt_secret, "patient-1", 600);
        let (app, _) = app_with(config);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/chat/analyze")
            .header("content-type", "application/json")
            .header("authorization", format!("Bearer {}", token))
            .body(Body::from(r#"{"symptoms": "x"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error_type"], "ValidationError");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_feedback_without_tracking_is_tracking_error() {
        let mut config = test_config();
        config.auth.disabled = true;
        let (app, _) = app_with(config);

        let request = Request::builder()
            .method("POST")
            .uri("/api/v1/chat/feedback")
            .header("content-type", "application/json")
            .header("X-User-ID", "dev-user")
            .body(Body::from(r#"{"prediction_id": "pred-1"}"#))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "MLOPS_TRACKING_ERROR");
        assert_eq!(body["error_type"], "MLOpsTrackingError");
    }

    async fn boom() -> &'static str {
        panic!("secret internal detail")
    }

    #[tokio::test]
    async fn test_panicking_handler_becomes_generic_500() {
        let app: Router = Router::new()
            .route("/boom", get(boom))
            .layer(axum_middleware::from_fn(middleware::request_logging))
            .layer(axum_middleware::from_fn(middleware::error_translation))
            .layer(axum_middleware::from_fn(middleware::request_context));

        let response = app.oneshot(get_request("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let id = request_id(&response);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "INTERNAL_SERVER_ERROR");
        assert_eq!(body["error_type"], "UnhandledException");
        assert_eq!(body["message"], "An unexpected error occurred");
        assert_eq!(body["request_id"], id.as_str());
        assert!(!body.to_string().contains("secret internal detail"));
    }

    #[tokio::test]
    async fn test_model_health_reports_unknown_without_traffic() {
        let (app, _) = app_with(test_config());
        let response = app.oneshot(get_request("/api/v1/health/model")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = json_body(response).await;
        assert_eq!(body["status"], "unknown");
        assert_eq!(body["phase"], "idle");
        assert!(body["tracked_performance"].is_null());
        assert!(body["resource_metrics"]["memory_usage_bytes"].is_number());
    }

    #[tokio::test]
    async fn test_metrics_exposition() {
        let (app, _) = app_with(test_config());
        app.clone()
            .oneshot(get_request("/api/v1/health"))
            .await
            .unwrap();

        let response = app.oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("system_memory_usage_bytes"));
    }
}
