//! Service error taxonomy
//!
//! Every variant carries a stable machine-readable code, a client-facing type
//! name and an HTTP status. Handlers return `Result<_, ServiceError>`; the
//! error-translation middleware turns the error into the final JSON body.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};

use crate::context;
use crate::models::responses::ErrorResponse;

#[derive(Debug, Clone, thiserror::Error)]
pub enum ServiceError {
    #[error("{message}")]
    ModelService {
        message: String,
        error_code: String,
        status: StatusCode,
    },

    #[error("Model inference failed: {message}")]
    ModelInference { message: String, model_name: String },

    #[error("Drift detection error: {message}")]
    DriftDetection {
        message: String,
        drift_score: Option<f64>,
    },

    #[error("Performance degradation detected: {message}")]
    PerformanceDegradation {
        message: String,
        metrics: serde_json::Value,
    },

    #[error("MLOps tracking failed for operation '{operation}': {message}")]
    MlopsTracking { message: String, operation: String },

    #[error("Federated learning error: {message}")]
    FederatedLearning {
        message: String,
        round_number: Option<u32>,
    },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Unauthorized(String),
}

impl ServiceError {
    pub fn inference(message: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self::ModelInference {
            message: message.into(),
            model_name: model_name.into(),
        }
    }

    pub fn tracking(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::MlopsTracking {
            message: message.into(),
            operation: operation.into(),
        }
    }

    pub fn drift(message: impl Into<String>, drift_score: Option<f64>) -> Self {
        Self::DriftDetection {
            message: message.into(),
            drift_score,
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            ServiceError::ModelService { error_code, .. } => error_code,
            ServiceError::ModelInference { .. } => "MODEL_INFERENCE_ERROR",
            ServiceError::DriftDetection { .. } => "DRIFT_DETECTION_ERROR",
            ServiceError::PerformanceDegradation { .. } => "PERFORMANCE_DEGRADATION",
            ServiceError::MlopsTracking { .. } => "MLOPS_TRACKING_ERROR",
            ServiceError::FederatedLearning { .. } => "FL_ERROR",
            ServiceError::Validation(_) => "VALIDATION_ERROR",
            ServiceError::Unauthorized(_) => "UNAUTHORIZED",
        }
    }

    /// Type name exposed to clients
    pub fn error_type(&self) -> &'static str {
        match self {
            ServiceError::ModelService { .. } => "ModelServiceError",
            ServiceError::ModelInference { .. } => "ModelInferenceError",
            ServiceError::DriftDetection { .. } => "DriftDetectionError",
            ServiceError::PerformanceDegradation { .. } => "PerformanceDegradationError",
            ServiceError::MlopsTracking { .. } => "MLOpsTrackingError",
            ServiceError::FederatedLearning { .. } => "FederatedLearningError",
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::Unauthorized(_) => "AuthenticationError",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::ModelService { status, .. } => *status,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn to_response(&self, request_id: &str) -> Response {
        let body = ErrorResponse::new(
            self.to_string(),
            self.error_code(),
            self.error_type(),
            request_id,
        );
        (self.status_code(), Json(body)).into_response()
    }
}

/// Generic body for failures that are not a `ServiceError`
pub fn internal_error_response(request_id: &str) -> Response {
    let body = ErrorResponse::new(
        "An unexpected error occurred",
        "INTERNAL_SERVER_ERROR",
        "UnhandledException",
        request_id,
    );
    (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let request_id = context::current_request_id().unwrap_or_else(|| "unknown".to_string());
        let mut response = self.to_response(&request_id);
        // Picked up by the error-translation stage for logging and re-rendering
        response.extensions_mut().insert(self);
        response
    }
}
