use axum::{
    extract::{rejection::JsonRejection, State},
    Extension, Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::auth::middleware::AuthUser;
use crate::errors::ServiceError;
use crate::models::requests::{FeedbackRequest, SymptomAnalysisRequest};
use crate::models::responses::{FeedbackResponse, SymptomAnalysisResponse};
use crate::AppState;

/// Parse and validate a JSON body into a `ServiceError::Validation` on failure
fn validated<T: Validate>(body: Result<Json<T>, JsonRejection>) -> Result<T, ServiceError> {
    let Json(payload) = body.map_err(|e| ServiceError::Validation(e.body_text()))?;
    payload
        .validate()
        .map_err(|e| ServiceError::Validation(e.to_string()))?;
    Ok(payload)
}

/// POST /api/v1/chat/analyze
pub async fn analyze_symptoms(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    body: Result<Json<SymptomAnalysisRequest>, JsonRejection>,
) -> Result<Json<SymptomAnalysisResponse>, ServiceError> {
    let request = validated(body)?;
    tracing::info!(user_id = %auth_user.user_id, "Analyzing symptoms");

    let response = state
        .analyzer
        .analyze(
            &request.symptoms,
            request.additional_context.as_deref(),
            &auth_user.user_id,
        )
        .await?;
    Ok(Json(response))
}

/// POST /api/v1/chat/feedback
pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    Extension(auth_user): Extension<AuthUser>,
    body: Result<Json<FeedbackRequest>, JsonRejection>,
) -> Result<Json<FeedbackResponse>, ServiceError> {
    let feedback = validated(body)?;

    let feedback_id = state
        .analyzer
        .record_feedback(
            &feedback.prediction_id,
            &auth_user.user_id,
            feedback.correct_diagnosis.as_deref(),
            feedback.feedback_text.as_deref(),
            feedback.severity_reported.as_deref(),
        )
        .await?;

    Ok(Json(FeedbackResponse {
        status: "success".to_string(),
        message: "Feedback recorded successfully".to_string(),
        feedback_id: Some(feedback_id),
    }))
}
