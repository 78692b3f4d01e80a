//! Symptom Analysis
//!
//! Orchestrates one analysis: similar-case search, prompt assembly, LLM
//! completion and parsing. Each outcome feeds the [`ModelMonitor`] and is
//! tracked on a best-effort basis.

use axum::http::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::config::{LlmSettings, VectorSearchSettings};
use crate::context;
use crate::errors::ServiceError;
use crate::logging;
use crate::metrics::Timer;
use crate::models::responses::{Disease, SymptomAnalysisResponse};
use crate::monitoring::ModelMonitor;
use crate::services::tracker::{PredictionRecord, Tracker, UsageRecord};

const SYSTEM_PROMPT: &str = "You are a medical diagnostic AI assistant. Provide analyses in the \
requested JSON format. Be conservative with severity assessments and always recommend \
professional medical consultation.";

const RESPONSE_FORMAT: &str = r#"
Provide a detailed analysis in the following JSON format:
{
    "possible_diseases": [
        {
            "name": "disease name",
            "confidence": 0.0 to 1.0,
            "symptoms_matched": ["symptom1", "symptom2"],
            "recommendation": "specific recommendation"
        }
    ],
    "analysis_summary": "detailed analysis",
    "severity_level": "LOW/MEDIUM/HIGH",
    "seek_immediate_care": boolean
}"#;

const FALLBACK_CASES: usize = 3;

/// Stored case returned by the similarity search
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct SimilarCase {
    pub disease: String,
    #[serde(default)]
    pub symptoms_text: String,
}

// ============================================================================
// Similar-case search
// ============================================================================

/// Client for a JSON Data API collection with server-side vectorization
pub struct VectorSearchClient {
    endpoint: Option<String>,
    token: String,
    keyspace: String,
    collection: String,
    limit: usize,
    client: reqwest::Client,
}

impl VectorSearchClient {
    pub fn new(settings: &VectorSearchSettings, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            endpoint: settings
                .endpoint
                .as_deref()
                .map(|e| e.trim_end_matches('/').to_string())
                .filter(|e| !e.is_empty()),
            token: settings.token.clone(),
            keyspace: settings.keyspace.clone(),
            collection: settings.collection.clone(),
            limit: settings.limit,
            client: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    /// Nearest stored cases; empty when no endpoint is configured
    pub async fn find_similar(&self, symptoms: &str) -> Result<Vec<SimilarCase>, ServiceError> {
        let Some(endpoint) = &self.endpoint else {
            tracing::debug!("Vector search not configured, skipping similar cases");
            return Ok(Vec::new());
        };

        let url = format!(
            "{}/api/json/v1/{}/{}",
            endpoint, self.keyspace, self.collection
        );
        let body = json!({
            "find": {
                "sort": { "$vectorize": symptoms },
                "projection": { "disease": 1, "symptoms_text": 1 },
                "options": { "limit": self.limit },
            }
        });

        let response = self
            .client
            .post(&url)
            .header("Token", &self.token)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(search_error)?;

        let payload: Value = response.json().await.map_err(search_error)?;
        let documents = payload
            .pointer("/data/documents")
            .cloned()
            .unwrap_or(Value::Array(Vec::new()));

        serde_json::from_value(documents)
            .map_err(|e| search_error(format!("unexpected search response: {}", e)))
    }
}

/// Logs the upstream error; the returned error carries only a fixed message
fn search_error(e: impl std::fmt::Display) -> ServiceError {
    tracing::error!(error = %e, "Similar case search failed");
    ServiceError::ModelService {
        message: "Similar case search failed".to_string(),
        error_code: "VECTOR_SEARCH_ERROR".to_string(),
        status: StatusCode::BAD_GATEWAY,
    }
}

// ============================================================================
// LLM completion
// ============================================================================

/// OpenAI-compatible chat completions client
pub struct LlmClient {
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct ChatCompletion {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

impl LlmClient {
    pub fn new(settings: &LlmSettings) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            api_key: settings.api_key.clone(),
            model: settings.model.clone(),
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(settings.timeout_secs))
                .build()?,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": prompt },
            ],
            "temperature": self.temperature,
            "max_tokens": self.max_tokens,
        });

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| self.request_error(e))?;

        let completion: ChatCompletion = response
            .json()
            .await
            .map_err(|e| self.request_error(e))?;

        completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ServiceError::inference("completion had no content", &self.model))
    }

    fn request_error(&self, e: reqwest::Error) -> ServiceError {
        tracing::error!(model = %self.model, error = %e, "LLM request failed");
        if e.is_timeout() {
            ServiceError::inference("LLM request timed out", &self.model)
        } else {
            ServiceError::inference("LLM request failed", &self.model)
        }
    }
}

// ============================================================================
// Prompt and parsing
// ============================================================================

pub fn build_prompt(
    similar_cases: &[SimilarCase],
    symptoms: &str,
    additional_context: Option<&str>,
) -> String {
    let mut prompt = format!(
        "As a medical diagnostic AI, analyze the following symptoms:\nSymptoms: {}\n",
        symptoms
    );
    if let Some(extra) = additional_context.filter(|c| !c.trim().is_empty()) {
        prompt.push_str(&format!("Additional Context: {}\n", extra));
    }

    prompt.push_str("\nSimilar cases from the database:\n");
    for case in similar_cases {
        prompt.push_str(&format!(
            "- Disease: {}\n  Symptoms: {}\n",
            case.disease, case.symptoms_text
        ));
    }

    prompt.push_str(RESPONSE_FORMAT);
    prompt
}

/// Parse a completion, tolerating prose or fences around the JSON object
pub fn parse_completion(completion: &str) -> Option<SymptomAnalysisResponse> {
    if let Ok(parsed) = serde_json::from_str(completion.trim()) {
        return Some(parsed);
    }
    let start = completion.find('{')?;
    let end = completion.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&completion[start..=end]).ok()
}

/// Conservative answer built from the nearest cases
pub fn fallback_response(similar_cases: &[SimilarCase]) -> SymptomAnalysisResponse {
    let possible_diseases = similar_cases
        .iter()
        .take(FALLBACK_CASES)
        .map(|case| Disease {
            name: case.disease.clone(),
            confidence: 0.5,
            symptoms_matched: case
                .symptoms_text
                .split(", ")
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
            recommendation: Some(
                "Please consult a healthcare professional for accurate diagnosis.".to_string(),
            ),
        })
        .collect();

    SymptomAnalysisResponse {
        possible_diseases,
        analysis_summary:
            "Analysis could not be fully processed. Please consult a healthcare professional."
                .to_string(),
        severity_level: Some("MEDIUM".to_string()),
        seek_immediate_care: true,
        prediction_id: None,
    }
}

// ============================================================================
// Orchestration
// ============================================================================

pub struct Analyzer {
    llm: LlmClient,
    search: VectorSearchClient,
    monitor: Arc<ModelMonitor>,
    tracker: Arc<Tracker>,
}

impl Analyzer {
    pub fn new(
        llm: LlmClient,
        search: VectorSearchClient,
        monitor: Arc<ModelMonitor>,
        tracker: Arc<Tracker>,
    ) -> Self {
        Self {
            llm,
            search,
            monitor,
            tracker,
        }
    }

    pub async fn analyze(
        &self,
        symptoms: &str,
        additional_context: Option<&str>,
        user_id: &str,
    ) -> Result<SymptomAnalysisResponse, ServiceError> {
        let timer = Timer::new();
        let prediction_id = Uuid::new_v4().to_string();
        context::set_metadata("prediction_id", prediction_id.clone());
        context::set_metadata("model_version", self.tracker.model_version());

        let similar_cases = match self.search.find_similar(symptoms).await {
            Ok(cases) => cases,
            Err(e) => {
                self.record_failure(&timer, &e).await;
                return Err(e);
            }
        };
        let prompt = build_prompt(&similar_cases, symptoms, additional_context);

        let completion = match self.llm.complete(&prompt).await {
            Ok(completion) => completion,
            Err(e) => {
                self.record_failure(&timer, &e).await;
                return Err(e);
            }
        };

        let latency = Duration::from_secs_f64(timer.elapsed_secs());
        let (mut response, parse_error) = match parse_completion(&completion) {
            Some(parsed) => (parsed, None),
            None => {
                tracing::warn!("Completion was not valid JSON, using fallback response");
                (
                    fallback_response(&similar_cases),
                    Some("completion was not valid JSON"),
                )
            }
        };
        response.prediction_id = Some(prediction_id.clone());

        let label = response.predicted_label().to_string();
        let confidence = response.top_confidence();
        let latency_ms = latency.as_secs_f64() * 1000.0;
        self.monitor.record_prediction(latency, &label, parse_error);
        logging::log_prediction(self.tracker.model_version(), &label, confidence, latency_ms);

        if self.tracker.is_enabled() {
            let prediction = serde_json::to_value(&response).unwrap_or(Value::Null);
            if let Err(e) = self
                .tracker
                .track_prediction(PredictionRecord {
                    prediction_id: &prediction_id,
                    input_text: symptoms,
                    prediction: &prediction,
                    confidence,
                    latency_ms,
                })
                .await
            {
                tracing::warn!("Prediction tracking failed: {}", e);
            }

            let token_count = prompt.len() + completion.len();
            self.report_metrics(latency_ms, parse_error.is_some(), token_count)
                .await;

            if let Err(e) = self
                .tracker
                .track_usage(UsageRecord {
                    user_id,
                    model_used: self.llm.model(),
                    tokens_used: token_count,
                    symptoms,
                    has_additional_context: additional_context.is_some_and(|c| !c.is_empty()),
                    diseases_analyzed: response.possible_diseases.len(),
                })
                .await
            {
                tracing::warn!("Usage tracking failed: {}", e);
            }
        }

        Ok(response)
    }

    pub async fn record_feedback(
        &self,
        prediction_id: &str,
        user_id: &str,
        correct_diagnosis: Option<&str>,
        feedback_text: Option<&str>,
        severity_reported: Option<&str>,
    ) -> Result<String, ServiceError> {
        self.tracker
            .record_feedback(
                prediction_id,
                user_id,
                correct_diagnosis,
                feedback_text,
                severity_reported,
            )
            .await
    }

    async fn record_failure(&self, timer: &Timer, error: &ServiceError) {
        let latency = Duration::from_secs_f64(timer.elapsed_secs());
        self.monitor.record_failure(latency, &error.to_string());
        if self.tracker.is_enabled() {
            self.report_metrics(0.0, true, 0).await;
        }
    }

    async fn report_metrics(&self, latency_ms: f64, failed: bool, token_count: usize) {
        let mut metrics = Map::new();
        metrics.insert("average_latency_ms".into(), json!(latency_ms));
        metrics.insert("request_count".into(), json!(1));
        metrics.insert("error_count".into(), json!(u8::from(failed)));
        metrics.insert("token_count".into(), json!(token_count));
        metrics.insert(
            "drift_score".into(),
            json!(self.monitor.drift_state().drift_score),
        );
        if let Err(e) = self.tracker.update_model_metrics(metrics).await {
            tracing::warn!("Model metrics update failed: {}", e);
        }
    }

    pub fn llm_model(&self) -> &str {
        self.llm.model()
    }
}
