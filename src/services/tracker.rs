//! Prediction Tracking Client
//!
//! Persists predictions, feedback and periodic model metrics to a REST
//! backend (PostgREST-style tables). Every call forwards the current request
//! id and context metadata and is bounded by the configured timeout.
//!
//! Failures are returned as `ServiceError::MlopsTracking`; callers decide
//! whether that is fatal (feedback) or best-effort (analysis).

use chrono::{Duration as ChronoDuration, Utc};
use reqwest::{Client, Method, RequestBuilder, Response};
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::Level;
use uuid::Uuid;

use crate::config::TrackingSettings;
use crate::context;
use crate::errors::ServiceError;
use crate::logging::{self, LogCategory};
use crate::metrics;
use crate::models::responses::{PerformanceSummary, TimeRange};

const PREDICTIONS_TABLE: &str = "model_predictions";
const FEEDBACK_TABLE: &str = "prediction_feedback";
const METRICS_TABLE: &str = "performance_metrics";
const USAGE_TABLE: &str = "model_usage";

/// Look-back window for performance queries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeWindow {
    OneHour,
    SixHours,
    TwelveHours,
    Day,
    Week,
    Month,
}

impl TimeWindow {
    /// Unknown values fall back to one day
    pub fn parse(value: &str) -> Self {
        match value {
            "1h" => TimeWindow::OneHour,
            "6h" => TimeWindow::SixHours,
            "12h" => TimeWindow::TwelveHours,
            "7d" => TimeWindow::Week,
            "30d" => TimeWindow::Month,
            _ => TimeWindow::Day,
        }
    }

    pub fn hours(&self) -> i64 {
        match self {
            TimeWindow::OneHour => 1,
            TimeWindow::SixHours => 6,
            TimeWindow::TwelveHours => 12,
            TimeWindow::Day => 24,
            TimeWindow::Week => 24 * 7,
            TimeWindow::Month => 24 * 30,
        }
    }
}

/// One served prediction
#[derive(Debug, Clone)]
pub struct PredictionRecord<'a> {
    pub prediction_id: &'a str,
    pub input_text: &'a str,
    pub prediction: &'a Value,
    pub confidence: f64,
    pub latency_ms: f64,
}

/// One analysis, as billed to a user
#[derive(Debug, Clone, Copy)]
pub struct UsageRecord<'a> {
    pub user_id: &'a str,
    pub model_used: &'a str,
    pub tokens_used: usize,
    pub symptoms: &'a str,
    pub has_additional_context: bool,
    pub diseases_analyzed: usize,
}

impl UsageRecord<'_> {
    /// Comma-separated symptoms in the request
    pub fn symptoms_count(&self) -> usize {
        self.symptoms
            .split(',')
            .filter(|s| !s.trim().is_empty())
            .count()
    }
}

pub struct Tracker {
    base_url: Option<String>,
    api_key: String,
    model_version: String,
    client: Client,
}

impl Tracker {
    pub fn new(settings: &TrackingSettings) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        let base_url = settings
            .base_url
            .as_deref()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());

        Ok(Self {
            base_url,
            api_key: settings.api_key.clone(),
            model_version: settings.model_version.clone(),
            client,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    fn table_url(&self, table: &str, operation: &str) -> Result<String, ServiceError> {
        match &self.base_url {
            Some(base) => Ok(format!("{}/rest/v1/{}", base, table)),
            None => Err(ServiceError::tracking(
                "Tracking backend is not configured",
                operation,
            )),
        }
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let request_id = context::current_request_id().unwrap_or_default();
        self.client
            .request(method, url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header("Prefer", "return=minimal")
            .header("X-Request-ID", request_id)
    }

    async fn send(
        &self,
        request: RequestBuilder,
        operation: &str,
        action: &str,
    ) -> Result<Response, ServiceError> {
        let result = match request.send().await {
            Ok(response) => response.error_for_status(),
            Err(e) => Err(e),
        };

        result.map_err(|e| {
            let message = if e.is_timeout() {
                format!("Timeout while {}", action)
            } else {
                format!("Backend request failed while {}", action)
            };
            logging::log(
                LogCategory::Ops,
                Level::ERROR,
                &format!("Error while {}", action),
                &json!({ "operation": operation, "error": e.to_string() }),
            );
            metrics::record_tracking_error(operation);
            ServiceError::tracking(message, operation)
        })
    }

    pub async fn track_prediction(&self, record: PredictionRecord<'_>) -> Result<(), ServiceError> {
        const OPERATION: &str = "track_prediction";
        let url = self.table_url(PREDICTIONS_TABLE, OPERATION)?;

        let body = json!({
            "id": record.prediction_id,
            "model_version_id": self.model_version,
            "input_text": record.input_text,
            "prediction": record.prediction,
            "confidence": record.confidence,
            "latency_ms": record.latency_ms,
            "created_at": Utc::now().to_rfc3339(),
            "request_id": context::current_request_id(),
            "user_id": context::current_user_id(),
            "context": context::get_all_metadata(),
        });

        logging::log(
            LogCategory::Ops,
            Level::INFO,
            "Tracking prediction",
            &json!({
                "prediction_id": record.prediction_id,
                "model_version": self.model_version,
                "latency_ms": record.latency_ms,
                "client_ip": context::get_metadata("client_ip", Value::Null),
            }),
        );

        self.send(
            self.request(Method::POST, &url).json(&body),
            OPERATION,
            "tracking prediction",
        )
        .await?;
        Ok(())
    }

    /// Store feedback and mark the prediction as having received it.
    /// Returns the new feedback id.
    pub async fn record_feedback(
        &self,
        prediction_id: &str,
        user_id: &str,
        correct_diagnosis: Option<&str>,
        feedback_text: Option<&str>,
        severity_reported: Option<&str>,
    ) -> Result<String, ServiceError> {
        const OPERATION: &str = "record_feedback";
        let feedback_url = self.table_url(FEEDBACK_TABLE, OPERATION)?;
        let predictions_url = self.table_url(PREDICTIONS_TABLE, OPERATION)?;
        let feedback_id = Uuid::new_v4().to_string();

        let body = json!({
            "id": feedback_id,
            "prediction_id": prediction_id,
            "user_id": user_id,
            "correct_diagnosis": correct_diagnosis,
            "feedback_text": feedback_text,
            "severity_reported": severity_reported,
            "created_at": Utc::now().to_rfc3339(),
            "request_id": context::current_request_id(),
            "context": context::get_all_metadata(),
        });

        logging::log(
            LogCategory::Ops,
            Level::INFO,
            "Recording feedback",
            &json!({ "feedback_id": feedback_id, "prediction_id": prediction_id }),
        );

        self.send(
            self.request(Method::POST, &feedback_url).json(&body),
            OPERATION,
            "recording feedback",
        )
        .await?;

        self.send(
            self.request(Method::PATCH, &predictions_url)
                .query(&[("id", format!("eq.{}", prediction_id))])
                .json(&json!({ "feedback_received": true })),
            OPERATION,
            "recording feedback",
        )
        .await?;

        Ok(feedback_id)
    }

    /// Append one metrics row; `metrics` keys are merged into the row
    pub async fn update_model_metrics(&self, metrics: Map<String, Value>) -> Result<(), ServiceError> {
        const OPERATION: &str = "update_model_metrics";
        let url = self.table_url(METRICS_TABLE, OPERATION)?;

        let mut row = Map::new();
        row.insert("id".into(), Uuid::new_v4().to_string().into());
        row.insert("model_version_id".into(), self.model_version.clone().into());
        row.insert("timestamp".into(), Utc::now().to_rfc3339().into());
        row.insert("request_id".into(), context::current_request_id().into());
        row.insert("context".into(), Value::Object(context::get_all_metadata()));

        logging::log(
            LogCategory::Ops,
            Level::INFO,
            "Updating model metrics",
            &json!({ "model_version": self.model_version, "metrics": metrics }),
        );
        row.extend(metrics);

        self.send(
            self.request(Method::POST, &url).json(&Value::Object(row)),
            OPERATION,
            "updating metrics",
        )
        .await?;
        Ok(())
    }

    /// Append one usage row for billing and analytics
    pub async fn track_usage(&self, record: UsageRecord<'_>) -> Result<(), ServiceError> {
        const OPERATION: &str = "track_usage";
        let url = self.table_url(USAGE_TABLE, OPERATION)?;

        let body = json!({
            "user_id": record.user_id,
            "timestamp": Utc::now().to_rfc3339(),
            "request_type": "symptom_analysis",
            "tokens_used": record.tokens_used,
            "model_used": record.model_used,
            "request_id": context::current_request_id(),
            "metadata": {
                "symptoms_count": record.symptoms_count(),
                "has_additional_context": record.has_additional_context,
                "diseases_analyzed": record.diseases_analyzed,
            },
        });

        self.send(
            self.request(Method::POST, &url).json(&body),
            OPERATION,
            "tracking usage",
        )
        .await?;
        Ok(())
    }

    pub async fn get_model_performance(
        &self,
        window: TimeWindow,
    ) -> Result<PerformanceSummary, ServiceError> {
        const OPERATION: &str = "get_model_performance";
        let url = self.table_url(METRICS_TABLE, OPERATION)?;
        let since = (Utc::now() - ChronoDuration::hours(window.hours())).to_rfc3339();

        let response = self
            .send(
                self.request(Method::GET, &url).query(&[
                    ("model_version_id", format!("eq.{}", self.model_version)),
                    ("timestamp", format!("gte.{}", since)),
                    ("order", "timestamp.desc".to_string()),
                ]),
                OPERATION,
                "fetching performance metrics",
            )
            .await?;

        let rows: Vec<Value> = response.json().await.map_err(|e| {
            logging::log(
                LogCategory::Ops,
                Level::ERROR,
                "Unreadable performance metrics response",
                &json!({ "operation": OPERATION, "error": e.to_string() }),
            );
            metrics::record_tracking_error(OPERATION);
            ServiceError::tracking("Unreadable backend response", OPERATION)
        })?;
        let summary = aggregate_metrics(&rows);

        logging::log(
            LogCategory::Ops,
            Level::INFO,
            "Retrieved model performance metrics",
            &json!({
                "model_version": self.model_version,
                "time_window_hours": window.hours(),
                "metrics_count": summary.metrics_count,
            }),
        );

        Ok(summary)
    }
}

/// Fold metrics rows, newest first, into one summary
pub fn aggregate_metrics(rows: &[Value]) -> PerformanceSummary {
    if rows.is_empty() {
        return PerformanceSummary::default();
    }

    let number = |row: &Value, key: &str| row.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    let total_requests: u64 = rows.iter().map(|r| number(r, "request_count") as u64).sum();
    let total_errors: u64 = rows.iter().map(|r| number(r, "error_count") as u64).sum();
    let average_latency_ms =
        rows.iter().map(|r| number(r, "average_latency_ms")).sum::<f64>() / rows.len() as f64;
    let max_drift_score = rows
        .iter()
        .map(|r| number(r, "drift_score"))
        .fold(0.0, f64::max);

    let timestamp = |row: Option<&Value>| {
        row.and_then(|r| r.get("timestamp"))
            .and_then(Value::as_str)
            .map(str::to_string)
    };

    PerformanceSummary {
        total_requests,
        total_errors,
        error_rate: if total_requests > 0 {
            total_errors as f64 / total_requests as f64
        } else {
            0.0
        },
        average_latency_ms,
        max_drift_score,
        metrics_count: rows.len(),
        time_range: TimeRange {
            start: timestamp(rows.last()),
            end: timestamp(rows.first()),
        },
    }
}
