use axum::{extract::State, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::context;
use crate::metrics::ResourceUsage;
use crate::models::responses::PerformanceSummary;
use crate::monitoring::{DriftState, HealthStatus, ModelMetrics, MonitorPhase};
use crate::services::tracker::TimeWindow;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub request_id: Option<String>,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        request_id: context::current_request_id(),
    })
}

/// Monitor snapshot with latencies in milliseconds
#[derive(Debug, Serialize)]
pub struct MonitoringMetrics {
    pub latency_p95_ms: f64,
    pub latency_p99_ms: f64,
    pub error_rate: f64,
    pub request_count: usize,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

impl From<ModelMetrics> for MonitoringMetrics {
    fn from(metrics: ModelMetrics) -> Self {
        Self {
            latency_p95_ms: metrics.latency_p95 * 1000.0,
            latency_p99_ms: metrics.latency_p99 * 1000.0,
            error_rate: metrics.error_rate,
            request_count: metrics.request_count,
            last_error: metrics.last_error,
            last_updated: metrics.last_updated,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ModelHealthResponse {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub timestamp: String,
    pub model_name: String,
    pub model_version: String,
    pub llm_model: String,
    pub phase: MonitorPhase,
    pub monitoring_metrics: MonitoringMetrics,
    pub drift: DriftState,
    pub resource_metrics: ResourceUsage,
    /// Aggregate from the tracking backend; absent when unavailable
    pub tracked_performance: Option<PerformanceSummary>,
}

pub async fn model_health(State(state): State<Arc<AppState>>) -> Json<ModelHealthResponse> {
    let report = state.monitor.check_model_health();

    let tracked_performance = if state.tracker.is_enabled() {
        match state
            .tracker
            .get_model_performance(TimeWindow::Day)
            .await
        {
            Ok(summary) => Some(summary),
            Err(e) => {
                tracing::warn!("Tracked performance unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    Json(ModelHealthResponse {
        status: report.status,
        issues: report.issues,
        timestamp: Utc::now().to_rfc3339(),
        model_name: state.monitor.config().model_name.clone(),
        model_version: state.tracker.model_version().to_string(),
        llm_model: state.analyzer.llm_model().to_string(),
        phase: state.monitor.phase(),
        monitoring_metrics: report.metrics.into(),
        drift: state.monitor.drift_state(),
        resource_metrics: state.metrics.refresh_resource_gauges(),
        tracked_performance,
    })
}
