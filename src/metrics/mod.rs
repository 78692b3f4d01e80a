//! Metrics Module for the Symptom Analysis API
//!
//! Provides Prometheus-compatible metrics for monitoring:
//! - API request metrics (latency, count, in-flight)
//! - Model metrics (prediction latency, errors, drift alerts)
//! - Rate limiting metrics (rejections, backend failures)
//! - Process resource gauges (CPU, memory), refreshed at scrape time

use metrics::{counter, gauge, histogram, Label};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder, PrometheusHandle};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use sysinfo::System;

/// Metric names as constants for consistency
pub mod names {
    // API Metrics
    pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
    pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
    pub const HTTP_REQUESTS_IN_FLIGHT: &str = "http_requests_in_flight";

    // Model Metrics
    pub const MODEL_PREDICTION_DURATION_SECONDS: &str = "model_prediction_duration_seconds";
    pub const MODEL_ERRORS_TOTAL: &str = "model_errors_total";
    pub const MODEL_DRIFT_ALERTS_TOTAL: &str = "model_drift_alerts_total";
    pub const MODEL_DRIFT_SCORE: &str = "model_drift_score";

    // Rate Limiting Metrics
    pub const RATE_LIMIT_REJECTIONS_TOTAL: &str = "rate_limit_rejections_total";
    pub const RATE_LIMIT_BACKEND_ERRORS_TOTAL: &str = "rate_limit_backend_errors_total";

    // Tracking Backend Metrics
    pub const TRACKING_ERRORS_TOTAL: &str = "tracking_errors_total";

    // System Metrics
    pub const SYSTEM_CPU_USAGE: &str = "system_cpu_usage";
    pub const SYSTEM_MEMORY_USAGE_BYTES: &str = "system_memory_usage_bytes";
}

/// Label keys
pub mod labels {
    pub const METHOD: &str = "method";
    pub const ENDPOINT: &str = "endpoint";
    pub const STATUS: &str = "status";
    pub const MODEL_NAME: &str = "model_name";
    pub const ERROR_TYPE: &str = "error_type";
    pub const BACKEND: &str = "backend";
    pub const OPERATION: &str = "operation";
}

const DURATION_BUCKETS: &[f64] = &[0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();
static INSTALL_LOCK: Mutex<()> = parking_lot::const_mutex(());

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ResourceUsage {
    pub cpu_usage_percent: f64,
    pub memory_usage_bytes: u64,
}

/// Handle over the process-wide recorder.
///
/// The recorder itself is global (the recording functions below write to it
/// from anywhere); the registry owns the exposition handle and the resource
/// sampler. Installing twice returns the already-installed recorder.
#[derive(Clone)]
pub struct MetricsRegistry {
    handle: PrometheusHandle,
    system: Arc<Mutex<System>>,
}

impl MetricsRegistry {
    pub fn install() -> Result<Self, BuildError> {
        Ok(Self {
            handle: global_handle()?,
            system: Arc::new(Mutex::new(System::new())),
        })
    }

    /// Sample CPU and memory usage into the system gauges
    pub fn refresh_resource_gauges(&self) -> ResourceUsage {
        let usage = {
            let mut system = self.system.lock();
            system.refresh_cpu();
            system.refresh_memory();
            ResourceUsage {
                cpu_usage_percent: system.global_cpu_info().cpu_usage() as f64,
                memory_usage_bytes: system.used_memory(),
            }
        };
        set_gauge(names::SYSTEM_CPU_USAGE, &[], usage.cpu_usage_percent);
        set_gauge(
            names::SYSTEM_MEMORY_USAGE_BYTES,
            &[],
            usage.memory_usage_bytes as f64,
        );
        usage
    }

    /// Text exposition of everything recorded so far
    pub fn render(&self) -> String {
        self.handle.render()
    }
}

fn global_handle() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let _guard = INSTALL_LOCK.lock();
    if let Some(handle) = HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(names::HTTP_REQUEST_DURATION_SECONDS.to_string()),
            DURATION_BUCKETS,
        )?
        .set_buckets_for_metric(
            Matcher::Full(names::MODEL_PREDICTION_DURATION_SECONDS.to_string()),
            DURATION_BUCKETS,
        )?
        .install_recorder()?;

    let _ = HANDLE.set(handle.clone());
    Ok(handle)
}

fn to_labels(labels: &[(&str, &str)]) -> Vec<Label> {
    labels
        .iter()
        .map(|(key, value)| Label::new(key.to_string(), value.to_string()))
        .collect()
}

// ============================================================================
// Generic recording
// ============================================================================

/// Increment a counter; unseen label sets are created on first use
pub fn increment_counter(name: &str, labels: &[(&str, &str)]) {
    counter!(name.to_string(), to_labels(labels)).increment(1);
}

pub fn observe_histogram(name: &str, labels: &[(&str, &str)], value: f64) {
    histogram!(name.to_string(), to_labels(labels)).record(value);
}

pub fn set_gauge(name: &str, labels: &[(&str, &str)], value: f64) {
    gauge!(name.to_string(), to_labels(labels)).set(value);
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request
pub fn record_http_request(method: &str, endpoint: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    increment_counter(
        names::HTTP_REQUESTS_TOTAL,
        &[
            (labels::ENDPOINT, endpoint),
            (labels::METHOD, method),
            (labels::STATUS, &status),
        ],
    );
    observe_histogram(
        names::HTTP_REQUEST_DURATION_SECONDS,
        &[(labels::ENDPOINT, endpoint), (labels::METHOD, method)],
        duration_secs,
    );
}

/// Track in-flight requests
pub fn adjust_http_requests_in_flight(delta: f64) {
    gauge!(names::HTTP_REQUESTS_IN_FLIGHT).increment(delta);
}

// ============================================================================
// Model Metrics
// ============================================================================

pub fn record_model_prediction(model_name: &str, duration_secs: f64) {
    observe_histogram(
        names::MODEL_PREDICTION_DURATION_SECONDS,
        &[(labels::MODEL_NAME, model_name)],
        duration_secs,
    );
}

pub fn record_model_error(model_name: &str, error_type: &str) {
    increment_counter(
        names::MODEL_ERRORS_TOTAL,
        &[(labels::MODEL_NAME, model_name), (labels::ERROR_TYPE, error_type)],
    );
}

pub fn record_drift_alert(model_name: &str, drift_score: f64) {
    increment_counter(
        names::MODEL_DRIFT_ALERTS_TOTAL,
        &[(labels::MODEL_NAME, model_name)],
    );
    set_gauge(
        names::MODEL_DRIFT_SCORE,
        &[(labels::MODEL_NAME, model_name)],
        drift_score,
    );
}

// ============================================================================
// Rate Limiting Metrics
// ============================================================================

pub fn record_rate_limited(endpoint: &str) {
    increment_counter(
        names::RATE_LIMIT_REJECTIONS_TOTAL,
        &[(labels::ENDPOINT, endpoint)],
    );
}

pub fn record_rate_limit_backend_error(backend: &str) {
    increment_counter(
        names::RATE_LIMIT_BACKEND_ERRORS_TOTAL,
        &[(labels::BACKEND, backend)],
    );
}

// ============================================================================
// Tracking Metrics
// ============================================================================

pub fn record_tracking_error(operation: &str) {
    increment_counter(
        names::TRACKING_ERRORS_TOTAL,
        &[(labels::OPERATION, operation)],
    );
}

// ============================================================================
// Timer Helper
// ============================================================================

/// Timer for measuring durations
pub struct Timer {
    start: Instant,
}

impl Timer {
    /// Create a new timer
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get elapsed time in seconds
    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let elapsed = timer.elapsed_secs();
        assert!(elapsed >= 0.01);
        assert!(elapsed < 1.0);
    }

    #[test]
    fn test_install_is_idempotent() {
        let first = MetricsRegistry::install();
        let second = MetricsRegistry::install();
        assert!(first.is_ok());
        assert!(second.is_ok());
    }

    #[test]
    fn test_counter_with_new_labels_appears_in_exposition() {
        let registry = MetricsRegistry::install().unwrap();
        increment_counter(
            "registry_test_events_total",
            &[("endpoint", "/registry-test"), ("status", "200")],
        );
        increment_counter(
            "registry_test_events_total",
            &[("endpoint", "/registry-test"), ("status", "200")],
        );

        let output = registry.render();
        let line = output
            .lines()
            .find(|l| l.starts_with("registry_test_events_total{") && l.contains("/registry-test"))
            .expect("counter line rendered");
        assert!(line.ends_with(" 2"));
    }

    #[test]
    fn test_histogram_and_gauge_exposition() {
        let registry = MetricsRegistry::install().unwrap();
        record_http_request("GET", "/histogram-test", 200, 0.3);
        observe_histogram(
            names::MODEL_PREDICTION_DURATION_SECONDS,
            &[(labels::MODEL_NAME, "histogram-test-model")],
            1.5,
        );
        set_gauge("registry_test_gauge", &[("kind", "latest")], 42.0);

        let output = registry.render();
        assert!(output.contains("http_request_duration_seconds_bucket"));
        assert!(output.contains("/histogram-test"));
        assert!(output.contains("histogram-test-model"));
        assert!(output
            .lines()
            .any(|l| l.starts_with("registry_test_gauge{") && l.contains(" 42")));
    }

    #[test]
    fn test_resource_gauges_rendered_after_refresh() {
        let registry = MetricsRegistry::install().unwrap();
        registry.refresh_resource_gauges();

        let output = registry.render();
        assert!(output.contains(names::SYSTEM_CPU_USAGE));
        assert!(output.contains(names::SYSTEM_MEMORY_USAGE_BYTES));
    }

    #[test]
    fn test_metric_names() {
        assert_eq!(names::HTTP_REQUESTS_TOTAL, "http_requests_total");
        assert_eq!(names::MODEL_DRIFT_ALERTS_TOTAL, "model_drift_alerts_total");
        assert_eq!(names::SYSTEM_CPU_USAGE, "system_cpu_usage");
    }
}
