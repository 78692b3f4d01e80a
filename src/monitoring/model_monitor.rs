//! Sliding-window model monitor
//!
//! Tracks prediction latency and error rate over a time window and compares
//! the label distribution of the most recent predictions against a reference
//! distribution. One instance is built at startup and shared via `AppState`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

use super::drift::{kl_divergence, label_distribution, Distribution};
use crate::config::MonitoringSettings;
use crate::errors::ServiceError;
use crate::metrics;

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub model_name: String,
    pub metrics_window: Duration,
    pub drift_enabled: bool,
    pub drift_window_size: usize,
    pub drift_threshold: f64,
    pub latency_p95_threshold_secs: f64,
    pub error_rate_threshold: f64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from(&MonitoringSettings::default())
    }
}

impl From<&MonitoringSettings> for MonitorConfig {
    fn from(settings: &MonitoringSettings) -> Self {
        Self {
            model_name: settings.model_name.clone(),
            metrics_window: Duration::from_secs(settings.metrics_window_secs),
            drift_enabled: settings.drift_enabled,
            drift_window_size: settings.drift_window_size,
            drift_threshold: settings.drift_threshold,
            latency_p95_threshold_secs: settings.latency_p95_threshold_secs,
            error_rate_threshold: settings.error_rate_threshold,
        }
    }
}

/// Snapshot over the samples currently inside the window. Latencies in seconds.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ModelMetrics {
    pub latency_p95: f64,
    pub latency_p99: f64,
    pub error_rate: f64,
    pub request_count: usize,
    pub last_error: Option<String>,
    pub last_updated: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorPhase {
    /// No samples recorded
    Idle,
    /// Samples arriving, drift checks not yet possible
    Accumulating,
    /// Drift checks run on every recorded prediction
    Monitoring,
}

#[derive(Debug, Clone, Serialize)]
pub struct DriftState {
    pub reference_distribution: Option<Distribution>,
    pub recent_distribution: Distribution,
    pub drift_score: f64,
    pub threshold: f64,
    pub buffered_predictions: usize,
    pub alerts: u64,
    pub last_check: Option<DateTime<Utc>>,
}

/// Outcome of one drift check
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftReport {
    pub score: f64,
    pub drifted: bool,
}

#[derive(Debug)]
struct PredictionSample {
    recorded_at: Instant,
    latency_secs: f64,
    failed: bool,
}

#[derive(Debug)]
struct MonitorState {
    samples: VecDeque<PredictionSample>,
    recent_labels: VecDeque<String>,
    reference: Option<Distribution>,
    last_error: Option<String>,
    last_updated: DateTime<Utc>,
    drift_score: f64,
    drift_alerts: u64,
    last_drift_check: Option<DateTime<Utc>>,
    ever_recorded: bool,
}

pub struct ModelMonitor {
    config: MonitorConfig,
    state: Mutex<MonitorState>,
}

impl ModelMonitor {
    pub fn new(config: MonitorConfig) -> Self {
        Self {
            state: Mutex::new(MonitorState {
                samples: VecDeque::new(),
                recent_labels: VecDeque::with_capacity(config.drift_window_size),
                reference: None,
                last_error: None,
                last_updated: Utc::now(),
                drift_score: 0.0,
                drift_alerts: 0,
                last_drift_check: None,
                ever_recorded: false,
            }),
            config,
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Record one served prediction and run a drift check.
    ///
    /// Returns the drift check outcome when a check ran.
    pub fn record_prediction(
        &self,
        latency: Duration,
        label: &str,
        error: Option<&str>,
    ) -> Option<DriftReport> {
        self.record_prediction_at(Instant::now(), latency, label, error)
    }

    pub fn record_prediction_at(
        &self,
        now: Instant,
        latency: Duration,
        label: &str,
        error: Option<&str>,
    ) -> Option<DriftReport> {
        self.record_at(now, latency, Some(label), error)
    }

    /// Record a request that produced no prediction. It counts toward
    /// latency and error rate but never enters the drift window.
    pub fn record_failure(&self, latency: Duration, error: &str) {
        self.record_failure_at(Instant::now(), latency, error);
    }

    pub fn record_failure_at(&self, now: Instant, latency: Duration, error: &str) {
        self.record_at(now, latency, None, Some(error));
    }

    fn record_at(
        &self,
        now: Instant,
        latency: Duration,
        label: Option<&str>,
        error: Option<&str>,
    ) -> Option<DriftReport> {
        let outcome = {
            let mut state = self.state.lock();
            self.evict_expired(&mut state, now);

            state.samples.push_back(PredictionSample {
                recorded_at: now,
                latency_secs: latency.as_secs_f64(),
                failed: error.is_some(),
            });
            if let Some(message) = error {
                state.last_error = Some(message.to_string());
            }
            state.last_updated = Utc::now();
            state.ever_recorded = true;

            match label {
                Some(label) => {
                    state.recent_labels.push_back(label.to_string());
                    while state.recent_labels.len() > self.config.drift_window_size {
                        state.recent_labels.pop_front();
                    }
                    self.check_drift(&mut state)
                }
                None => None,
            }
        };

        metrics::record_model_prediction(&self.config.model_name, latency.as_secs_f64());
        if let Some(message) = error {
            metrics::record_model_error(&self.config.model_name, "prediction_failure");
            error!(model = %self.config.model_name, error = %message, "Model prediction failed");
        }

        match outcome {
            Some(Ok(report)) => {
                if report.drifted {
                    warn!(
                        model = %self.config.model_name,
                        drift_score = report.score,
                        threshold = self.config.drift_threshold,
                        "Significant drift detected! Score: {:.4}",
                        report.score
                    );
                    metrics::record_drift_alert(&self.config.model_name, report.score);
                }
                Some(report)
            }
            Some(Err(err)) => {
                error!(model = %self.config.model_name, error = %err, "Drift check failed");
                None
            }
            None => None,
        }
    }

    fn evict_expired(&self, state: &mut MonitorState, now: Instant) {
        let Some(cutoff) = now.checked_sub(self.config.metrics_window) else {
            return;
        };
        while state
            .samples
            .front()
            .is_some_and(|sample| sample.recorded_at < cutoff)
        {
            state.samples.pop_front();
        }
    }

    fn check_drift(&self, state: &mut MonitorState) -> Option<Result<DriftReport, ServiceError>> {
        if !self.config.drift_enabled || state.recent_labels.len() < self.config.drift_window_size {
            return None;
        }
        let reference = state.reference.as_ref()?;

        let recent = label_distribution(state.recent_labels.iter());
        let score = kl_divergence(reference, &recent);
        state.last_drift_check = Some(Utc::now());

        if !score.is_finite() {
            return Some(Err(ServiceError::drift(
                "KL divergence is not finite",
                Some(score),
            )));
        }

        state.drift_score = score;
        let drifted = score > self.config.drift_threshold;
        if drifted {
            state.drift_alerts += 1;
        }
        Some(Ok(DriftReport { score, drifted }))
    }

    pub fn get_current_metrics(&self) -> ModelMetrics {
        self.get_current_metrics_at(Instant::now())
    }

    pub fn get_current_metrics_at(&self, now: Instant) -> ModelMetrics {
        let state = self.state.lock();
        let cutoff = now.checked_sub(self.config.metrics_window);
        let in_window = state
            .samples
            .iter()
            .filter(|sample| cutoff.map_or(true, |c| sample.recorded_at >= c));

        let mut latencies = Vec::new();
        let mut failures = 0usize;
        for sample in in_window {
            latencies.push(sample.latency_secs);
            if sample.failed {
                failures += 1;
            }
        }

        if latencies.is_empty() {
            return ModelMetrics {
                latency_p95: 0.0,
                latency_p99: 0.0,
                error_rate: 0.0,
                request_count: 0,
                last_error: None,
                last_updated: state.last_updated,
            };
        }

        latencies.sort_by(f64::total_cmp);
        let count = latencies.len();

        ModelMetrics {
            latency_p95: percentile(&latencies, 95.0),
            latency_p99: percentile(&latencies, 99.0),
            error_rate: failures as f64 / count as f64,
            request_count: count,
            last_error: state.last_error.clone(),
            last_updated: state.last_updated,
        }
    }

    pub fn check_model_health(&self) -> HealthReport {
        self.check_model_health_at(Instant::now())
    }

    pub fn check_model_health_at(&self, now: Instant) -> HealthReport {
        let metrics = self.get_current_metrics_at(now);
        let mut status = HealthStatus::Healthy;
        let mut issues = Vec::new();

        if metrics.latency_p95 > self.config.latency_p95_threshold_secs {
            issues.push(format!(
                "High latency detected (p95 > {}s)",
                self.config.latency_p95_threshold_secs
            ));
            status = HealthStatus::Degraded;
        }

        if metrics.error_rate > self.config.error_rate_threshold {
            issues.push(format!(
                "High error rate detected ({:.1}%)",
                metrics.error_rate * 100.0
            ));
            status = HealthStatus::Degraded;
        }

        if metrics.request_count == 0 {
            issues.push("No requests in current window".to_string());
            status = HealthStatus::Unknown;
        }

        if status == HealthStatus::Degraded {
            let err = ServiceError::PerformanceDegradation {
                message: issues.join("; "),
                metrics: json!({
                    "latency_p95": metrics.latency_p95,
                    "error_rate": metrics.error_rate,
                    "request_count": metrics.request_count,
                }),
            };
            warn!(model = %self.config.model_name, "{}", err);
        }

        HealthReport {
            status,
            issues,
            metrics,
        }
    }

    /// Replace the reference distribution; empty input leaves it unchanged
    pub fn set_reference_distribution<I, S>(&self, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let distribution = label_distribution(labels);
        if distribution.is_empty() {
            return;
        }
        self.state.lock().reference = Some(distribution);
        info!(model = %self.config.model_name, "Reference distribution updated for drift detection");
    }

    pub fn phase(&self) -> MonitorPhase {
        let state = self.state.lock();
        if !state.ever_recorded {
            MonitorPhase::Idle
        } else if state.reference.is_none()
            || state.recent_labels.len() < self.config.drift_window_size
        {
            MonitorPhase::Accumulating
        } else {
            MonitorPhase::Monitoring
        }
    }

    pub fn drift_state(&self) -> DriftState {
        let state = self.state.lock();
        DriftState {
            reference_distribution: state.reference.clone(),
            recent_distribution: label_distribution(state.recent_labels.iter()),
            drift_score: state.drift_score,
            threshold: self.config.drift_threshold,
            buffered_predictions: state.recent_labels.len(),
            alerts: state.drift_alerts,
            last_check: state.last_drift_check,
        }
    }
}

/// Linear interpolation between closest ranks over sorted input
fn percentile(sorted: &[f64], pct: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = pct / 100.0 * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    sorted[lower] + (sorted[upper] - sorted[lower]) * (rank - lower as f64)
}
