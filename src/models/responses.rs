use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Disease {
    pub name: String,
    pub confidence: f64,
    #[serde(default)]
    pub symptoms_matched: Vec<String>,
    #[serde(default)]
    pub recommendation: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SymptomAnalysisResponse {
    pub possible_diseases: Vec<Disease>,
    pub analysis_summary: String,
    #[serde(default)]
    pub severity_level: Option<String>,
    #[serde(default)]
    pub seek_immediate_care: bool,
    #[serde(default)]
    pub prediction_id: Option<String>,
}

impl SymptomAnalysisResponse {
    /// Label used for drift tracking: the most confident disease
    pub fn predicted_label(&self) -> &str {
        self.possible_diseases
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .map(|d| d.name.as_str())
            .unwrap_or("unknown")
    }

    pub fn top_confidence(&self) -> f64 {
        self.possible_diseases
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackResponse {
    pub status: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback_id: Option<String>,
}

/// Body of every error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub error_code: String,
    pub error_type: String,
    pub request_id: String,
    pub timestamp: String,
}

impl ErrorResponse {
    pub fn new(
        message: impl Into<String>,
        error_code: impl Into<String>,
        error_type: impl Into<String>,
        request_id: impl Into<String>,
    ) -> Self {
        Self {
            message: message.into(),
            error_code: error_code.into(),
            error_type: error_type.into(),
            request_id: request_id.into(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Aggregate of tracked performance rows over a time window
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PerformanceSummary {
    pub total_requests: u64,
    pub total_errors: u64,
    pub error_rate: f64,
    pub average_latency_ms: f64,
    pub max_drift_score: f64,
    pub metrics_count: usize,
    pub time_range: TimeRange,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TimeRange {
    pub start: Option<String>,
    pub end: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disease(name: &str, confidence: f64) -> Disease {
        Disease {
            name: name.to_string(),
            confidence,
            symptoms_matched: vec![],
            recommendation: None,
        }
    }

    #[test]
    fn test_predicted_label_picks_most_confident() {
        let response = SymptomAnalysisResponse {
            possible_diseases: vec![disease("Cold", 0.4), disease("Influenza", 0.8)],
            analysis_summary: String::new(),
            severity_level: None,
            seek_immediate_care: false,
            prediction_id: None,
        };
        assert_eq!(response.predicted_label(), "Influenza");
        assert_eq!(response.top_confidence(), 0.8);
    }

    #[test]
    fn test_empty_analysis_has_unknown_label() {
        let response: SymptomAnalysisResponse =
            serde_json::from_str(r#"{"possible_diseases": [], "analysis_summary": "none"}"#).unwrap();
        assert_eq!(response.predicted_label(), "unknown");
        assert_eq!(response.top_confidence(), 0.0);
        assert!(!response.seek_immediate_care);
    }

    #[test]
    fn test_error_response_serializes_expected_fields() {
        let body = ErrorResponse::new("boom", "X", "Y", "req-1");
        let json = serde_json::to_value(&body).unwrap();
        for key in ["message", "error_code", "error_type", "request_id", "timestamp"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
    }
}
