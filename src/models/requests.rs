use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SymptomAnalysisRequest {
    /// Description of symptoms in natural language
    #[validate(length(min = 3, max = 5000))]
    pub symptoms: String,
    /// Additional patient context or medical history
    #[validate(length(max = 5000))]
    pub additional_context: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct FeedbackRequest {
    #[validate(length(min = 1, max = 128))]
    pub prediction_id: String,
    pub correct_diagnosis: Option<String>,
    #[validate(length(max = 5000))]
    pub feedback_text: Option<String>,
    pub severity_reported: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use fake::faker::lorem::en::Sentence;
    use fake::Fake;

    #[test]
    fn test_symptom_request_validation() {
        let symptoms: String = Sentence(3..10).fake();
        let request = SymptomAnalysisRequest {
            symptoms,
            additional_context: None,
        };
        assert!(request.validate().is_ok());

        let too_short = SymptomAnalysisRequest {
            symptoms: "a".to_string(),
            additional_context: None,
        };
        assert!(too_short.validate().is_err());
    }

    #[test]
    fn test_feedback_request_deserialization() {
        let request: FeedbackRequest = serde_json::from_str(
            r#"{"prediction_id": "p-1", "correct_diagnosis": "Migraine"}"#,
        )
        .unwrap();
        assert_eq!(request.prediction_id, "p-1");
        assert_eq!(request.correct_diagnosis.as_deref(), Some("Migraine"));
        assert!(request.feedback_text.is_none());
        assert!(request.validate().is_ok());
    }
}
