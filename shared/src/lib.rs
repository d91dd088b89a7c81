use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Classifier verdict as handed back to callers.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisData {
    pub fruit: String,
    pub disease: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisSuccess {
    pub success: bool,
    pub data: AnalysisData,
}

impl AnalysisSuccess {
    pub fn new(data: AnalysisData) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisFailure {
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
}

impl AnalysisFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            error: None,
            code: None,
            raw_output: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_code(mut self, code: Option<i32>) -> Self {
        self.code = code;
        self
    }

    pub fn with_raw_output(mut self, raw_output: impl Into<String>) -> Self {
        self.raw_output = Some(raw_output.into());
        self
    }
}

/// Which of the two log backends accepted a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum StorageBackend {
    Primary,
    Secondary,
}

/// Persisted outcome of one successful analysis. Field names are the
/// contract shared by every backend.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VisionLogRecord {
    pub user_id: Option<String>,
    pub fruit: String,
    pub disease: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub image_path: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogStoreHealth {
    pub primary_enabled: bool,
    pub secondary_enabled: bool,
    pub primary_writes: u64,
    pub secondary_writes: u64,
    pub primary_fallbacks: u64,
    pub failed_writes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_body_omits_absent_fields() {
        let body = AnalysisFailure::new("Vision analisis gagal").with_error("blurry");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "success": false,
                "message": "Vision analisis gagal",
                "error": "blurry"
            })
        );
    }

    #[test]
    fn failure_body_uses_camel_case_raw_output() {
        let body = AnalysisFailure::new("Error parsing hasil vision")
            .with_error("expected value")
            .with_raw_output("not json");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["rawOutput"], "not json");
        assert!(json.get("code").is_none());
    }

    #[test]
    fn storage_backend_names() {
        assert_eq!(StorageBackend::Primary.to_string(), "primary");
        assert_eq!(StorageBackend::Secondary.as_ref(), "secondary");
        assert_eq!(
            serde_json::to_string(&StorageBackend::Secondary).unwrap(),
            "\"secondary\""
        );
    }

    #[test]
    fn log_record_serializes_null_user() {
        let record = VisionLogRecord {
            user_id: None,
            fruit: "apple".into(),
            disease: "scab".into(),
            confidence: 0.91,
            reasons: vec!["lesion pattern".into()],
            image_path: "/tmp/leaf.jpg".into(),
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert!(json["userId"].is_null());
        assert_eq!(json["imagePath"], "/tmp/leaf.jpg");
        assert!(json.get("createdAt").is_some());
    }
}
