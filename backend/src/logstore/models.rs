use chrono::{DateTime, Utc};
use shared::{AnalysisData, VisionLogRecord};
use std::path::Path;

const UNKNOWN: &str = "unknown";

/// What the orchestrator hands the store; normalised into a
/// `VisionLogRecord` at write time.
#[derive(Debug, Clone, PartialEq)]
pub struct VisionLogInput {
    pub user_id: Option<String>,
    pub fruit: String,
    pub disease: String,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub image_path: String,
}

impl VisionLogInput {
    pub fn from_analysis(data: &AnalysisData, user_id: Option<String>, image_path: &Path) -> Self {
        Self {
            user_id,
            fruit: data.fruit.clone(),
            disease: data.disease.clone(),
            confidence: data.confidence,
            reasons: data.reasons.clone(),
            image_path: image_path.display().to_string(),
        }
    }

    pub fn into_record(self, created_at: DateTime<Utc>) -> VisionLogRecord {
        VisionLogRecord {
            user_id: self.user_id.filter(|id| !id.trim().is_empty()),
            fruit: or_unknown(self.fruit),
            disease: or_unknown(self.disease),
            confidence: if self.confidence.is_finite() && self.confidence >= 0.0 {
                self.confidence
            } else {
                0.0
            },
            reasons: self.reasons,
            image_path: self.image_path,
            created_at,
        }
    }
}

fn or_unknown(value: String) -> String {
    if value.trim().is_empty() {
        UNKNOWN.to_string()
    } else {
        value
    }
}
