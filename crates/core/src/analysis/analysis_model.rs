//! Diagnosis record models.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::errors::{InferenceError, Result};

/// Label stored on placeholder records when classification failed.
pub const FAILED_ANALYSIS_LABEL: &str = "Analysis Failed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeverityLevel {
    Low,
    Moderate,
    High,
}

impl SeverityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Moderate => "moderate",
            Self::High => "high",
        }
    }

    /// Parses the severity spellings seen from classifiers and stored rows.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "low" | "faible" => Some(Self::Low),
            "moderate" | "medium" | "modérée" | "moderee" => Some(Self::Moderate),
            "high" | "severe" | "élevée" | "elevee" => Some(Self::High),
            _ => None,
        }
    }
}

/// Which inference strategy produced a diagnosis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InferenceStrategy {
    RemoteApi,
    OnDevice,
}

impl InferenceStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RemoteApi => "remote_api",
            Self::OnDevice => "on_device",
        }
    }
}

/// Output of one classifier call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diagnosis {
    pub label: String,
    pub confidence: f64,
    pub severity: Option<SeverityLevel>,
    pub treatment: String,
    pub recommendations: Vec<String>,
    pub model_version: Option<String>,
    /// Timestamp reported by a remote classifier, if any.
    pub response_timestamp: Option<String>,
}

impl Diagnosis {
    /// Rejects confidences outside [0, 1]; a classifier returning one is broken.
    pub fn validate(&self) -> std::result::Result<(), InferenceError> {
        if self.label.trim().is_empty() {
            return Err(InferenceError::malformed("empty label"));
        }
        if !self.confidence.is_finite() || !(0.0..=1.0).contains(&self.confidence) {
            return Err(InferenceError::malformed(format!(
                "confidence {} outside [0, 1]",
                self.confidence
            )));
        }
        Ok(())
    }
}

/// A diagnosis that has not been given an identity by either store yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewAnalysis {
    pub user_id: String,
    pub image_ref: String,
    pub disease_label: String,
    pub confidence_score: f64,
    pub severity_level: Option<SeverityLevel>,
    pub treatment_text: String,
    pub recommendations: Vec<String>,
    pub analysis_metadata: serde_json::Value,
    pub created_at: String,
}

impl NewAnalysis {
    pub fn from_diagnosis(
        user_id: &str,
        image_ref: &str,
        diagnosis: &Diagnosis,
        strategy: InferenceStrategy,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        let mut metadata = serde_json::json!({
            "analysis_type": strategy.as_str(),
            "timestamp": now,
        });
        if let Some(version) = &diagnosis.model_version {
            metadata["model_version"] = serde_json::Value::String(version.clone());
        }
        if let Some(ts) = &diagnosis.response_timestamp {
            metadata["response_timestamp"] = serde_json::Value::String(ts.clone());
        }

        Self {
            user_id: user_id.to_string(),
            image_ref: image_ref.to_string(),
            disease_label: diagnosis.label.clone(),
            confidence_score: diagnosis.confidence,
            severity_level: diagnosis.severity,
            treatment_text: diagnosis.treatment.clone(),
            recommendations: diagnosis.recommendations.clone(),
            analysis_metadata: metadata,
            created_at: now,
        }
    }

    /// Placeholder documenting a failed classification so the user can retry.
    pub fn failed(
        user_id: &str,
        image_ref: &str,
        strategy: InferenceStrategy,
        error: &InferenceError,
    ) -> Self {
        let now = Utc::now().to_rfc3339();
        Self {
            user_id: user_id.to_string(),
            image_ref: image_ref.to_string(),
            disease_label: FAILED_ANALYSIS_LABEL.to_string(),
            confidence_score: 0.0,
            severity_level: None,
            treatment_text: String::new(),
            recommendations: Vec::new(),
            analysis_metadata: serde_json::json!({
                "analysis_type": strategy.as_str(),
                "timestamp": now,
                "error": error.to_string(),
            }),
            created_at: now,
        }
    }

    pub fn into_record(self, id: String, synced: bool) -> AnalysisRecord {
        AnalysisRecord {
            id,
            user_id: self.user_id,
            image_ref: self.image_ref,
            disease_label: self.disease_label,
            confidence_score: self.confidence_score,
            severity_level: self.severity_level,
            treatment_text: self.treatment_text,
            recommendations: self.recommendations,
            analysis_metadata: self.analysis_metadata,
            created_at: self.created_at,
            synced,
        }
    }
}

/// The central diagnosis entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRecord {
    pub id: String,
    pub user_id: String,
    pub image_ref: String,
    pub disease_label: String,
    pub confidence_score: f64,
    pub severity_level: Option<SeverityLevel>,
    pub treatment_text: String,
    pub recommendations: Vec<String>,
    pub analysis_metadata: serde_json::Value,
    pub created_at: String,
    pub synced: bool,
}

impl AnalysisRecord {
    pub fn to_new_analysis(&self) -> NewAnalysis {
        NewAnalysis {
            user_id: self.user_id.clone(),
            image_ref: self.image_ref.clone(),
            disease_label: self.disease_label.clone(),
            confidence_score: self.confidence_score,
            severity_level: self.severity_level,
            treatment_text: self.treatment_text.clone(),
            recommendations: self.recommendations.clone(),
            analysis_metadata: self.analysis_metadata.clone(),
            created_at: self.created_at.clone(),
        }
    }

    pub fn is_failed_placeholder(&self) -> bool {
        self.disease_label == FAILED_ANALYSIS_LABEL
    }

    /// True when the image still lives on the device and must be uploaded.
    pub fn has_local_image(&self) -> bool {
        !is_remote_url(&self.image_ref)
    }
}

pub fn is_remote_url(image_ref: &str) -> bool {
    image_ref.starts_with("https://") || image_ref.starts_with("http://")
}

/// What callers get back from analysis and listing operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    #[serde(flatten)]
    pub record: AnalysisRecord,
    pub is_offline: bool,
}

impl AnalysisResult {
    pub fn online(record: AnalysisRecord) -> Self {
        Self {
            record,
            is_offline: false,
        }
    }

    pub fn offline(record: AnalysisRecord) -> Self {
        Self {
            record,
            is_offline: true,
        }
    }
}

/// Newest first, by `created_at` instant.
pub fn sort_newest_first(records: &mut [AnalysisRecord]) {
    records.sort_by(|a, b| created_at_millis(&b.created_at).cmp(&created_at_millis(&a.created_at)));
}

fn created_at_millis(value: &str) -> i64 {
    chrono::DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(i64::MIN)
}

pub(crate) fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(crate::errors::Error::validation(format!(
            "{} must not be empty",
            field
        )));
    }
    Ok(())
}
