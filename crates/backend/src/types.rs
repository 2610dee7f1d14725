//! Wire types for GoTrue, PostgREST and Storage.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cassava_core::analysis::{AnalysisRecord, NewAnalysis, SeverityLevel};

/// Authenticated user as reported by GoTrue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// Token grant response (`password` and `refresh_token` grants).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: Option<i64>,
    pub expires_at: Option<i64>,
    pub user: AuthUser,
}

/// GoTrue / PostgREST / Storage error bodies all fit this shape.
#[derive(Debug, Default, Deserialize)]
pub struct SupabaseErrorResponse {
    pub error: Option<String>,
    pub error_description: Option<String>,
    pub message: Option<String>,
    pub msg: Option<String>,
}

impl SupabaseErrorResponse {
    pub fn best_message(self) -> Option<String> {
        self.error_description
            .or(self.message)
            .or(self.msg)
            .or(self.error)
    }
}

/// In-memory session. `expires_at` is a unix timestamp in seconds.
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
    pub user: AuthUser,
}

impl AuthSession {
    pub fn from_token_response(response: TokenResponse) -> Self {
        let expires_at = response
            .expires_at
            .unwrap_or_else(|| Utc::now().timestamp() + response.expires_in.unwrap_or(3600));
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            expires_at,
            user: response.user,
        }
    }

    /// True when the access token expires within `buffer_secs` of `now`.
    pub fn needs_refresh(&self, now: i64, buffer_secs: i64) -> bool {
        self.expires_at - now <= buffer_secs
    }
}

/// Row of the `cassava_analyses` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteAnalysisRow {
    pub id: String,
    pub user_id: String,
    pub image_url: String,
    pub disease_detected: String,
    pub confidence_score: f64,
    #[serde(default)]
    pub severity_level: Option<String>,
    #[serde(default)]
    pub treatment_recommendation: Option<String>,
    #[serde(default)]
    pub recommendations: Option<Vec<String>>,
    #[serde(default)]
    pub analysis_metadata: Option<serde_json::Value>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

impl RemoteAnalysisRow {
    pub fn into_record(self) -> AnalysisRecord {
        AnalysisRecord {
            id: self.id,
            user_id: self.user_id,
            image_ref: self.image_url,
            disease_label: self.disease_detected,
            confidence_score: self.confidence_score,
            severity_level: self.severity_level.as_deref().and_then(SeverityLevel::parse),
            treatment_text: self.treatment_recommendation.unwrap_or_default(),
            recommendations: self.recommendations.unwrap_or_default(),
            analysis_metadata: self
                .analysis_metadata
                .unwrap_or_else(|| serde_json::json!({})),
            created_at: self.created_at.unwrap_or_else(|| Utc::now().to_rfc3339()),
            synced: true,
        }
    }
}

/// Insert body for `cassava_analyses`; id and `updated_at` are server-assigned.
#[derive(Debug, Clone, Serialize)]
pub struct InsertAnalysisRow<'a> {
    pub user_id: &'a str,
    pub image_url: &'a str,
    pub disease_detected: &'a str,
    pub confidence_score: f64,
    pub severity_level: Option<&'static str>,
    pub treatment_recommendation: &'a str,
    pub recommendations: &'a [String],
    pub analysis_metadata: &'a serde_json::Value,
    pub created_at: &'a str,
}

impl<'a> InsertAnalysisRow<'a> {
    pub fn from_new(analysis: &'a NewAnalysis, user_id: &'a str) -> Self {
        Self {
            user_id,
            image_url: &analysis.image_ref,
            disease_detected: &analysis.disease_label,
            confidence_score: analysis.confidence_score,
            severity_level: analysis.severity_level.map(|s| s.as_str()),
            treatment_recommendation: &analysis.treatment_text,
            recommendations: &analysis.recommendations,
            analysis_metadata: &analysis.analysis_metadata,
            created_at: &analysis.created_at,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ImageUrlRow {
    pub image_url: Option<String>,
}
