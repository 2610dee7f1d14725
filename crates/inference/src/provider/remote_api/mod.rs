//! FastAPI classifier client.
//!
//! `POST {base}/predict` takes the leaf photo as multipart field `file` and
//! answers with a JSON prediction. Deployments disagree on the field names, so
//! the parser accepts the known aliases.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use log::{debug, warn};
use reqwest::{multipart, Client};
use serde_json::Value;

use cassava_core::analysis::{
    is_remote_url, BackendHealth, Diagnosis, InferenceClient, InferenceStrategy, SeverityLevel,
};
use cassava_core::errors::InferenceError;

use super::read_local_image;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const MAX_DETAIL_CHARS: usize = 512;

const LABEL_KEYS: [&str; 4] = ["predicted_class", "label", "disease", "class"];

pub struct RemoteClassifier {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RemoteClassifier {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, InferenceError> {
        Self::with_timeout(base_url, api_key, REQUEST_TIMEOUT)
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Network(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        })
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn image_bytes(&self, image_ref: &str) -> Result<Vec<u8>, InferenceError> {
        if !is_remote_url(image_ref) {
            return read_local_image(image_ref).await;
        }

        let response = self
            .client
            .get(image_ref)
            .send()
            .await
            .map_err(transport_error)?;
        if !response.status().is_success() {
            return Err(InferenceError::ImageUnreadable(image_ref.to_string()));
        }
        let bytes = response.bytes().await.map_err(transport_error)?;
        Ok(bytes.to_vec())
    }
}

fn transport_error(err: reqwest::Error) -> InferenceError {
    if err.is_timeout() {
        InferenceError::Timeout
    } else {
        InferenceError::Network(err.to_string())
    }
}

fn mime_for(image_ref: &str) -> &'static str {
    let lower = image_ref.to_ascii_lowercase();
    if lower.ends_with(".png") {
        "image/png"
    } else if lower.ends_with(".webp") {
        "image/webp"
    } else {
        "image/jpeg"
    }
}

fn file_name_for(image_ref: &str) -> String {
    image_ref
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or("leaf.jpg")
        .to_string()
}

/// FastAPI puts the reason under `detail`, either a string or a list of
/// validation errors.
fn error_detail(body: &str) -> String {
    let detail = match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => match map.get("detail") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => body.to_string(),
        },
        _ => body.to_string(),
    };
    detail.chars().take(MAX_DETAIL_CHARS).collect()
}

/// Accepts `0.925`, `"0.925"` and `"92.5%"`.
pub fn parse_confidence(value: &Value) -> Result<f64, InferenceError> {
    let confidence = match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| InferenceError::malformed("confidence is not a float"))?,
        Value::String(s) => {
            let trimmed = s.trim();
            match trimmed.strip_suffix('%') {
                Some(percent) => {
                    percent
                        .trim()
                        .parse::<f64>()
                        .map_err(|_| InferenceError::malformed(format!("confidence '{}'", s)))?
                        / 100.0
                }
                None => trimmed
                    .parse::<f64>()
                    .map_err(|_| InferenceError::malformed(format!("confidence '{}'", s)))?,
            }
        }
        Value::Null => return Err(InferenceError::malformed("missing confidence")),
        other => {
            return Err(InferenceError::malformed(format!(
                "confidence has unexpected type: {}",
                other
            )))
        }
    };

    if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
        return Err(InferenceError::malformed(format!(
            "confidence {} outside [0, 1]",
            confidence
        )));
    }
    Ok(confidence)
}

/// Maps a `/predict` body to a [`Diagnosis`].
pub fn parse_prediction(body: &Value) -> Result<Diagnosis, InferenceError> {
    let label = LABEL_KEYS
        .iter()
        .filter_map(|key| body.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .find(|label| !label.is_empty())
        .ok_or_else(|| InferenceError::malformed("no class label in response"))?
        .to_string();

    let confidence = parse_confidence(body.get("confidence").unwrap_or(&Value::Null))?;

    let text = |key: &str| {
        body.get(key)
            .and_then(Value::as_str)
            .map(str::to_string)
            .filter(|s| !s.is_empty())
    };

    let recommendations = body
        .get("recommendations")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let diagnosis = Diagnosis {
        label,
        confidence,
        severity: text("severity").as_deref().and_then(SeverityLevel::parse),
        treatment: text("treatment").unwrap_or_default(),
        recommendations,
        model_version: text("model_version"),
        response_timestamp: text("timestamp"),
    };
    diagnosis.validate()?;
    Ok(diagnosis)
}

#[async_trait]
impl InferenceClient for RemoteClassifier {
    async fn initialize(&self) -> Result<(), InferenceError> {
        Ok(())
    }

    async fn classify(&self, image_ref: &str) -> Result<Diagnosis, InferenceError> {
        let bytes = self.image_bytes(image_ref).await?;
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name_for(image_ref))
            .mime_str(mime_for(image_ref))
            .map_err(|e| InferenceError::malformed(e.to_string()))?;
        let form = multipart::Form::new().part("file", part);

        debug!("[Classifier] POST {}/predict", self.base_url);
        let response = self
            .authorize(self.client.post(format!("{}/predict", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let detail = error_detail(&body);
            warn!("[Classifier] Prediction failed ({}): {}", status, detail);
            return Err(InferenceError::Http {
                status: status.as_u16(),
                detail,
            });
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| InferenceError::malformed(format!("invalid JSON: {}", e)))?;
        parse_prediction(&value)
    }

    fn supports_offline(&self) -> bool {
        false
    }

    async fn health_check(&self) -> BackendHealth {
        let started = Instant::now();
        let result = self
            .authorize(self.client.get(format!("{}/health", self.base_url)))
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {
                BackendHealth::online(started.elapsed().as_millis() as u64)
            }
            Ok(response) => {
                debug!("[Classifier] Health check returned {}", response.status());
                BackendHealth::offline()
            }
            Err(e) => {
                debug!("[Classifier] Health check failed: {}", e);
                BackendHealth::offline()
            }
        }
    }

    fn strategy(&self) -> InferenceStrategy {
        InferenceStrategy::RemoteApi
    }
}

#[cfg(test)]
mod tests;
