//! Classifier selection from the environment.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use cassava_core::analysis::InferenceClient;
use cassava_core::errors::InferenceError;

use crate::provider::on_device::{ModelRuntime, OnDeviceClassifier};
use crate::provider::remote_api::RemoteClassifier;

pub const ENV_STRATEGY: &str = "CASSAVA_INFERENCE_STRATEGY";
pub const ENV_API_URL: &str = "CASSAVA_API_URL";
pub const ENV_API_KEY: &str = "CASSAVA_API_KEY";
pub const ENV_MODEL_PATH: &str = "CASSAVA_MODEL_PATH";
pub const ENV_LABELS_PATH: &str = "CASSAVA_LABELS_PATH";

const DEFAULT_MODEL_PATH: &str = "assets/models/cassava-model.json";
const DEFAULT_LABELS_PATH: &str = "assets/models/labels.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Remote,
    OnDevice,
}

impl StrategyKind {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "remote" | "remote_api" | "api" => Some(Self::Remote),
            "on_device" | "local" => Some(Self::OnDevice),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Unknown inference strategy '{0}' (expected remote or on_device)")]
    UnknownStrategy(String),

    #[error("{0} is required for the remote classifier")]
    MissingApiUrl(&'static str),

    #[error("On-device inference selected but no model runtime was provided")]
    MissingRuntime,

    #[error(transparent)]
    Client(#[from] InferenceError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InferenceSettings {
    pub strategy: StrategyKind,
    pub api_url: Option<String>,
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    pub model_path: PathBuf,
    pub labels_path: PathBuf,
}

impl Default for InferenceSettings {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Remote,
            api_url: None,
            api_key: None,
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            labels_path: PathBuf::from(DEFAULT_LABELS_PATH),
        }
    }
}

impl InferenceSettings {
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, SettingsError> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let defaults = Self::default();

        let strategy = match get(ENV_STRATEGY) {
            Some(raw) => StrategyKind::parse(&raw).ok_or(SettingsError::UnknownStrategy(raw))?,
            None => defaults.strategy,
        };

        Ok(Self {
            strategy,
            api_url: get(ENV_API_URL),
            api_key: get(ENV_API_KEY),
            model_path: get(ENV_MODEL_PATH).map(PathBuf::from).unwrap_or(defaults.model_path),
            labels_path: get(ENV_LABELS_PATH)
                .map(PathBuf::from)
                .unwrap_or(defaults.labels_path),
        })
    }
}

/// Builds the configured classifier. `runtime` is only consulted for
/// on-device inference.
pub fn build_classifier(
    settings: &InferenceSettings,
    runtime: Option<Arc<dyn ModelRuntime>>,
) -> Result<Arc<dyn InferenceClient>, SettingsError> {
    match settings.strategy {
        StrategyKind::Remote => {
            let url = settings
                .api_url
                .as_deref()
                .ok_or(SettingsError::MissingApiUrl(ENV_API_URL))?;
            log::info!("[Classifier] Using remote classifier at {}", url);
            Ok(Arc::new(RemoteClassifier::new(url, settings.api_key.clone())?))
        }
        StrategyKind::OnDevice => {
            let runtime = runtime.ok_or(SettingsError::MissingRuntime)?;
            log::info!("[Classifier] Using on-device model {}", settings.model_path.display());
            Ok(Arc::new(OnDeviceClassifier::new(
                runtime,
                settings.model_path.clone(),
                settings.labels_path.clone(),
            )))
        }
    }
}
