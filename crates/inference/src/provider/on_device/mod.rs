//! Bundled-model classifier.
//!
//! The model runtime is pluggable; this module owns the labels file, the
//! readiness state and the argmax over the runtime's class probabilities.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use log::{error, info};
use serde::Deserialize;
use tokio::sync::RwLock;

use cassava_core::analysis::{
    derive_severity, BackendHealth, Diagnosis, InferenceClient, InferenceStrategy,
};
use cassava_core::errors::InferenceError;

use super::read_local_image;

/// Executes the bundled model.
#[async_trait]
pub trait ModelRuntime: Send + Sync {
    async fn load(&self, model_path: &Path) -> Result<(), InferenceError>;

    /// One probability per class, in labels-file order.
    async fn predict(&self, image: &[u8]) -> Result<Vec<f32>, InferenceError>;

    fn model_version(&self) -> Option<String> {
        None
    }
}

/// `labels.json` shipped next to the model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LabelsFile {
    pub classes: Vec<String>,
    #[serde(default)]
    pub treatments: HashMap<String, String>,
    #[serde(default)]
    pub recommendations: HashMap<String, Vec<String>>,
}

impl LabelsFile {
    pub async fn load(path: &Path) -> Result<Self, InferenceError> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            error!("[Classifier] Cannot read labels {}: {}", path.display(), e);
            InferenceError::ModelNotReady
        })?;
        let labels: Self = serde_json::from_str(&raw)
            .map_err(|e| InferenceError::malformed(format!("labels file: {}", e)))?;
        if labels.classes.is_empty() {
            return Err(InferenceError::malformed("labels file has no classes"));
        }
        Ok(labels)
    }
}

/// Index and value of the largest finite probability.
fn argmax(probabilities: &[f32]) -> Option<(usize, f32)> {
    probabilities
        .iter()
        .copied()
        .enumerate()
        .filter(|(_, p)| p.is_finite())
        .fold(None, |best, (i, p)| match best {
            Some((_, bp)) if bp >= p => best,
            _ => Some((i, p)),
        })
}

pub struct OnDeviceClassifier {
    runtime: Arc<dyn ModelRuntime>,
    model_path: PathBuf,
    labels_path: PathBuf,
    labels: RwLock<Option<Arc<LabelsFile>>>,
}

impl OnDeviceClassifier {
    pub fn new(
        runtime: Arc<dyn ModelRuntime>,
        model_path: impl Into<PathBuf>,
        labels_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runtime,
            model_path: model_path.into(),
            labels_path: labels_path.into(),
            labels: RwLock::new(None),
        }
    }

    pub async fn is_ready(&self) -> bool {
        self.labels.read().await.is_some()
    }
}

#[async_trait]
impl InferenceClient for OnDeviceClassifier {
    async fn initialize(&self) -> Result<(), InferenceError> {
        let mut labels = self.labels.write().await;
        if labels.is_some() {
            return Ok(());
        }

        let loaded = LabelsFile::load(&self.labels_path).await?;
        self.runtime.load(&self.model_path).await?;
        info!(
            "[Classifier] On-device model loaded from {} ({} classes)",
            self.model_path.display(),
            loaded.classes.len()
        );
        *labels = Some(Arc::new(loaded));
        Ok(())
    }

    async fn classify(&self, image_ref: &str) -> Result<Diagnosis, InferenceError> {
        let labels = self
            .labels
            .read()
            .await
            .clone()
            .ok_or(InferenceError::ModelNotReady)?;

        let image = read_local_image(image_ref).await?;
        let probabilities = self.runtime.predict(&image).await?;
        if probabilities.len() != labels.classes.len() {
            return Err(InferenceError::malformed(format!(
                "model returned {} scores for {} classes",
                probabilities.len(),
                labels.classes.len()
            )));
        }

        let (index, confidence) = argmax(&probabilities)
            .ok_or_else(|| InferenceError::malformed("model returned no finite scores"))?;
        let class = labels.classes[index].clone();
        let confidence = f64::from(confidence);

        let diagnosis = Diagnosis {
            severity: Some(derive_severity(&class, confidence)),
            treatment: labels.treatments.get(&class).cloned().unwrap_or_default(),
            recommendations: labels
                .recommendations
                .get(&class)
                .cloned()
                .unwrap_or_default(),
            model_version: self.runtime.model_version(),
            response_timestamp: None,
            label: class,
            confidence,
        };
        diagnosis.validate()?;
        Ok(diagnosis)
    }

    fn supports_offline(&self) -> bool {
        true
    }

    async fn health_check(&self) -> BackendHealth {
        if self.is_ready().await {
            BackendHealth::online(0)
        } else {
            BackendHealth::offline()
        }
    }

    fn strategy(&self) -> InferenceStrategy {
        InferenceStrategy::OnDevice
    }
}
