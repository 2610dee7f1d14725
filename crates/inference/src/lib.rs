//! Classifier strategies behind [`cassava_core::analysis::InferenceClient`].

pub mod provider;
pub mod settings;

pub use provider::on_device::{LabelsFile, ModelRuntime, OnDeviceClassifier};
pub use provider::remote_api::RemoteClassifier;
pub use settings::{build_classifier, InferenceSettings, SettingsError, StrategyKind};
