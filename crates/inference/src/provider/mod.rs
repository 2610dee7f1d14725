//! Classifier implementations.
//!
//! - `remote_api`: FastAPI service reached over HTTP, online only
//! - `on_device`: bundled model behind a pluggable [`on_device::ModelRuntime`]

pub mod on_device;
pub mod remote_api;

use cassava_core::errors::InferenceError;

/// Bytes of a local image reference (`file://` prefix optional).
pub(crate) async fn read_local_image(image_ref: &str) -> Result<Vec<u8>, InferenceError> {
    let path = image_ref.strip_prefix("file://").unwrap_or(image_ref);
    tokio::fs::read(path).await.map_err(|e| {
        log::warn!("[Classifier] Cannot read {}: {}", image_ref, e);
        InferenceError::ImageUnreadable(image_ref.to_string())
    })
}
