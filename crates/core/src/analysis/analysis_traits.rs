//! Collaborator contracts the orchestrator is built on.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::analysis_model::{AnalysisRecord, Diagnosis, InferenceStrategy, NewAnalysis};
use crate::errors::{InferenceError, Result};
use crate::sync::{BackendStatus, SyncCycleOutcome, SyncEngineState, SyncQueueEntry};

/// Result of a classifier health probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendHealth {
    pub status: BackendStatus,
    pub latency_ms: Option<u64>,
}

impl BackendHealth {
    pub fn offline() -> Self {
        Self {
            status: BackendStatus::Offline,
            latency_ms: None,
        }
    }

    pub fn online(latency_ms: u64) -> Self {
        Self {
            status: BackendStatus::Online,
            latency_ms: Some(latency_ms),
        }
    }
}

/// Maps a leaf image to a diagnosis.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn initialize(&self) -> std::result::Result<(), InferenceError>;

    async fn classify(&self, image_ref: &str) -> std::result::Result<Diagnosis, InferenceError>;

    /// Whether `classify` works without network access.
    fn supports_offline(&self) -> bool;

    async fn health_check(&self) -> BackendHealth;

    fn strategy(&self) -> InferenceStrategy;
}

/// Remote persistence: object storage for images plus the analyses table.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    /// Uploads a local image under the user's namespace and returns its public URL.
    async fn upload_image(&self, image_ref: &str, user_id: &str) -> Result<String>;

    async fn delete_image(&self, image_url: &str) -> Result<()>;

    async fn save_analysis(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord>;

    async fn get_analyses(&self, user_id: &str) -> Result<Vec<AnalysisRecord>>;

    /// Deletes the record; a missing record yields `Error::NotFound`.
    async fn delete_analysis(&self, id: &str) -> Result<()>;

    /// Authenticated user, if any.
    async fn current_user_id(&self) -> Option<String>;
}

/// Durable on-device store of analyses and pending sync work.
#[async_trait]
pub trait LocalAnalysisStore: Send + Sync {
    /// Applies pending schema migrations. Idempotent.
    async fn initialize(&self) -> Result<()>;

    /// Writes the record with `synced = false` and its queue entry in one transaction.
    async fn save_analysis_offline(&self, analysis: NewAnalysis) -> Result<AnalysisRecord>;

    /// Records for the user, newest first.
    fn get_analyses_offline(&self, user_id: &str) -> Result<Vec<AnalysisRecord>>;

    /// Removes the local row and any queued entries for it.
    async fn delete_analysis_offline(&self, id: &str) -> Result<()>;

    /// Removes the local mirror and queues a remote delete, atomically.
    async fn enqueue_remote_delete(&self, id: &str) -> Result<()>;

    fn get_pending_sync_count(&self) -> Result<i64>;

    /// Oldest entries first: the user's analyses plus every delete tombstone.
    fn list_sync_queue(&self, user_id: &str, limit: i64) -> Result<Vec<SyncQueueEntry>>;

    /// Drops the entry and replaces the local row with the remote copy, atomically.
    ///
    /// If the entry is already gone, the record was deleted while it synced:
    /// no mirror is written and a delete of `remote` is queued instead.
    async fn complete_analysis_sync(
        &self,
        entry_id: &str,
        local_id: &str,
        remote: &AnalysisRecord,
    ) -> Result<()>;

    async fn complete_sync_entry(&self, entry_id: &str) -> Result<()>;

    async fn record_sync_failure(&self, entry_id: &str, error: &str) -> Result<()>;

    async fn mark_sync_cycle(
        &self,
        outcome: SyncCycleOutcome,
        duration_ms: i64,
        error: Option<String>,
    ) -> Result<()>;

    fn get_sync_engine_state(&self) -> Result<SyncEngineState>;

    async fn clear_offline_data(&self) -> Result<()>;
}
