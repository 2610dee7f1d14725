//! Remote-first analysis with a durable local fallback.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::reconciler::{compensate_upload, Reconciler};
use crate::analysis::{
    derive_severity, require_non_empty, sort_newest_first, treatment_for, AnalysisBackend,
    AnalysisRecord, AnalysisResult, Diagnosis, InferenceClient, LocalAnalysisStore, NewAnalysis,
};
use crate::connectivity::ConnectivityMonitor;
use crate::errors::{Error, InferenceError, Result};
use crate::sync::{SyncCycleOutcome, SyncReport, SyncStatus, RECONCILIATION_INTERVAL_SECS};

/// Why the remote path of `analyze_image` was abandoned.
enum RemotePathFailure {
    Inference(InferenceError),
    Persist { analysis: NewAnalysis, error: Error },
}

/// Entry point for analysis, history, deletion and sync.
pub struct HybridAnalysisService {
    local: Arc<dyn LocalAnalysisStore>,
    backend: Arc<dyn AnalysisBackend>,
    inference: Arc<dyn InferenceClient>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    reconciler: Arc<Reconciler>,
    reconciliation_interval: Duration,
    initialized: AtomicBool,
    init_lock: Mutex<()>,
    background_task: Mutex<Option<JoinHandle<()>>>,
}

impl HybridAnalysisService {
    pub fn new(
        local: Arc<dyn LocalAnalysisStore>,
        backend: Arc<dyn AnalysisBackend>,
        inference: Arc<dyn InferenceClient>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Self {
        let reconciler = Arc::new(Reconciler::new(
            Arc::clone(&local),
            Arc::clone(&backend),
            Arc::clone(&connectivity),
        ));
        Self {
            local,
            backend,
            inference,
            connectivity,
            reconciler,
            reconciliation_interval: Duration::from_secs(RECONCILIATION_INTERVAL_SECS),
            initialized: AtomicBool::new(false),
            init_lock: Mutex::new(()),
            background_task: Mutex::new(None),
        }
    }

    /// Overrides the background reconciliation period.
    pub fn with_reconciliation_interval(mut self, interval: Duration) -> Self {
        self.reconciliation_interval = interval;
        self
    }

    /// Prepares the local store and classifier and starts the reconciliation loop.
    ///
    /// Safe to call more than once. A local store failure is fatal; a classifier
    /// failure is logged and surfaces later as a model-not-ready inference error.
    pub async fn initialize(&self) -> Result<()> {
        let _init_guard = self.init_lock.lock().await;
        if self.initialized.load(Ordering::SeqCst) {
            return Ok(());
        }

        self.local.initialize().await?;

        if let Err(err) = self.inference.initialize().await {
            warn!(
                "[Hybrid] Classifier ({}) failed to initialize: {}",
                self.inference.strategy().as_str(),
                err
            );
        }

        self.start_reconciliation_loop().await;
        self.initialized.store(true, Ordering::SeqCst);
        info!(
            "[Hybrid] Initialized with {} classifier",
            self.inference.strategy().as_str()
        );
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }

    async fn start_reconciliation_loop(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
            guard.take();
        }

        let reconciler = Arc::clone(&self.reconciler);
        let period = self.reconciliation_interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Some(report) = reconciler.run_cycle().await {
                    debug!(
                        "[Hybrid] Background cycle synced={} failed={} remaining={}",
                        report.synced, report.failed, report.remaining
                    );
                }
            }
        });
        *guard = Some(handle);
    }

    /// Stops the reconciliation loop. In-flight writes are transactional.
    pub async fn shutdown(&self) {
        let mut guard = self.background_task.lock().await;
        if let Some(handle) = guard.take() {
            handle.abort();
            info!("[Hybrid] Reconciliation loop stopped");
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Analysis
    // ─────────────────────────────────────────────────────────────────────────

    /// Classifies the image and persists the result.
    ///
    /// Online, the result is stored remotely. Any failure on that path, or an
    /// offline call with an offline-capable classifier, stores it locally and
    /// queues it for sync. Offline without such a classifier is a connectivity
    /// error.
    pub async fn analyze_image(&self, image_ref: &str, user_id: &str) -> Result<AnalysisResult> {
        self.ensure_initialized()?;
        require_non_empty("image_ref", image_ref)?;
        require_non_empty("user_id", user_id)?;

        if self.connectivity.is_online().await {
            match self.analyze_online(image_ref, user_id).await {
                Ok(record) => return Ok(AnalysisResult::online(record)),
                Err(RemotePathFailure::Inference(err)) => {
                    warn!("[Hybrid] Inference failed, storing placeholder: {}", err);
                    return self
                        .save_local(NewAnalysis::failed(
                            user_id,
                            image_ref,
                            self.inference.strategy(),
                            &err,
                        ))
                        .await;
                }
                Err(RemotePathFailure::Persist { analysis, error }) => {
                    warn!(
                        "[Hybrid] Remote save failed, falling back to local store: {}",
                        error
                    );
                    return self.save_local(analysis).await;
                }
            }
        }

        if !self.inference.supports_offline() {
            return Err(Error::connectivity(
                "offline and the configured classifier requires network access",
            ));
        }

        debug!("[Hybrid] Offline, classifying on device");
        let analysis = match self.classify(image_ref).await {
            Ok(diagnosis) => {
                NewAnalysis::from_diagnosis(user_id, image_ref, &diagnosis, self.inference.strategy())
            }
            Err(err) => {
                warn!("[Hybrid] On-device inference failed: {}", err);
                NewAnalysis::failed(user_id, image_ref, self.inference.strategy(), &err)
            }
        };
        self.save_local(analysis).await
    }

    async fn analyze_online(
        &self,
        image_ref: &str,
        user_id: &str,
    ) -> std::result::Result<AnalysisRecord, RemotePathFailure> {
        let diagnosis = self
            .classify(image_ref)
            .await
            .map_err(RemotePathFailure::Inference)?;
        let analysis =
            NewAnalysis::from_diagnosis(user_id, image_ref, &diagnosis, self.inference.strategy());

        let image_url = match self.backend.upload_image(image_ref, user_id).await {
            Ok(url) => url,
            Err(error) => return Err(RemotePathFailure::Persist { analysis, error }),
        };

        let mut remote = analysis.clone();
        remote.image_ref = image_url.clone();
        match self.backend.save_analysis(&remote).await {
            Ok(record) => Ok(record),
            Err(error) => {
                compensate_upload(self.backend.as_ref(), &image_url).await;
                Err(RemotePathFailure::Persist { analysis, error })
            }
        }
    }

    /// Classifier call with validation and policy defaults applied.
    async fn classify(&self, image_ref: &str) -> std::result::Result<Diagnosis, InferenceError> {
        let mut diagnosis = self.inference.classify(image_ref).await?;
        diagnosis.validate()?;

        if diagnosis.severity.is_none() {
            diagnosis.severity = Some(derive_severity(&diagnosis.label, diagnosis.confidence));
        }
        if diagnosis.treatment.trim().is_empty() {
            let advice = treatment_for(&diagnosis.label);
            diagnosis.treatment = advice.treatment;
            if diagnosis.recommendations.is_empty() {
                diagnosis.recommendations = advice.recommendations;
            }
        }
        Ok(diagnosis)
    }

    async fn save_local(&self, analysis: NewAnalysis) -> Result<AnalysisResult> {
        let record = self.local.save_analysis_offline(analysis).await?;
        debug!("[Hybrid] Stored analysis {} locally", record.id);
        Ok(AnalysisResult::offline(record))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // History
    // ─────────────────────────────────────────────────────────────────────────

    /// Remote history when reachable, local history otherwise. Never merged.
    pub async fn get_analyses(&self, user_id: &str) -> Result<Vec<AnalysisResult>> {
        self.ensure_initialized()?;
        require_non_empty("user_id", user_id)?;

        if self.connectivity.is_online().await {
            match self.backend.get_analyses(user_id).await {
                Ok(mut records) => {
                    sort_newest_first(&mut records);
                    return Ok(records.into_iter().map(AnalysisResult::online).collect());
                }
                Err(err) => {
                    warn!("[Hybrid] Remote history unavailable, reading local: {}", err);
                }
            }
        }

        let mut records = self.local.get_analyses_offline(user_id)?;
        sort_newest_first(&mut records);
        Ok(records
            .into_iter()
            .map(|record| {
                if record.synced {
                    AnalysisResult::online(record)
                } else {
                    AnalysisResult::offline(record)
                }
            })
            .collect())
    }

    /// Deletes an analysis from the store that owns it.
    ///
    /// Local records are removed together with their pending queue entries. A
    /// remote delete that cannot reach the backend is queued as a tombstone.
    pub async fn delete_analysis(&self, id: &str, is_offline: bool) -> Result<()> {
        self.ensure_initialized()?;
        require_non_empty("id", id)?;

        if is_offline {
            return self.local.delete_analysis_offline(id).await;
        }

        if !self.connectivity.is_online().await {
            info!("[Hybrid] Offline, queueing remote delete for {}", id);
            return self.local.enqueue_remote_delete(id).await;
        }

        match self.backend.delete_analysis(id).await {
            Ok(()) => self.local.delete_analysis_offline(id).await,
            Err(Error::NotFound(message)) => {
                // Gone remotely; a stale synced mirror must not linger in offline history.
                self.local.delete_analysis_offline(id).await?;
                Err(Error::NotFound(message))
            }
            Err(err) => {
                warn!(
                    "[Hybrid] Remote delete of {} failed, queueing tombstone: {}",
                    id, err
                );
                self.local.enqueue_remote_delete(id).await
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Drains the sync queue now.
    pub async fn force_sync(&self) -> Result<SyncReport> {
        self.ensure_initialized()?;
        if !self.connectivity.is_online().await {
            return Err(Error::connectivity("cannot sync while offline"));
        }
        self.reconciler.drain().await
    }

    pub async fn get_sync_status(&self) -> Result<SyncStatus> {
        self.ensure_initialized()?;
        let is_online = self.connectivity.is_online().await;
        let pending_sync_count = self.local.get_pending_sync_count()?;
        let engine_state = self.local.get_sync_engine_state()?;

        // Probed on its own: the classifier may answer while the monitor says offline.
        let backend_status = self.inference.health_check().await.status;

        Ok(SyncStatus {
            is_online,
            pending_sync_count,
            backend_status,
            last_sync_at: engine_state.last_sync_at,
            last_sync_outcome: engine_state
                .last_cycle_status
                .as_deref()
                .and_then(SyncCycleOutcome::parse),
            reconciliation_state: self.reconciler.state(),
        })
    }

    /// Removes every local record and queue entry.
    pub async fn clear_offline_data(&self) -> Result<()> {
        self.ensure_initialized()?;
        self.local.clear_offline_data().await?;
        info!("[Hybrid] Offline data cleared");
        Ok(())
    }
}

impl Drop for HybridAnalysisService {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.background_task.try_lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}
