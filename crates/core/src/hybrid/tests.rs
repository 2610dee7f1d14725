use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Notify;

use super::HybridAnalysisService;
use crate::analysis::{
    AnalysisBackend, AnalysisRecord, BackendHealth, Diagnosis, InferenceClient,
    InferenceStrategy, LocalAnalysisStore, NewAnalysis, SeverityLevel, FAILED_ANALYSIS_LABEL,
};
use crate::connectivity::ManualConnectivity;
use crate::errors::{DatabaseError, Error, InferenceError, Result};
use crate::sync::{
    BackendStatus, ReconciliationState, SyncCycleOutcome, SyncEngineState, SyncPayload,
    SyncQueueEntry,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test doubles
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Default)]
struct MemoryStore {
    records: Mutex<Vec<AnalysisRecord>>,
    queue: Mutex<Vec<SyncQueueEntry>>,
    engine: Mutex<SyncEngineState>,
    initialize_calls: AtomicUsize,
    fail_pending_count: AtomicBool,
}

impl MemoryStore {
    fn queue_snapshot(&self) -> Vec<SyncQueueEntry> {
        self.queue.lock().unwrap().clone()
    }

    fn record(&self, id: &str) -> Option<AnalysisRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn push_entry(&self, payload: SyncPayload) {
        self.queue.lock().unwrap().push(SyncQueueEntry {
            id: uuid::Uuid::now_v7().to_string(),
            entry_type: payload.entry_type(),
            record_id: payload.record_id().to_string(),
            payload,
            enqueued_at: Utc::now().to_rfc3339(),
            attempts: 0,
            last_error: None,
            last_attempt_at: None,
        });
    }
}

#[async_trait]
impl LocalAnalysisStore for MemoryStore {
    async fn initialize(&self) -> Result<()> {
        self.initialize_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn save_analysis_offline(&self, analysis: NewAnalysis) -> Result<AnalysisRecord> {
        let record = analysis.into_record(uuid::Uuid::now_v7().to_string(), false);
        self.records.lock().unwrap().push(record.clone());
        self.push_entry(SyncPayload::Analysis(record.clone()));
        Ok(record)
    }

    fn get_analyses_offline(&self, user_id: &str) -> Result<Vec<AnalysisRecord>> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_analysis_offline(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().retain(|r| r.id != id);
        self.queue.lock().unwrap().retain(|e| e.record_id != id);
        Ok(())
    }

    async fn enqueue_remote_delete(&self, id: &str) -> Result<()> {
        self.records.lock().unwrap().retain(|r| r.id != id);
        self.push_entry(SyncPayload::AnalysisDelete { id: id.to_string() });
        Ok(())
    }

    fn get_pending_sync_count(&self) -> Result<i64> {
        if self.fail_pending_count.load(Ordering::SeqCst) {
            return Err(Error::Database(DatabaseError::QueryFailed(
                "database is locked".to_string(),
            )));
        }
        Ok(self.queue.lock().unwrap().len() as i64)
    }

    fn list_sync_queue(&self, user_id: &str, limit: i64) -> Result<Vec<SyncQueueEntry>> {
        Ok(self
            .queue
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.payload.owner_id().map_or(true, |owner| owner == user_id))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn complete_analysis_sync(
        &self,
        entry_id: &str,
        local_id: &str,
        remote: &AnalysisRecord,
    ) -> Result<()> {
        let dequeued = {
            let mut queue = self.queue.lock().unwrap();
            let before = queue.len();
            queue.retain(|e| e.id != entry_id);
            queue.len() != before
        };
        let mut records = self.records.lock().unwrap();
        records.retain(|r| r.id != local_id);
        if !dequeued {
            drop(records);
            self.push_entry(SyncPayload::AnalysisDelete {
                id: remote.id.clone(),
            });
            return Ok(());
        }
        let mut mirror = remote.clone();
        mirror.synced = true;
        records.push(mirror);
        Ok(())
    }

    async fn complete_sync_entry(&self, entry_id: &str) -> Result<()> {
        self.queue.lock().unwrap().retain(|e| e.id != entry_id);
        Ok(())
    }

    async fn record_sync_failure(&self, entry_id: &str, error: &str) -> Result<()> {
        let mut queue = self.queue.lock().unwrap();
        if let Some(entry) = queue.iter_mut().find(|e| e.id == entry_id) {
            entry.attempts += 1;
            entry.last_error = Some(error.to_string());
            entry.last_attempt_at = Some(Utc::now().to_rfc3339());
        }
        Ok(())
    }

    async fn mark_sync_cycle(
        &self,
        outcome: SyncCycleOutcome,
        duration_ms: i64,
        error: Option<String>,
    ) -> Result<()> {
        let mut engine = self.engine.lock().unwrap();
        engine.last_sync_at = Some(Utc::now().to_rfc3339());
        engine.last_cycle_status = Some(outcome.as_str().to_string());
        engine.last_cycle_duration_ms = Some(duration_ms);
        engine.last_error = error;
        Ok(())
    }

    fn get_sync_engine_state(&self) -> Result<SyncEngineState> {
        Ok(self.engine.lock().unwrap().clone())
    }

    async fn clear_offline_data(&self) -> Result<()> {
        self.records.lock().unwrap().clear();
        self.queue.lock().unwrap().clear();
        Ok(())
    }
}

struct FakeBackend {
    user_id: Mutex<Option<String>>,
    records: Mutex<Vec<AnalysisRecord>>,
    uploads: Mutex<Vec<String>>,
    deleted_images: Mutex<Vec<String>>,
    write_calls: AtomicUsize,
    delete_calls: AtomicUsize,
    fail_save: AtomicBool,
    fail_delete: AtomicBool,
    /// Writes are refused as if the session had expired.
    reject_session: AtomicBool,
    /// Saves whose original image path ends with this suffix fail.
    fail_save_for: Mutex<Option<String>>,
    /// One-shot pause inside the next save: (entered, release).
    save_gate: Mutex<Option<(Arc<Notify>, Arc<Notify>)>>,
}

impl FakeBackend {
    fn new(user_id: &str) -> Self {
        Self {
            user_id: Mutex::new(Some(user_id.to_string())),
            records: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            deleted_images: Mutex::new(Vec::new()),
            write_calls: AtomicUsize::new(0),
            delete_calls: AtomicUsize::new(0),
            fail_save: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            reject_session: AtomicBool::new(false),
            fail_save_for: Mutex::new(None),
            save_gate: Mutex::new(None),
        }
    }

    /// Makes the next save wait for `release` after signalling `entered`.
    fn pause_next_save(&self) -> (Arc<Notify>, Arc<Notify>) {
        let entered = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.save_gate.lock().unwrap() = Some((entered.clone(), release.clone()));
        (entered, release)
    }

    fn remote_records(&self) -> Vec<AnalysisRecord> {
        self.records.lock().unwrap().clone()
    }

    fn check_owner(&self, user_id: &str) -> Result<()> {
        if self.reject_session.load(Ordering::SeqCst) {
            return Err(Error::Auth("JWT expired".to_string()));
        }
        match self.user_id.lock().unwrap().as_deref() {
            Some(current) if current == user_id => Ok(()),
            Some(_) => Err(Error::Auth("user mismatch".to_string())),
            None => Err(Error::Auth("not signed in".to_string())),
        }
    }
}

#[async_trait]
impl AnalysisBackend for FakeBackend {
    async fn upload_image(&self, image_ref: &str, user_id: &str) -> Result<String> {
        self.check_owner(user_id)?;
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        let name = image_ref.rsplit('/').next().unwrap_or("image.jpg");
        let url = format!("https://storage.test/{}/{}", user_id, name);
        self.uploads.lock().unwrap().push(url.clone());
        Ok(url)
    }

    async fn delete_image(&self, image_url: &str) -> Result<()> {
        self.deleted_images
            .lock()
            .unwrap()
            .push(image_url.to_string());
        Ok(())
    }

    async fn save_analysis(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord> {
        self.check_owner(&analysis.user_id)?;
        let gate = self.save_gate.lock().unwrap().take();
        if let Some((entered, release)) = gate {
            entered.notify_one();
            release.notified().await;
        }
        self.write_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_save.load(Ordering::SeqCst) {
            return Err(Error::remote_write("backend outage"));
        }
        if let Some(suffix) = self.fail_save_for.lock().unwrap().as_deref() {
            if analysis.image_ref.ends_with(suffix) {
                return Err(Error::remote_write("insert rejected"));
            }
        }
        let record = analysis
            .clone()
            .into_record(uuid::Uuid::new_v4().to_string(), true);
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn get_analyses(&self, user_id: &str) -> Result<Vec<AnalysisRecord>> {
        self.check_owner(user_id)?;
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_analysis(&self, id: &str) -> Result<()> {
        self.delete_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(Error::remote_write("delete failed"));
        }
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|r| r.id != id);
        if records.len() == before {
            return Err(Error::NotFound(format!("analysis {}", id)));
        }
        Ok(())
    }

    async fn current_user_id(&self) -> Option<String> {
        self.user_id.lock().unwrap().clone()
    }
}

struct FakeClassifier {
    response: Mutex<std::result::Result<Diagnosis, InferenceError>>,
    health: Mutex<BackendHealth>,
    offline_capable: bool,
}

impl FakeClassifier {
    fn returning(label: &str, confidence: f64, offline_capable: bool) -> Self {
        Self {
            response: Mutex::new(Ok(diagnosis(label, confidence))),
            health: Mutex::new(BackendHealth::online(5)),
            offline_capable,
        }
    }

    fn set_response(&self, response: std::result::Result<Diagnosis, InferenceError>) {
        *self.response.lock().unwrap() = response;
    }
}

#[async_trait]
impl InferenceClient for FakeClassifier {
    async fn initialize(&self) -> std::result::Result<(), InferenceError> {
        Ok(())
    }

    async fn classify(&self, _image_ref: &str) -> std::result::Result<Diagnosis, InferenceError> {
        self.response.lock().unwrap().clone()
    }

    fn supports_offline(&self) -> bool {
        self.offline_capable
    }

    async fn health_check(&self) -> BackendHealth {
        *self.health.lock().unwrap()
    }

    fn strategy(&self) -> InferenceStrategy {
        if self.offline_capable {
            InferenceStrategy::OnDevice
        } else {
            InferenceStrategy::RemoteApi
        }
    }
}

fn diagnosis(label: &str, confidence: f64) -> Diagnosis {
    Diagnosis {
        label: label.to_string(),
        confidence,
        severity: None,
        treatment: String::new(),
        recommendations: Vec::new(),
        model_version: Some("1.0.0".to_string()),
        response_timestamp: None,
    }
}

struct Harness {
    service: HybridAnalysisService,
    local: Arc<MemoryStore>,
    backend: Arc<FakeBackend>,
    classifier: Arc<FakeClassifier>,
    connectivity: Arc<ManualConnectivity>,
}

const USER: &str = "user-1";

fn harness(online: bool, offline_capable: bool) -> Harness {
    let local = Arc::new(MemoryStore::default());
    let backend = Arc::new(FakeBackend::new(USER));
    let classifier = Arc::new(FakeClassifier::returning(
        "Cassava Mosaic Disease (CMD)",
        0.9,
        offline_capable,
    ));
    let connectivity = Arc::new(ManualConnectivity::new(online));
    let service = HybridAnalysisService::new(
        local.clone(),
        backend.clone(),
        classifier.clone(),
        connectivity.clone(),
    );
    Harness {
        service,
        local,
        backend,
        classifier,
        connectivity,
    }
}

async fn initialized(online: bool, offline_capable: bool) -> Harness {
    let h = harness(online, offline_capable);
    h.service.initialize().await.expect("initialize");
    h
}

// ─────────────────────────────────────────────────────────────────────────────
// Lifecycle
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn calls_before_initialize_are_rejected() {
    let h = harness(true, false);
    let err = h
        .service
        .analyze_image("/tmp/leaf.jpg", USER)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotInitialized));
    assert!(matches!(h.service.force_sync().await, Err(Error::NotInitialized)));
}

#[tokio::test]
async fn initialize_is_idempotent() {
    let h = harness(true, false);
    h.service.initialize().await.unwrap();
    h.service.initialize().await.unwrap();
    assert_eq!(h.local.initialize_calls.load(Ordering::SeqCst), 1);
    h.service.shutdown().await;
}

#[tokio::test]
async fn empty_user_id_is_a_validation_error() {
    let h = initialized(true, false).await;
    let err = h.service.analyze_image("/tmp/leaf.jpg", " ").await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// analyze_image
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn online_healthy_leaf_is_stored_remotely() {
    let h = initialized(true, false).await;
    h.classifier.set_response(Ok(diagnosis("Healthy", 0.95)));

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();

    assert!(!result.is_offline);
    assert!(result.record.synced);
    assert_eq!(result.record.severity_level, Some(SeverityLevel::Low));
    assert_eq!(result.record.image_ref, "https://storage.test/user-1/leaf.jpg");
    assert_eq!(h.backend.remote_records().len(), 1);
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);

    let history = h.service.get_analyses(USER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].record.id, result.record.id);
    assert!(!history[0].is_offline);
}

#[tokio::test]
async fn offline_analysis_is_queued_locally() {
    let h = initialized(false, true).await;
    let before = h.service.get_sync_status().await.unwrap().pending_sync_count;

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();

    assert!(result.is_offline);
    assert!(!result.record.synced);
    assert_eq!(result.record.analysis_metadata["analysis_type"], "on_device");
    assert_eq!(result.record.severity_level, Some(SeverityLevel::High));
    assert_eq!(
        result.record.treatment_text,
        "Use resistant plants, eliminate infected plants"
    );
    let status = h.service.get_sync_status().await.unwrap();
    assert_eq!(status.pending_sync_count, before + 1);
    assert!(!status.is_online);

    let history = h.service.get_analyses(USER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_offline);
    assert_eq!(h.backend.write_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn offline_without_offline_classifier_is_connectivity_error() {
    let h = initialized(false, false).await;
    let err = h
        .service
        .analyze_image("/tmp/leaf.jpg", USER)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Connectivity(_)));
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn remote_write_failure_falls_back_locally_and_removes_blob() {
    let h = initialized(true, false).await;
    h.backend.fail_save.store(true, Ordering::SeqCst);

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();

    assert!(result.is_offline);
    assert!(!result.record.synced);
    assert_eq!(result.record.image_ref, "/tmp/leaf.jpg");
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);
    assert_eq!(
        *h.backend.deleted_images.lock().unwrap(),
        vec!["https://storage.test/user-1/leaf.jpg".to_string()]
    );
}

#[tokio::test]
async fn inference_failure_stores_placeholder() {
    let h = initialized(true, false).await;
    h.classifier.set_response(Err(InferenceError::Http {
        status: 500,
        detail: "model crashed".to_string(),
    }));

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();

    assert!(result.is_offline);
    assert_eq!(result.record.disease_label, FAILED_ANALYSIS_LABEL);
    assert_eq!(result.record.confidence_score, 0.0);
    assert!(result.record.analysis_metadata["error"]
        .as_str()
        .unwrap()
        .contains("model crashed"));
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);
    assert!(h.backend.uploads.lock().unwrap().is_empty());
}

#[tokio::test]
async fn out_of_range_confidence_is_treated_as_inference_failure() {
    let h = initialized(true, false).await;
    h.classifier
        .set_response(Ok(diagnosis("Cassava Brown Streak Disease (CBSD)", 1.5)));

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();

    assert!(result.record.is_failed_placeholder());
    assert!(h.backend.remote_records().is_empty());
}

#[tokio::test]
async fn unauthenticated_backend_falls_back_locally() {
    let h = initialized(true, false).await;
    *h.backend.user_id.lock().unwrap() = None;

    let result = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();
    assert!(result.is_offline);

    // Remote history fails too, so the local copy is listed.
    let history = h.service.get_analyses(USER).await.unwrap();
    assert_eq!(history.len(), 1);
    assert!(history[0].is_offline);
}

// ─────────────────────────────────────────────────────────────────────────────
// Sync
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn drain_continues_past_a_failed_entry() {
    let h = initialized(false, true).await;
    for name in ["leaf-1.jpg", "leaf-2.jpg", "leaf-3.jpg"] {
        h.service
            .analyze_image(&format!("/tmp/{}", name), USER)
            .await
            .unwrap();
    }
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 3);

    h.connectivity.set_online(true);
    *h.backend.fail_save_for.lock().unwrap() = Some("leaf-2.jpg".to_string());

    let report = h.service.force_sync().await.unwrap();

    assert_eq!(report.synced, 2);
    assert_eq!(report.failed, 1);
    assert_eq!(report.remaining, 1);
    let queue = h.local.queue_snapshot();
    assert_eq!(queue.len(), 1);
    match &queue[0].payload {
        SyncPayload::Analysis(record) => assert_eq!(record.image_ref, "/tmp/leaf-2.jpg"),
        other => panic!("unexpected payload {:?}", other),
    }
    assert_eq!(queue[0].attempts, 1);
    assert!(queue[0].last_error.is_some());
    // The upload for the failed entry was rolled back.
    assert_eq!(
        *h.backend.deleted_images.lock().unwrap(),
        vec!["https://storage.test/user-1/leaf-2.jpg".to_string()]
    );

    let status = h.service.get_sync_status().await.unwrap();
    assert_eq!(status.last_sync_outcome, Some(SyncCycleOutcome::Partial));
    assert!(status.last_sync_at.is_some());
}

#[tokio::test]
async fn force_sync_on_empty_queue_makes_no_remote_writes() {
    let h = initialized(true, false).await;

    let first = h.service.force_sync().await.unwrap();
    let second = h.service.force_sync().await.unwrap();

    assert_eq!(first.synced, 0);
    assert_eq!(second.synced, 0);
    assert_eq!(h.backend.write_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.backend.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn force_sync_offline_is_connectivity_error() {
    let h = initialized(false, true).await;
    assert!(matches!(
        h.service.force_sync().await,
        Err(Error::Connectivity(_))
    ));
}

#[tokio::test]
async fn entries_of_another_user_stay_queued() {
    let h = initialized(false, true).await;
    h.service.analyze_image("/tmp/leaf.jpg", "user-2").await.unwrap();

    h.connectivity.set_online(true);
    let report = h.service.force_sync().await.unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.synced, 0);
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);
    assert_eq!(h.backend.write_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn rejected_session_stops_the_drain() {
    let h = initialized(false, true).await;
    for name in ["leaf-1.jpg", "leaf-2.jpg", "leaf-3.jpg"] {
        h.service
            .analyze_image(&format!("/tmp/{}", name), USER)
            .await
            .unwrap();
    }
    h.connectivity.set_online(true);
    h.backend.reject_session.store(true, Ordering::SeqCst);

    let report = h.service.force_sync().await.unwrap();

    assert_eq!(report.failed, 1);
    assert_eq!(report.skipped, 2);
    assert_eq!(report.remaining, 3);
    let attempts: Vec<i32> = h.local.queue_snapshot().iter().map(|e| e.attempts).collect();
    assert_eq!(attempts, vec![1, 0, 0]);
}

#[tokio::test]
async fn record_deleted_during_drain_stays_deleted() {
    let h = initialized(false, true).await;
    let local = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap().record;
    h.connectivity.set_online(true);
    let (entered, release) = h.backend.pause_next_save();

    let (report, deleted) = tokio::join!(h.service.force_sync(), async {
        entered.notified().await;
        let deleted = h.service.delete_analysis(&local.id, true).await;
        release.notify_one();
        deleted
    });
    deleted.unwrap();
    assert_eq!(report.unwrap().synced, 1);

    // The upload landed remotely, so its deletion is queued instead of a mirror.
    assert!(h.local.get_analyses_offline(USER).unwrap().is_empty());
    let remote_id = h.backend.remote_records()[0].id.clone();
    assert_eq!(
        h.local.queue_snapshot()[0].payload,
        SyncPayload::AnalysisDelete { id: remote_id }
    );

    h.service.force_sync().await.unwrap();
    assert!(h.backend.remote_records().is_empty());
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn analysis_queued_during_drain_waits_for_next_cycle() {
    let h = initialized(false, true).await;
    h.service.analyze_image("/tmp/first.jpg", USER).await.unwrap();
    h.connectivity.set_online(true);
    let (entered, release) = h.backend.pause_next_save();

    let (report, queued) = tokio::join!(h.service.force_sync(), async {
        entered.notified().await;
        h.connectivity.set_online(false);
        let queued = h.service.analyze_image("/tmp/second.jpg", USER).await;
        release.notify_one();
        queued
    });

    let report = report.unwrap();
    assert!(queued.unwrap().is_offline);
    assert_eq!(report.synced, 1);
    assert_eq!(report.remaining, 1);
    match &h.local.queue_snapshot()[0].payload {
        SyncPayload::Analysis(record) => assert_eq!(record.image_ref, "/tmp/second.jpg"),
        other => panic!("unexpected payload {:?}", other),
    }
}

#[tokio::test]
async fn unreadable_queue_count_after_drain_is_estimated() {
    let h = initialized(false, true).await;
    h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();
    h.connectivity.set_online(true);
    let (entered, release) = h.backend.pause_next_save();

    let (report, _) = tokio::join!(h.service.force_sync(), async {
        entered.notified().await;
        h.local.fail_pending_count.store(true, Ordering::SeqCst);
        release.notify_one();
    });

    let report = report.unwrap();
    assert_eq!(report.synced, 1);
    assert_eq!(report.remaining, 0);
    h.local.fail_pending_count.store(false, Ordering::SeqCst);
    let status = h.service.get_sync_status().await.unwrap();
    assert_eq!(status.last_sync_outcome, Some(SyncCycleOutcome::Ok));
}

#[tokio::test(start_paused = true)]
async fn background_loop_syncs_and_preserves_fields() {
    let h = initialized(false, true).await;
    let local = h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap().record;

    h.connectivity.set_online(true);
    tokio::time::sleep(Duration::from_secs(301)).await;

    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
    assert!(h.local.record(&local.id).is_none());

    let remote = h.backend.remote_records();
    assert_eq!(remote.len(), 1);
    let mirrored = h.local.record(&remote[0].id).expect("local mirror");
    assert!(mirrored.synced);
    for synced in [&remote[0], &mirrored] {
        assert_eq!(synced.disease_label, local.disease_label);
        assert_eq!(synced.confidence_score, local.confidence_score);
        assert_eq!(synced.severity_level, local.severity_level);
        assert_eq!(synced.treatment_text, local.treatment_text);
        assert_eq!(synced.recommendations, local.recommendations);
        assert_eq!(synced.created_at, local.created_at);
    }
    assert_eq!(
        h.service.get_sync_status().await.unwrap().reconciliation_state,
        ReconciliationState::Idle
    );
}

#[tokio::test(start_paused = true)]
async fn first_tick_is_deferred_and_shutdown_stops_the_loop() {
    let h = initialized(false, true).await;
    h.service.analyze_image("/tmp/leaf.jpg", USER).await.unwrap();
    h.connectivity.set_online(true);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);

    h.service.shutdown().await;
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);
    assert!(h.backend.remote_records().is_empty());
}

#[tokio::test]
async fn classifier_status_is_probed_while_monitor_is_offline() {
    let h = initialized(false, false).await;

    let status = h.service.get_sync_status().await.unwrap();
    assert!(!status.is_online);
    assert_eq!(status.backend_status, BackendStatus::Online);

    h.connectivity.set_online(true);
    *h.classifier.health.lock().unwrap() = BackendHealth::offline();
    let status = h.service.get_sync_status().await.unwrap();
    assert!(status.is_online);
    assert_eq!(status.backend_status, BackendStatus::Offline);
}

// ─────────────────────────────────────────────────────────────────────────────
// Deletion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn deleting_local_record_makes_no_remote_call() {
    let h = initialized(false, true).await;
    let record = h
        .service
        .analyze_image("/tmp/leaf.jpg", USER)
        .await
        .unwrap()
        .record;
    h.connectivity.set_online(true);

    h.service.delete_analysis(&record.id, true).await.unwrap();

    assert!(h.local.record(&record.id).is_none());
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
    assert_eq!(h.backend.delete_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn offline_remote_delete_is_replayed_on_sync() {
    let h = initialized(true, true).await;
    let record = h
        .service
        .analyze_image("/tmp/leaf.jpg", USER)
        .await
        .unwrap()
        .record;
    assert_eq!(h.backend.remote_records().len(), 1);

    h.connectivity.set_online(false);
    h.service.delete_analysis(&record.id, false).await.unwrap();
    assert_eq!(h.backend.delete_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 1);

    h.connectivity.set_online(true);
    let report = h.service.force_sync().await.unwrap();

    assert_eq!(report.synced, 1);
    assert!(h.backend.remote_records().is_empty());
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn failed_remote_delete_queues_tombstone() {
    let h = initialized(true, false).await;
    let record = h
        .service
        .analyze_image("/tmp/leaf.jpg", USER)
        .await
        .unwrap()
        .record;
    h.backend.fail_delete.store(true, Ordering::SeqCst);

    h.service.delete_analysis(&record.id, false).await.unwrap();

    let queue = h.local.queue_snapshot();
    assert_eq!(queue.len(), 1);
    assert_eq!(
        queue[0].payload,
        SyncPayload::AnalysisDelete {
            id: record.id.clone()
        }
    );
}

#[tokio::test]
async fn remote_delete_of_missing_record_is_not_found() {
    let h = initialized(true, false).await;
    let err = h
        .service
        .delete_analysis("does-not-exist", false)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn remote_delete_of_missing_record_drops_stale_mirror() {
    let h = initialized(true, false).await;
    let mirror = NewAnalysis::from_diagnosis(
        USER,
        "https://storage.test/user-1/leaf.jpg",
        &diagnosis("Healthy", 0.9),
        InferenceStrategy::RemoteApi,
    )
    .into_record("server-gone".to_string(), true);
    h.local.records.lock().unwrap().push(mirror);

    let err = h
        .service
        .delete_analysis("server-gone", false)
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NotFound(_)));
    assert!(h.local.record("server-gone").is_none());
    assert_eq!(h.local.get_pending_sync_count().unwrap(), 0);
}

#[tokio::test]
async fn clear_offline_data_empties_store_and_queue() {
    let h = initialized(false, true).await;
    h.service.analyze_image("/tmp/a.jpg", USER).await.unwrap();
    h.service.analyze_image("/tmp/b.jpg", USER).await.unwrap();

    h.service.clear_offline_data().await.unwrap();

    assert!(h.service.get_analyses(USER).await.unwrap().is_empty());
    assert_eq!(h.service.get_sync_status().await.unwrap().pending_sync_count, 0);
}
