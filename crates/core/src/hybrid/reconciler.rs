//! Drains the offline sync queue against the remote backend.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use log::{debug, info, warn};

use crate::analysis::{AnalysisBackend, LocalAnalysisStore};
use crate::connectivity::ConnectivityMonitor;
use crate::errors::{Error, Result};
use crate::sync::{
    ReconciliationState, SyncCycleOutcome, SyncPayload, SyncQueueEntry, SyncReport,
    SyncRetryClass, SYNC_ATTEMPT_WARN_THRESHOLD, SYNC_DRAIN_BATCH_LIMIT,
};

pub(crate) struct Reconciler {
    local: Arc<dyn LocalAnalysisStore>,
    backend: Arc<dyn AnalysisBackend>,
    connectivity: Arc<dyn ConnectivityMonitor>,
    cycle_mutex: tokio::sync::Mutex<()>,
    state: RwLock<ReconciliationState>,
}

/// Puts the state back to idle however the cycle ends.
struct IdleOnDrop<'a>(&'a RwLock<ReconciliationState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.0.write() {
            *state = ReconciliationState::Idle;
        }
    }
}

impl Reconciler {
    pub(crate) fn new(
        local: Arc<dyn LocalAnalysisStore>,
        backend: Arc<dyn AnalysisBackend>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Self {
        Self {
            local,
            backend,
            connectivity,
            cycle_mutex: tokio::sync::Mutex::new(()),
            state: RwLock::new(ReconciliationState::Idle),
        }
    }

    pub(crate) fn state(&self) -> ReconciliationState {
        self.state
            .read()
            .map(|state| *state)
            .unwrap_or(ReconciliationState::Idle)
    }

    fn set_state(&self, next: ReconciliationState) {
        if let Ok(mut state) = self.state.write() {
            *state = next;
        }
    }

    /// One tick of the background loop: connectivity check, then a drain if online.
    pub(crate) async fn run_cycle(&self) -> Option<SyncReport> {
        self.set_state(ReconciliationState::CheckingConnectivity);
        let _idle = IdleOnDrop(&self.state);

        if !self.connectivity.is_online().await {
            debug!("[Sync] Offline, skipping reconciliation cycle");
            return None;
        }

        match self.drain().await {
            Ok(report) => Some(report),
            Err(err) => {
                warn!("[Sync] Reconciliation cycle failed: {}", err);
                None
            }
        }
    }

    /// Pushes every queued entry of the signed-in user once.
    ///
    /// Entries fail independently, except that a rejected session stops the
    /// drain and leaves the rest of the batch queued.
    pub(crate) async fn drain(&self) -> Result<SyncReport> {
        let _cycle_guard = self.cycle_mutex.lock().await;
        self.set_state(ReconciliationState::Draining);
        let _idle = IdleOnDrop(&self.state);
        let started_at = Instant::now();

        let pending = self.local.get_pending_sync_count()?;
        let entries = if pending == 0 {
            Vec::new()
        } else {
            match self.backend.current_user_id().await {
                Some(user_id) => self.local.list_sync_queue(&user_id, SYNC_DRAIN_BATCH_LIMIT)?,
                None => {
                    debug!("[Sync] No signed-in user, leaving {} entries queued", pending);
                    Vec::new()
                }
            }
        };

        let mut report = SyncReport {
            skipped: usize::try_from(pending)
                .unwrap_or_default()
                .saturating_sub(entries.len()),
            ..SyncReport::default()
        };
        let mut last_error: Option<String> = None;

        if !entries.is_empty() {
            info!("[Sync] Draining {} queued entries", entries.len());
        }

        for (index, entry) in entries.iter().enumerate() {
            let err = match self.sync_entry(entry).await {
                Ok(()) => {
                    report.synced += 1;
                    continue;
                }
                Err(err) => err,
            };

            report.failed += 1;
            let message = err.to_string();
            let class = SyncRetryClass::of(&err);
            match class {
                SyncRetryClass::ReauthRequired => {
                    warn!("[Sync] Session rejected, stopping drain: {}", message)
                }
                SyncRetryClass::Permanent => warn!(
                    "[Sync] Entry {} was rejected and will not sync as-is: {}",
                    entry.id, message
                ),
                SyncRetryClass::Retryable if entry.attempts + 1 >= SYNC_ATTEMPT_WARN_THRESHOLD => {
                    warn!(
                        "[Sync] Entry {} failed {} times: {}",
                        entry.id,
                        entry.attempts + 1,
                        message
                    )
                }
                SyncRetryClass::Retryable => {
                    debug!("[Sync] Entry {} failed: {}", entry.id, message)
                }
            }
            if let Err(record_err) = self.local.record_sync_failure(&entry.id, &message).await {
                warn!(
                    "[Sync] Failed to record sync failure for {}: {}",
                    entry.id, record_err
                );
            }
            last_error = Some(message);

            if class == SyncRetryClass::ReauthRequired {
                report.skipped += entries.len() - index - 1;
                break;
            }
        }

        report.remaining = match self.local.get_pending_sync_count() {
            Ok(count) => count,
            Err(err) => {
                warn!("[Sync] Could not count remaining entries: {}", err);
                (pending - report.synced as i64).max(0)
            }
        };
        report.duration_ms = started_at.elapsed().as_millis() as i64;

        let outcome = report.outcome();
        if let Err(err) = self
            .local
            .mark_sync_cycle(outcome, report.duration_ms, last_error)
            .await
        {
            warn!("[Sync] Failed to persist cycle outcome: {}", err);
        }
        if outcome != SyncCycleOutcome::Ok || report.synced > 0 {
            info!(
                "[Sync] Cycle {} synced={} failed={} skipped={} remaining={}",
                outcome.as_str(),
                report.synced,
                report.failed,
                report.skipped,
                report.remaining
            );
        }

        Ok(report)
    }

    async fn sync_entry(&self, entry: &SyncQueueEntry) -> Result<()> {
        match &entry.payload {
            SyncPayload::Analysis(record) => {
                let mut analysis = record.to_new_analysis();
                let uploaded_url = if record.has_local_image() {
                    let url = self
                        .backend
                        .upload_image(&record.image_ref, &record.user_id)
                        .await?;
                    analysis.image_ref = url.clone();
                    Some(url)
                } else {
                    None
                };

                let remote = match self.backend.save_analysis(&analysis).await {
                    Ok(remote) => remote,
                    Err(err) => {
                        if let Some(url) = uploaded_url {
                            compensate_upload(self.backend.as_ref(), &url).await;
                        }
                        return Err(err);
                    }
                };

                self.local
                    .complete_analysis_sync(&entry.id, &record.id, &remote)
                    .await
            }
            SyncPayload::AnalysisDelete { id } => match self.backend.delete_analysis(id).await {
                Ok(()) | Err(Error::NotFound(_)) => self.local.complete_sync_entry(&entry.id).await,
                Err(err) => Err(err),
            },
        }
    }
}

/// Best-effort removal of a blob whose record never made it to the table.
pub(crate) async fn compensate_upload(backend: &dyn AnalysisBackend, image_url: &str) {
    if let Err(err) = backend.delete_image(image_url).await {
        warn!(
            "[Sync] Failed to remove orphaned image {}: {}",
            image_url, err
        );
    }
}
