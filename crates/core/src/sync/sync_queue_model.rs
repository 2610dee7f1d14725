//! Offline sync queue models.

use serde::{Deserialize, Serialize};

use crate::analysis::AnalysisRecord;

/// Kinds of pending remote work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncEntryType {
    Analysis,
    AnalysisDelete,
}

impl SyncEntryType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Analysis => "analysis",
            Self::AnalysisDelete => "analysis_delete",
        }
    }
}

/// Payload stored with a queue entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum SyncPayload {
    /// Full record as it was enqueued.
    Analysis(AnalysisRecord),
    /// Tombstone for a remote record deleted while unreachable.
    AnalysisDelete { id: String },
}

impl SyncPayload {
    pub fn entry_type(&self) -> SyncEntryType {
        match self {
            Self::Analysis(_) => SyncEntryType::Analysis,
            Self::AnalysisDelete { .. } => SyncEntryType::AnalysisDelete,
        }
    }

    pub fn record_id(&self) -> &str {
        match self {
            Self::Analysis(record) => &record.id,
            Self::AnalysisDelete { id } => id,
        }
    }

    /// User the entry must be replayed as. Tombstones are replayed by whoever is signed in.
    pub fn owner_id(&self) -> Option<&str> {
        match self {
            Self::Analysis(record) => Some(&record.user_id),
            Self::AnalysisDelete { .. } => None,
        }
    }
}

/// Durable unit of pending remote work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncQueueEntry {
    pub id: String,
    pub entry_type: SyncEntryType,
    pub record_id: String,
    pub payload: SyncPayload,
    pub enqueued_at: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
}

/// Outcome of one reconciliation cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncCycleOutcome {
    Ok,
    Partial,
    Failed,
    Offline,
}

impl SyncCycleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Partial => "partial",
            Self::Failed => "failed",
            Self::Offline => "offline",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ok" => Some(Self::Ok),
            "partial" => Some(Self::Partial),
            "failed" => Some(Self::Failed),
            "offline" => Some(Self::Offline),
            _ => None,
        }
    }
}

/// Persisted bookkeeping about the last reconciliation cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEngineState {
    pub last_sync_at: Option<String>,
    pub last_cycle_status: Option<String>,
    pub last_cycle_duration_ms: Option<i64>,
    pub last_error: Option<String>,
}

/// Counts from one drain of the queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    pub synced: usize,
    pub failed: usize,
    /// Queued entries this drain did not attempt: other users' records, entries
    /// past the batch limit, or the rest of the batch after the session was rejected.
    pub skipped: usize,
    pub remaining: i64,
    pub duration_ms: i64,
}

impl SyncReport {
    pub fn outcome(&self) -> SyncCycleOutcome {
        match (self.synced, self.failed) {
            (_, 0) => SyncCycleOutcome::Ok,
            (0, _) => SyncCycleOutcome::Failed,
            _ => SyncCycleOutcome::Partial,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    Idle,
    CheckingConnectivity,
    Draining,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStatus {
    Online,
    Offline,
}

/// Snapshot reported to callers for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub is_online: bool,
    pub pending_sync_count: i64,
    pub backend_status: BackendStatus,
    pub last_sync_at: Option<String>,
    pub last_sync_outcome: Option<SyncCycleOutcome>,
    pub reconciliation_state: ReconciliationState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{InferenceStrategy, NewAnalysis};
    use crate::errors::InferenceError;

    #[test]
    fn payload_serialization_matches_queue_contract() {
        let tombstone = SyncPayload::AnalysisDelete {
            id: "remote-1".to_string(),
        };
        let json = serde_json::to_value(&tombstone).expect("serialize tombstone");
        assert_eq!(
            json,
            serde_json::json!({"type": "analysis_delete", "payload": {"id": "remote-1"}})
        );
        assert_eq!(tombstone.entry_type(), SyncEntryType::AnalysisDelete);
        assert_eq!(tombstone.record_id(), "remote-1");
    }

    #[test]
    fn analysis_payload_keeps_full_record() {
        let record = NewAnalysis::failed(
            "user-1",
            "/tmp/leaf.jpg",
            InferenceStrategy::RemoteApi,
            &InferenceError::Timeout,
        )
        .into_record("local-1".to_string(), false);
        let payload = SyncPayload::Analysis(record.clone());

        let text = serde_json::to_string(&payload).expect("serialize");
        let back: SyncPayload = serde_json::from_str(&text).expect("deserialize");
        assert_eq!(back, SyncPayload::Analysis(record));
        assert_eq!(back.record_id(), "local-1");
    }

    #[test]
    fn report_outcome_reflects_failures() {
        let mut report = SyncReport::default();
        assert_eq!(report.outcome(), SyncCycleOutcome::Ok);
        report.failed = 1;
        assert_eq!(report.outcome(), SyncCycleOutcome::Failed);
        report.synced = 2;
        assert_eq!(report.outcome(), SyncCycleOutcome::Partial);
    }
}
