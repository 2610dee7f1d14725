//! Repository for offline analyses, the sync queue and engine bookkeeping.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use log::debug;
use uuid::Uuid;

use cassava_core::analysis::{AnalysisRecord, LocalAnalysisStore, NewAnalysis, SeverityLevel};
use cassava_core::errors::{Error, Result};
use cassava_core::sync::{
    SyncCycleOutcome, SyncEngineState, SyncEntryType, SyncPayload, SyncQueueEntry,
};

use crate::db::{
    create_pool, get_connection, init, run_pending_migrations, spawn_writer, DbPool, WriteHandle,
};
use crate::errors::StorageError;
use crate::schema::{analyses, sync_engine_state, sync_queue};

use super::model::{AnalysisDB, SyncEngineStateDB, SyncQueueEntryDB};

fn enum_to_db<T: serde::Serialize>(value: &T) -> Result<String> {
    Ok(serde_json::to_string(value)?.trim_matches('"').to_string())
}

fn enum_from_db<T: serde::de::DeserializeOwned>(value: &str) -> Result<T> {
    Ok(serde_json::from_str(&format!("\"{}\"", value))?)
}

fn to_analysis_db(record: &AnalysisRecord) -> Result<AnalysisDB> {
    Ok(AnalysisDB {
        id: record.id.clone(),
        user_id: record.user_id.clone(),
        image_uri: record.image_ref.clone(),
        disease_detected: record.disease_label.clone(),
        confidence_score: record.confidence_score,
        severity_level: record.severity_level.map(|s| s.as_str().to_string()),
        treatment_recommendation: Some(record.treatment_text.clone()),
        recommendations: serde_json::to_string(&record.recommendations)?,
        analysis_metadata: serde_json::to_string(&record.analysis_metadata)?,
        created_at: record.created_at.clone(),
        synced: i32::from(record.synced),
    })
}

fn to_analysis_record(row: AnalysisDB) -> Result<AnalysisRecord> {
    Ok(AnalysisRecord {
        id: row.id,
        user_id: row.user_id,
        image_ref: row.image_uri,
        disease_label: row.disease_detected,
        confidence_score: row.confidence_score,
        severity_level: row.severity_level.as_deref().and_then(SeverityLevel::parse),
        treatment_text: row.treatment_recommendation.unwrap_or_default(),
        recommendations: serde_json::from_str(&row.recommendations)?,
        analysis_metadata: serde_json::from_str(&row.analysis_metadata)?,
        created_at: row.created_at,
        synced: row.synced != 0,
    })
}

fn to_queue_entry(row: SyncQueueEntryDB) -> Result<SyncQueueEntry> {
    Ok(SyncQueueEntry {
        id: row.id,
        entry_type: enum_from_db(&row.entry_type)?,
        record_id: row.record_id,
        payload: serde_json::from_str(&row.payload)?,
        enqueued_at: row.enqueued_at,
        attempts: row.attempts,
        last_error: row.last_error,
        last_attempt_at: row.last_attempt_at,
    })
}

/// Inserts a queue entry on the caller's transaction.
fn write_queue_entry(conn: &mut SqliteConnection, payload: &SyncPayload) -> Result<String> {
    let id = Uuid::now_v7().to_string();
    let row = SyncQueueEntryDB {
        id: id.clone(),
        entry_type: enum_to_db(&payload.entry_type())?,
        record_id: payload.record_id().to_string(),
        user_id: payload.owner_id().map(str::to_string),
        payload: serde_json::to_string(payload)?,
        enqueued_at: Utc::now().to_rfc3339(),
        attempts: 0,
        last_error: None,
        last_attempt_at: None,
    };

    diesel::insert_into(sync_queue::table)
        .values(&row)
        .execute(conn)
        .map_err(StorageError::from)?;

    Ok(id)
}

pub struct AnalysisRepository {
    pool: Arc<DbPool>,
    writer: WriteHandle,
}

impl AnalysisRepository {
    pub fn new(pool: Arc<DbPool>, writer: WriteHandle) -> Self {
        Self { pool, writer }
    }

    /// Opens (creating if needed) the database under `app_data_dir`.
    ///
    /// Migrations are applied by `initialize`.
    pub fn open(app_data_dir: &str) -> Result<Self> {
        let db_path = init(app_data_dir)?;
        let pool = create_pool(&db_path)?;
        let writer = spawn_writer(pool.as_ref().clone());
        Ok(Self::new(pool, writer))
    }
}

#[async_trait]
impl LocalAnalysisStore for AnalysisRepository {
    async fn initialize(&self) -> Result<()> {
        let mut conn = get_connection(&self.pool)?;
        run_pending_migrations(&mut conn)
    }

    async fn save_analysis_offline(&self, analysis: NewAnalysis) -> Result<AnalysisRecord> {
        if analysis.user_id.trim().is_empty() {
            return Err(Error::validation("user_id must not be empty"));
        }

        let record = analysis.into_record(Uuid::now_v7().to_string(), false);
        let row = to_analysis_db(&record)?;
        let payload = SyncPayload::Analysis(record.clone());

        self.writer
            .exec(move |conn| {
                diesel::insert_into(analyses::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                write_queue_entry(conn, &payload)?;
                Ok(())
            })
            .await?;

        debug!("[Storage] Saved offline analysis {}", record.id);
        Ok(record)
    }

    fn get_analyses_offline(&self, user_id: &str) -> Result<Vec<AnalysisRecord>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = analyses::table
            .filter(analyses::user_id.eq(user_id))
            .order(analyses::created_at.desc())
            .select(AnalysisDB::as_select())
            .load::<AnalysisDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter().map(to_analysis_record).collect()
    }

    async fn delete_analysis_offline(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(analyses::table.find(&id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(sync_queue::table.filter(sync_queue::record_id.eq(&id)))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn enqueue_remote_delete(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        let tombstone_type = enum_to_db(&SyncEntryType::AnalysisDelete)?;
        self.writer
            .exec(move |conn| {
                diesel::delete(analyses::table.find(&id))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                // Pending uploads of the same record are moot once it is deleted.
                diesel::delete(
                    sync_queue::table
                        .filter(sync_queue::record_id.eq(&id))
                        .filter(sync_queue::entry_type.ne(&tombstone_type)),
                )
                .execute(conn)
                .map_err(StorageError::from)?;

                let existing: i64 = sync_queue::table
                    .filter(sync_queue::record_id.eq(&id))
                    .filter(sync_queue::entry_type.eq(&tombstone_type))
                    .select(count_star())
                    .first(conn)
                    .map_err(StorageError::from)?;
                if existing == 0 {
                    write_queue_entry(conn, &SyncPayload::AnalysisDelete { id: id.clone() })?;
                }
                Ok(())
            })
            .await
    }

    fn get_pending_sync_count(&self) -> Result<i64> {
        let mut conn = get_connection(&self.pool)?;
        let count = sync_queue::table
            .select(count_star())
            .first::<i64>(&mut conn)
            .map_err(StorageError::from)?;
        Ok(count)
    }

    fn list_sync_queue(&self, user_id: &str, limit: i64) -> Result<Vec<SyncQueueEntry>> {
        let mut conn = get_connection(&self.pool)?;
        let rows = sync_queue::table
            .filter(
                sync_queue::user_id
                    .eq(user_id)
                    .or(sync_queue::user_id.is_null()),
            )
            .order((sync_queue::enqueued_at.asc(), sync_queue::id.asc()))
            .limit(limit)
            .select(SyncQueueEntryDB::as_select())
            .load::<SyncQueueEntryDB>(&mut conn)
            .map_err(StorageError::from)?;

        rows.into_iter().map(to_queue_entry).collect()
    }

    async fn complete_analysis_sync(
        &self,
        entry_id: &str,
        local_id: &str,
        remote: &AnalysisRecord,
    ) -> Result<()> {
        let entry_id = entry_id.to_string();
        let local_id = local_id.to_string();
        let mut mirror = remote.clone();
        mirror.synced = true;
        let row = to_analysis_db(&mirror)?;

        let remote_id = remote.id.clone();

        self.writer
            .exec(move |conn| {
                let dequeued = diesel::delete(sync_queue::table.find(&entry_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(analyses::table.find(&local_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;

                // The entry was withdrawn mid-flight: the record was deleted locally
                // while its upload ran, so the remote copy has to go too.
                if dequeued == 0 {
                    debug!(
                        "[Storage] Entry {} withdrawn during sync, queueing delete of {}",
                        entry_id, remote_id
                    );
                    write_queue_entry(conn, &SyncPayload::AnalysisDelete { id: remote_id })?;
                    return Ok(());
                }

                diesel::replace_into(analyses::table)
                    .values(&row)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn complete_sync_entry(&self, entry_id: &str) -> Result<()> {
        let entry_id = entry_id.to_string();
        self.writer
            .exec(move |conn| {
                diesel::delete(sync_queue::table.find(&entry_id))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn record_sync_failure(&self, entry_id: &str, error: &str) -> Result<()> {
        let entry_id = entry_id.to_string();
        let error = error.to_string();
        let now = Utc::now().to_rfc3339();
        self.writer
            .exec(move |conn| {
                diesel::update(sync_queue::table.find(&entry_id))
                    .set((
                        sync_queue::attempts.eq(sync_queue::attempts + 1),
                        sync_queue::last_error.eq(Some(error)),
                        sync_queue::last_attempt_at.eq(Some(now)),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    async fn mark_sync_cycle(
        &self,
        outcome: SyncCycleOutcome,
        duration_ms: i64,
        error: Option<String>,
    ) -> Result<()> {
        let status = outcome.as_str().to_string();
        let now = Utc::now().to_rfc3339();
        self.writer
            .exec(move |conn| {
                diesel::insert_into(sync_engine_state::table)
                    .values(SyncEngineStateDB {
                        id: 1,
                        last_sync_at: Some(now.clone()),
                        last_cycle_status: Some(status.clone()),
                        last_cycle_duration_ms: Some(duration_ms),
                        last_error: error.clone(),
                    })
                    .on_conflict(sync_engine_state::id)
                    .do_update()
                    .set((
                        sync_engine_state::last_sync_at.eq(Some(now)),
                        sync_engine_state::last_cycle_status.eq(Some(status)),
                        sync_engine_state::last_cycle_duration_ms.eq(Some(duration_ms)),
                        sync_engine_state::last_error.eq(error),
                    ))
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }

    fn get_sync_engine_state(&self) -> Result<SyncEngineState> {
        let mut conn = get_connection(&self.pool)?;
        let engine = sync_engine_state::table
            .find(1)
            .select(SyncEngineStateDB::as_select())
            .first::<SyncEngineStateDB>(&mut conn)
            .optional()
            .map_err(StorageError::from)?;

        Ok(engine
            .map(|row| SyncEngineState {
                last_sync_at: row.last_sync_at,
                last_cycle_status: row.last_cycle_status,
                last_cycle_duration_ms: row.last_cycle_duration_ms,
                last_error: row.last_error,
            })
            .unwrap_or_default())
    }

    async fn clear_offline_data(&self) -> Result<()> {
        self.writer
            .exec(|conn| {
                diesel::delete(sync_queue::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                diesel::delete(analyses::table)
                    .execute(conn)
                    .map_err(StorageError::from)?;
                Ok(())
            })
            .await
    }
}
