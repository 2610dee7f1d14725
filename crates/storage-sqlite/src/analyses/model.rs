//! Database models for analyses and the sync queue.

use diesel::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::analyses)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct AnalysisDB {
    pub id: String,
    pub user_id: String,
    pub image_uri: String,
    pub disease_detected: String,
    pub confidence_score: f64,
    pub severity_level: Option<String>,
    pub treatment_recommendation: Option<String>,
    /// JSON array of strings.
    pub recommendations: String,
    /// JSON object.
    pub analysis_metadata: String,
    pub created_at: String,
    pub synced: i32,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::sync_queue)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncQueueEntryDB {
    pub id: String,
    pub entry_type: String,
    pub record_id: String,
    /// Owner of an analysis entry; tombstones carry none.
    pub user_id: Option<String>,
    pub payload: String,
    pub enqueued_at: String,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub last_attempt_at: Option<String>,
}

#[derive(
    Queryable,
    Identifiable,
    Insertable,
    AsChangeset,
    Selectable,
    Debug,
    Clone,
    Serialize,
    Deserialize,
)]
#[diesel(table_name = crate::schema::sync_engine_state)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SyncEngineStateDB {
    pub id: i32,
    pub last_sync_at: Option<String>,
    pub last_cycle_status: Option<String>,
    pub last_cycle_duration_ms: Option<i64>,
    pub last_error: Option<String>,
}
