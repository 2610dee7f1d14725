//! Sync queue endpoints.

use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tracing::info;

use cassava_core::sync::{BackendStatus, SyncReport, SyncStatus};

use crate::error::ApiResult;
use crate::main_lib::AppState;

async fn force_sync(State(state): State<Arc<AppState>>) -> ApiResult<Json<SyncReport>> {
    let report = state.service.force_sync().await?;
    info!(
        "[Api] Manual sync: {} synced, {} failed, {} remaining",
        report.synced, report.failed, report.remaining
    );
    Ok(Json(report))
}

async fn sync_status(State(state): State<Arc<AppState>>) -> ApiResult<Json<SyncStatus>> {
    Ok(Json(state.service.get_sync_status().await?))
}

/// Reachability of the Supabase project, independent of the connectivity probe.
async fn backend_status(State(state): State<Arc<AppState>>) -> Json<Value> {
    let status = if state.supabase.test_connection().await {
        BackendStatus::Online
    } else {
        BackendStatus::Offline
    };
    Json(json!({ "status": status }))
}

async fn clear_offline_data(State(state): State<Arc<AppState>>) -> ApiResult<StatusCode> {
    state.service.clear_offline_data().await?;
    info!("[Api] Offline data cleared");
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/sync", post(force_sync))
        .route("/sync/status", get(sync_status))
        .route("/backend/status", get(backend_status))
        .route("/offline-data", delete(clear_offline_data))
}
