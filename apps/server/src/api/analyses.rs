//! Analysis endpoints.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use tracing::{info, warn};

use cassava_core::analysis::AnalysisResult;

use crate::error::ApiResult;
use crate::main_lib::AppState;

// ─────────────────────────────────────────────────────────────────────────────
// Request Types
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    pub image_ref: String,
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub user_id: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteQuery {
    #[serde(default)]
    pub is_offline: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────────────────────────

async fn analyze_image(
    State(state): State<Arc<AppState>>,
    Json(body): Json<AnalyzeRequest>,
) -> ApiResult<(StatusCode, Json<AnalysisResult>)> {
    let result = state
        .service
        .analyze_image(&body.image_ref, &body.user_id)
        .await?;
    if result.record.is_failed_placeholder() {
        warn!(
            "[Api] Classification failed for {}, kept placeholder {} for retry",
            body.image_ref, result.record.id
        );
    } else {
        info!(
            "[Api] Analysis {} stored {}",
            result.record.id,
            if result.is_offline { "locally" } else { "remotely" }
        );
    }
    Ok((StatusCode::CREATED, Json(result)))
}

async fn list_analyses(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<Vec<AnalysisResult>>> {
    Ok(Json(state.service.get_analyses(&query.user_id).await?))
}

async fn delete_analysis(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Query(query): Query<DeleteQuery>,
) -> ApiResult<StatusCode> {
    state.service.delete_analysis(&id, query.is_offline).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/analyses", post(analyze_image).get(list_analyses))
        .route("/analyses/:id", delete(delete_analysis))
}
