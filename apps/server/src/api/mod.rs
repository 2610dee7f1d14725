//! REST surface over the hybrid analysis service.

use std::sync::Arc;

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};

use crate::main_lib::AppState;

mod analyses;
mod auth;
mod sync;


async fn healthz() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

pub fn app_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/healthz", get(healthz))
        .merge(analyses::router())
        .merge(sync::router())
        .merge(auth::router());

    Router::new().nest("/api/v1", api).with_state(state)
}
