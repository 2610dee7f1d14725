//! Session endpoints backed by Supabase auth.

use std::sync::Arc;

use axum::{
    extract::State,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use cassava_backend::AuthUser;

use crate::error::{ApiError, ApiResult};
use crate::main_lib::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsRequest {
    pub email: String,
    pub password: String,
}

impl CredentialsRequest {
    fn validate(&self) -> ApiResult<()> {
        if self.email.trim().is_empty() || self.password.is_empty() {
            return Err(ApiError::BadRequest(
                "email and password are required".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub user: Option<AuthUser>,
}

async fn sign_up(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> ApiResult<Json<SessionResponse>> {
    body.validate()?;
    let user = state.supabase.sign_up(body.email.trim(), &body.password).await?;
    Ok(Json(SessionResponse { user }))
}

async fn sign_in(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CredentialsRequest>,
) -> ApiResult<Json<SessionResponse>> {
    body.validate()?;
    let user = state.supabase.sign_in(body.email.trim(), &body.password).await?;
    info!("[Api] User {} signed in", user.id);
    Ok(Json(SessionResponse { user: Some(user) }))
}

async fn sign_out(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionResponse>> {
    state.supabase.sign_out().await?;
    Ok(Json(SessionResponse { user: None }))
}

async fn current_user(State(state): State<Arc<AppState>>) -> ApiResult<Json<SessionResponse>> {
    let user = state.supabase.get_current_user().await?;
    Ok(Json(SessionResponse { user }))
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/auth/signup", post(sign_up))
        .route("/auth/signin", post(sign_in))
        .route("/auth/signout", post(sign_out))
        .route("/auth/user", get(current_user))
}
