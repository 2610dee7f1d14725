//! Supabase client: GoTrue auth, PostgREST table access and Storage uploads.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, error, info, warn};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use tokio::sync::{watch, RwLock};
use uuid::Uuid;

use cassava_core::analysis::{AnalysisBackend, AnalysisRecord, NewAnalysis};
use cassava_core::errors::Error as CoreError;

use crate::config::SupabaseConfig;
use crate::error::{BackendError, Result};
use crate::types::*;

/// Default timeout for API requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const MAX_LOG_BODY_CHARS: usize = 512;
/// Seconds before expiry at which the access token is rotated.
const TOKEN_EXPIRY_BUFFER_SECS: i64 = 60;

pub const ANALYSES_TABLE: &str = "cassava_analyses";
pub const IMAGES_BUCKET: &str = "cassava-images";

/// Client for one Supabase project.
///
/// Holds the signed-in session; every data call is scoped to that session's
/// user.
pub struct SupabaseClient {
    client: reqwest::Client,
    config: SupabaseConfig,
    session: RwLock<Option<AuthSession>>,
    auth_state: watch::Sender<Option<AuthUser>>,
}

impl SupabaseClient {
    pub fn new(config: SupabaseConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .build()?;
        let (auth_state, _) = watch::channel(None);

        info!(
            "[Supabase] Using {} ({:?}) at {}",
            config.name, config.mode, config.url
        );
        Ok(Self {
            client,
            config,
            session: RwLock::new(None),
            auth_state,
        })
    }

    fn log_response(status: reqwest::StatusCode, body: &str) {
        if status.is_success() {
            debug!("[Supabase] Response status: {}", status);
            return;
        }

        let mut preview = body.chars().take(MAX_LOG_BODY_CHARS).collect::<String>();
        if body.chars().count() > MAX_LOG_BODY_CHARS {
            preview.push_str("...");
        }
        debug!("[Supabase] Response error ({}): {}", status, preview);
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.url, path)
    }

    /// `apikey` plus a bearer token (the user's, or the anon key).
    fn headers(&self, bearer: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        let api_key = HeaderValue::from_str(&self.config.anon_key)
            .map_err(|_| BackendError::invalid_request("Invalid anon key format"))?;
        headers.insert("apikey", api_key);

        let token = bearer.unwrap_or(&self.config.anon_key);
        let auth_value = HeaderValue::from_str(&format!("Bearer {}", token))
            .map_err(|_| BackendError::auth("Invalid access token format"))?;
        headers.insert(AUTHORIZATION, auth_value);
        Ok(headers)
    }

    async fn read_body(response: reqwest::Response) -> Result<String> {
        let status = response.status();
        let body = response.text().await?;
        Self::log_response(status, &body);

        if !status.is_success() {
            let message = serde_json::from_str::<SupabaseErrorResponse>(&body)
                .ok()
                .and_then(SupabaseErrorResponse::best_message)
                .unwrap_or_else(|| format!("Request failed: {}", body));
            return Err(BackendError::api(status.as_u16(), message));
        }
        Ok(body)
    }

    /// Parse a JSON response body.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T> {
        let status = response.status();
        let body = Self::read_body(response).await?;
        serde_json::from_str(&body).map_err(|e| {
            error!(
                "[Supabase] Failed to deserialize response. Body: {}, Error: {}",
                body, e
            );
            BackendError::api(status.as_u16(), format!("Failed to parse response: {}", e))
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Auth
    // ─────────────────────────────────────────────────────────────────────────

    async fn store_session(&self, session: Option<AuthSession>) {
        let user = session.as_ref().map(|s| s.user.clone());
        *self.session.write().await = session;
        self.auth_state.send_replace(user);
    }

    /// Creates an account. Returns the user when the project signs users in
    /// immediately (email confirmation disabled).
    pub async fn sign_up(&self, email: &str, password: &str) -> Result<Option<AuthUser>> {
        let response = self
            .client
            .post(self.endpoint("/auth/v1/signup"))
            .headers(self.headers(None)?)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;
        let body: serde_json::Value = Self::parse_response(response).await?;

        if body.get("access_token").is_some() {
            let tokens: TokenResponse = serde_json::from_value(body)?;
            let session = AuthSession::from_token_response(tokens);
            let user = session.user.clone();
            self.store_session(Some(session)).await;
            info!("[Supabase] Signed up and signed in user {}", user.id);
            return Ok(Some(user));
        }

        info!("[Supabase] Signed up, confirmation pending");
        Ok(None)
    }

    /// Password grant.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<AuthUser> {
        let response = self
            .client
            .post(self.endpoint("/auth/v1/token?grant_type=password"))
            .headers(self.headers(None)?)
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await?;

        let tokens: TokenResponse = match Self::parse_response(response).await {
            Ok(tokens) => tokens,
            Err(BackendError::Api { status, message }) if matches!(status, 400 | 401) => {
                return Err(BackendError::auth(message));
            }
            Err(err) => return Err(err),
        };

        let session = AuthSession::from_token_response(tokens);
        let user = session.user.clone();
        self.store_session(Some(session)).await;
        info!("[Supabase] Signed in user {}", user.id);
        Ok(user)
    }

    /// Revokes the session remotely (best effort) and forgets it locally.
    pub async fn sign_out(&self) -> Result<()> {
        let token = self
            .session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone());

        if let Some(token) = token {
            let result = self
                .client
                .post(self.endpoint("/auth/v1/logout"))
                .headers(self.headers(Some(&token))?)
                .send()
                .await;
            match result {
                Ok(response) if !response.status().is_success() => {
                    warn!("[Supabase] Logout returned {}", response.status());
                }
                Err(e) => warn!("[Supabase] Logout request failed: {}", e),
                Ok(_) => {}
            }
        }

        self.store_session(None).await;
        info!("[Supabase] Signed out");
        Ok(())
    }

    /// Current user according to GoTrue; `None` when signed out or revoked.
    pub async fn get_current_user(&self) -> Result<Option<AuthUser>> {
        let token = match self.access_token().await {
            Ok(token) => token,
            Err(BackendError::Auth(_)) => return Ok(None),
            Err(err) => return Err(err),
        };

        let response = self
            .client
            .get(self.endpoint("/auth/v1/user"))
            .headers(self.headers(Some(&token))?)
            .send()
            .await?;

        match Self::parse_response::<AuthUser>(response).await {
            Ok(user) => Ok(Some(user)),
            Err(BackendError::Api { status, .. }) if matches!(status, 401 | 403) => {
                self.store_session(None).await;
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Receiver notified on sign-in, sign-out and session loss.
    pub fn on_auth_state_change(&self) -> watch::Receiver<Option<AuthUser>> {
        self.auth_state.subscribe()
    }

    /// Valid access token, rotating it when it is about to expire.
    ///
    /// The write lock is held across the refresh call so concurrent callers
    /// do not race to rotate the refresh token.
    async fn access_token(&self) -> Result<String> {
        let now = Utc::now().timestamp();
        {
            let session = self.session.read().await;
            match session.as_ref() {
                None => return Err(BackendError::auth("Not signed in")),
                Some(s) if !s.needs_refresh(now, TOKEN_EXPIRY_BUFFER_SECS) => {
                    return Ok(s.access_token.clone());
                }
                Some(_) => {}
            }
        }

        let mut session = self.session.write().await;
        let refresh_token = match session.as_ref() {
            None => return Err(BackendError::auth("Not signed in")),
            Some(s) if !s.needs_refresh(now, TOKEN_EXPIRY_BUFFER_SECS) => {
                return Ok(s.access_token.clone());
            }
            Some(s) => s.refresh_token.clone(),
        };

        debug!("[Supabase] Refreshing access token");
        let response = self
            .client
            .post(self.endpoint("/auth/v1/token?grant_type=refresh_token"))
            .headers(self.headers(None)?)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        match Self::parse_response::<TokenResponse>(response).await {
            Ok(tokens) => {
                let refreshed = AuthSession::from_token_response(tokens);
                let token = refreshed.access_token.clone();
                *session = Some(refreshed);
                Ok(token)
            }
            Err(BackendError::Api { status, message }) if status < 500 => {
                error!("[Supabase] Token refresh failed: {}", message);
                *session = None;
                drop(session);
                self.auth_state.send_replace(None);
                Err(BackendError::auth(format!(
                    "Session expired. Please sign in again. ({})",
                    message
                )))
            }
            Err(err) => Err(err),
        }
    }

    async fn session_user_id(&self) -> Result<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.user.id.clone())
            .ok_or_else(|| BackendError::auth("Not signed in"))
    }

    /// Authenticated user id, rejecting a caller-supplied id that differs.
    async fn owner_id(&self, requested: &str) -> Result<String> {
        let user_id = self.session_user_id().await?;
        if user_id != requested {
            return Err(BackendError::auth(format!(
                "Requested user {} does not match the signed-in user",
                requested
            )));
        }
        Ok(user_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Storage
    // ─────────────────────────────────────────────────────────────────────────

    fn public_url(&self, object_path: &str) -> String {
        self.endpoint(&format!(
            "/storage/v1/object/public/{}/{}",
            IMAGES_BUCKET, object_path
        ))
    }

    /// Object path inside the bucket for a public URL of this project.
    pub fn object_path_from_url(&self, image_url: &str) -> Option<String> {
        let prefix = self.public_url("");
        image_url
            .strip_prefix(&prefix)
            .filter(|path| !path.is_empty())
            .map(|path| path.split('?').next().unwrap_or(path).to_string())
    }

    async fn upload_object(&self, image_ref: &str, user_id: &str) -> Result<String> {
        let path = image_ref.strip_prefix("file://").unwrap_or(image_ref);
        let bytes = tokio::fs::read(path).await?;
        let object_path = format!(
            "{}/{}-{}.jpg",
            user_id,
            Utc::now().timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let token = self.access_token().await?;

        let response = self
            .client
            .post(self.endpoint(&format!(
                "/storage/v1/object/{}/{}",
                IMAGES_BUCKET, object_path
            )))
            .headers(self.headers(Some(&token))?)
            .header(CONTENT_TYPE, "image/jpeg")
            .header("x-upsert", "false")
            .body(bytes)
            .send()
            .await?;
        Self::read_body(response).await?;

        debug!("[Supabase] Uploaded image to {}", object_path);
        Ok(self.public_url(&object_path))
    }

    async fn remove_object(&self, image_url: &str) -> Result<()> {
        let Some(object_path) = self.object_path_from_url(image_url) else {
            debug!("[Supabase] {} is not in the images bucket, nothing to remove", image_url);
            return Ok(());
        };
        let token = self.access_token().await?;

        let response = self
            .client
            .delete(self.endpoint(&format!("/storage/v1/object/{}", IMAGES_BUCKET)))
            .headers(self.headers(Some(&token))?)
            .json(&serde_json::json!({ "prefixes": [object_path] }))
            .send()
            .await?;
        Self::read_body(response).await?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Table
    // ─────────────────────────────────────────────────────────────────────────

    fn table_url(&self, query: &str) -> String {
        self.endpoint(&format!("/rest/v1/{}?{}", ANALYSES_TABLE, query))
    }

    async fn insert_analysis(&self, analysis: &NewAnalysis) -> Result<AnalysisRecord> {
        let user_id = self.owner_id(&analysis.user_id).await?;
        let token = self.access_token().await?;
        let row = InsertAnalysisRow::from_new(analysis, &user_id);

        let response = self
            .client
            .post(self.table_url("select=*"))
            .headers(self.headers(Some(&token))?)
            .header("Prefer", "return=representation")
            .json(&row)
            .send()
            .await?;
        let rows: Vec<RemoteAnalysisRow> = Self::parse_response(response).await?;

        rows.into_iter()
            .next()
            .map(RemoteAnalysisRow::into_record)
            .ok_or_else(|| BackendError::api(500, "Insert returned no rows"))
    }

    async fn list_analyses(&self, user_id: &str) -> Result<Vec<AnalysisRecord>> {
        let user_id = self.owner_id(user_id).await?;
        let token = self.access_token().await?;

        let response = self
            .client
            .get(self.table_url(&format!(
                "select=*&user_id=eq.{}&order=created_at.desc",
                urlencoding::encode(&user_id)
            )))
            .headers(self.headers(Some(&token))?)
            .send()
            .await?;
        let rows: Vec<RemoteAnalysisRow> = Self::parse_response(response).await?;
        Ok(rows.into_iter().map(RemoteAnalysisRow::into_record).collect())
    }

    async fn remove_analysis(&self, id: &str) -> Result<()> {
        let user_id = self.session_user_id().await?;
        let token = self.access_token().await?;
        let filter = format!(
            "id=eq.{}&user_id=eq.{}",
            urlencoding::encode(id),
            urlencoding::encode(&user_id)
        );

        let response = self
            .client
            .get(self.table_url(&format!("select=image_url&{}", filter)))
            .headers(self.headers(Some(&token))?)
            .send()
            .await?;
        let rows: Vec<ImageUrlRow> = Self::parse_response(response).await?;
        let Some(existing) = rows.into_iter().next() else {
            return Err(BackendError::api(404, format!("Analysis {} not found", id)));
        };

        let response = self
            .client
            .delete(self.table_url(&filter))
            .headers(self.headers(Some(&token))?)
            .send()
            .await?;
        Self::read_body(response).await?;

        if let Some(image_url) = existing.image_url.filter(|url| !url.is_empty()) {
            if let Err(e) = self.remove_object(&image_url).await {
                warn!("[Supabase] Could not delete image {}: {}", image_url, e);
            }
        }
        Ok(())
    }

    /// HEAD count against the analyses table.
    pub async fn test_connection(&self) -> bool {
        let headers = match self.headers(None) {
            Ok(headers) => headers,
            Err(_) => return false,
        };
        let result = self
            .client
            .head(self.table_url("select=count"))
            .headers(headers)
            .header("Prefer", "count=exact")
            .send()
            .await;
        match result {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                debug!("[Supabase] Connection test failed: {}", e);
                false
            }
        }
    }
}

#[async_trait]
impl AnalysisBackend for SupabaseClient {
    async fn upload_image(&self, image_ref: &str, user_id: &str) -> cassava_core::Result<String> {
        let user_id = self.owner_id(user_id).await?;
        Ok(self.upload_object(image_ref, &user_id).await?)
    }

    async fn delete_image(&self, image_url: &str) -> cassava_core::Result<()> {
        Ok(self.remove_object(image_url).await?)
    }

    async fn save_analysis(&self, analysis: &NewAnalysis) -> cassava_core::Result<AnalysisRecord> {
        Ok(self.insert_analysis(analysis).await?)
    }

    async fn get_analyses(&self, user_id: &str) -> cassava_core::Result<Vec<AnalysisRecord>> {
        self.list_analyses(user_id)
            .await
            .map_err(BackendError::into_read_error)
    }

    async fn delete_analysis(&self, id: &str) -> cassava_core::Result<()> {
        self.remove_analysis(id).await.map_err(CoreError::from)
    }

    async fn current_user_id(&self) -> Option<String> {
        self.session_user_id().await.ok()
    }
}
