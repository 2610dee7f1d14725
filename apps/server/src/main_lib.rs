//! Service wiring shared by `main` and the route tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use cassava_backend::{HttpConnectivityMonitor, SupabaseClient, SupabaseConfig};
use cassava_core::hybrid::HybridAnalysisService;
use cassava_inference::{build_classifier, InferenceSettings, ModelRuntime};
use cassava_storage_sqlite::AnalysisRepository;

use crate::config::ServerConfig;

pub struct AppState {
    pub service: Arc<HybridAnalysisService>,
    pub supabase: Arc<SupabaseClient>,
}

pub async fn build_state(config: &ServerConfig) -> Result<Arc<AppState>> {
    let supabase_config = SupabaseConfig::from_env().context(
        "Supabase is not configured (set CASSAVA_SUPABASE_URL and CASSAVA_SUPABASE_ANON_KEY)",
    )?;
    let inference_settings = InferenceSettings::from_env()?;
    build_state_with(config, supabase_config, &inference_settings, None, None).await
}

/// `runtime` backs the on-device strategy; this binary ships none, so that
/// strategy needs an embedding caller.
pub async fn build_state_with(
    config: &ServerConfig,
    supabase_config: SupabaseConfig,
    inference_settings: &InferenceSettings,
    runtime: Option<Arc<dyn ModelRuntime>>,
    reconciliation_interval: Option<Duration>,
) -> Result<Arc<AppState>> {
    let data_dir = config.data_dir.to_string_lossy().to_string();
    let repository = AnalysisRepository::open(&data_dir)
        .with_context(|| format!("Failed to open local store in {}", data_dir))?;

    let probe_url = config
        .connectivity_probe_url
        .clone()
        .unwrap_or_else(|| format!("{}/auth/v1/health", supabase_config.url));
    let connectivity = HttpConnectivityMonitor::new(probe_url)?;
    let supabase = Arc::new(SupabaseClient::new(supabase_config)?);
    if supabase.test_connection().await {
        info!("Supabase project reachable");
    } else {
        warn!("Supabase project unreachable, analyses will be queued locally until it answers");
    }
    let classifier = build_classifier(inference_settings, runtime)?;

    let mut service = HybridAnalysisService::new(
        Arc::new(repository),
        supabase.clone(),
        classifier,
        Arc::new(connectivity),
    );
    if let Some(interval) = reconciliation_interval {
        service = service.with_reconciliation_interval(interval);
    }
    let service = Arc::new(service);

    service.initialize().await.context("Failed to initialize analysis service")?;
    match service.get_sync_status().await {
        Ok(status) => info!(
            "Analysis service ready (online: {}, pending sync: {})",
            status.is_online, status.pending_sync_count
        ),
        Err(e) => warn!("Analysis service ready, status unavailable: {}", e),
    }

    Ok(Arc::new(AppState { service, supabase }))
}
