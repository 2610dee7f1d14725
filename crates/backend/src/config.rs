//! Supabase project selection.

use serde::{Deserialize, Serialize};

pub const ENV_MODE: &str = "CASSAVA_SUPABASE_MODE";
pub const ENV_URL: &str = "CASSAVA_SUPABASE_URL";
pub const ENV_ANON_KEY: &str = "CASSAVA_SUPABASE_ANON_KEY";
pub const ENV_SELF_HOSTED_URL: &str = "CASSAVA_SUPABASE_SELF_HOSTED_URL";
pub const ENV_SELF_HOSTED_ANON_KEY: &str = "CASSAVA_SUPABASE_SELF_HOSTED_ANON_KEY";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SupabaseMode {
    Cloud,
    SelfHosted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
    pub mode: SupabaseMode,
    pub name: String,
}

impl SupabaseConfig {
    pub fn cloud(url: &str, anon_key: &str) -> Self {
        Self {
            url: normalize_url(url),
            anon_key: anon_key.trim().to_string(),
            mode: SupabaseMode::Cloud,
            name: "Supabase Cloud".to_string(),
        }
    }

    pub fn self_hosted(url: &str, anon_key: &str, name: Option<&str>) -> Self {
        Self {
            url: normalize_url(url),
            anon_key: anon_key.trim().to_string(),
            mode: SupabaseMode::SelfHosted,
            name: name.unwrap_or("Self-hosted Supabase").to_string(),
        }
    }

    /// Reads the configuration from the process environment.
    pub fn from_env() -> Option<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Self-hosted wins when selected and fully configured; otherwise cloud.
    /// Returns `None` when no usable project is configured.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if get(ENV_MODE).as_deref() == Some("self-hosted") {
            if let (Some(url), Some(key)) = (get(ENV_SELF_HOSTED_URL), get(ENV_SELF_HOSTED_ANON_KEY))
            {
                return Some(Self::self_hosted(&url, &key, None));
            }
            log::warn!("[Supabase] Self-hosted mode selected but not configured, using cloud");
        }

        match (get(ENV_URL), get(ENV_ANON_KEY)) {
            (Some(url), Some(key)) => Some(Self::cloud(&url, &key)),
            _ => None,
        }
    }
}

fn normalize_url(url: &str) -> String {
    url.trim().trim_end_matches('/').to_string()
}
