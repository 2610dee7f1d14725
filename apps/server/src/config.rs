//! Process configuration read once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

pub const ENV_DATA_DIR: &str = "CASSAVA_DATA_DIR";
pub const ENV_LISTEN_ADDR: &str = "CASSAVA_LISTEN_ADDR";
pub const ENV_CONNECTIVITY_PROBE_URL: &str = "CASSAVA_CONNECTIVITY_PROBE_URL";

const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1:8088";
const DEFAULT_DATA_DIR: &str = "cassava_data";

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub listen_addr: SocketAddr,
    /// Defaults to the Supabase auth health endpoint when unset.
    pub connectivity_probe_url: Option<String>,
}

impl ServerConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let listen_addr = get(ENV_LISTEN_ADDR).unwrap_or_else(|| DEFAULT_LISTEN_ADDR.to_string());
        let listen_addr = listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("{} is not a socket address: {}", ENV_LISTEN_ADDR, listen_addr))?;

        Ok(Self {
            data_dir: get(ENV_DATA_DIR)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR)),
            listen_addr,
            connectivity_probe_url: get(ENV_CONNECTIVITY_PROBE_URL),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_unset() {
        let config = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.listen_addr, DEFAULT_LISTEN_ADDR.parse().unwrap());
        assert_eq!(config.data_dir, PathBuf::from(DEFAULT_DATA_DIR));
        assert!(config.connectivity_probe_url.is_none());
    }

    #[test]
    fn bad_listen_addr_is_an_error() {
        let result = ServerConfig::from_lookup(|key| {
            (key == ENV_LISTEN_ADDR).then(|| "not-an-addr".to_string())
        });
        assert!(result.is_err());
    }
}
