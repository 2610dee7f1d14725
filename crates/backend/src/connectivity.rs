//! Reachability probe used to pick between the remote and local paths.

use std::time::Duration;

use async_trait::async_trait;
use log::debug;

use cassava_core::connectivity::ConnectivityMonitor;

const PROBE_TIMEOUT_SECS: u64 = 3;

/// Treats any HTTP response from the probe URL as "online".
pub struct HttpConnectivityMonitor {
    client: reqwest::Client,
    probe_url: String,
}

impl HttpConnectivityMonitor {
    pub fn new(probe_url: impl Into<String>) -> crate::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(PROBE_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            probe_url: probe_url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityMonitor for HttpConnectivityMonitor {
    async fn is_online(&self) -> bool {
        match self.client.head(&self.probe_url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!("[Connectivity] Probe {} failed: {}", self.probe_url, e);
                false
            }
        }
    }
}
