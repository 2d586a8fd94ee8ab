//! Startup reachability check: the monitor never starts polling without a
//! confirmed working network.
use crate::config::ConnectivityConfig;
use std::time::Duration;

/// Something that can confirm the network is usable.
#[allow(async_fn_in_trait)]
pub trait ReachabilityProbe {
    async fn check(&self) -> Result<(), ConnectivityError>;
}

/// Probes a known-good host over HTTP(S). Any HTTP response counts as reachable.
pub struct HttpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpProbe {
    pub fn new(config: &ConnectivityConfig) -> Result<Self, ConnectivityError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ConnectivityError::Client { source: e })?;
        Ok(Self {
            client,
            url: config.probe_url.clone(),
        })
    }
}

impl ReachabilityProbe for HttpProbe {
    async fn check(&self) -> Result<(), ConnectivityError> {
        tracing::info!(url = %self.url, "testing internet connection");
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| ConnectivityError::Unreachable {
                url: self.url.clone(),
                source: e,
            })?;
        tracing::info!(status = %response.status(), "internet connection OK");
        Ok(())
    }
}

/// Errors from the startup connectivity check. Always fatal.
#[derive(Debug)]
pub enum ConnectivityError {
    Client { source: reqwest::Error },
    Unreachable { url: String, source: reqwest::Error },
}

impl std::fmt::Display for ConnectivityError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectivityError::Client { source } => {
                write!(f, "failed to build HTTP client: {source}")
            }
            ConnectivityError::Unreachable { url, source } => {
                write!(
                    f,
                    "no internet connection ({url} unreachable: {source}); \
                     check your network and run slotwatch again"
                )
            }
        }
    }
}

impl std::error::Error for ConnectivityError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConnectivityError::Client { source } => Some(source),
            ConnectivityError::Unreachable { source, .. } => Some(source),
        }
    }
}
