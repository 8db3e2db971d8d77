//! Health probing through the tunnel
//!
//! A live tunnel process is not enough: ssh can stay up while the remote
//! side forwards nothing. The probe therefore sends a real HTTP request
//! through the tunnel's SOCKS endpoint.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Target probed through the tunnel unless configured otherwise
pub const DEFAULT_PROBE_URL: &str = "http://192.168.0.1";

/// Upper bound on a single probe, connection included
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// A single pass/fail check of the tunnel.
///
/// Implementations do not retry; consecutive failures are counted by the
/// supervisor.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Invalid SOCKS proxy address {address}: {source}")]
    Proxy {
        address: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Failed to build probe client: {0}")]
    Client(#[source] reqwest::Error),

    #[error("Probe request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// Outcome of one probe request
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl HealthCheckResult {
    pub fn is_healthy(&self) -> bool {
        self.status.is_success()
    }
}

/// Probes an HTTP URL using the tunnel's local endpoint as a SOCKS5 proxy
pub struct SocksHealthProber {
    proxy_addr: String,
    probe_url: String,
    client: reqwest::Client,
    debug: bool,
}

impl SocksHealthProber {
    pub fn new(
        proxy_addr: impl Into<String>,
        probe_url: impl Into<String>,
        debug: bool,
    ) -> Result<Self, ProbeError> {
        Self::with_timeout(proxy_addr, probe_url, debug, DEFAULT_PROBE_TIMEOUT)
    }

    pub fn with_timeout(
        proxy_addr: impl Into<String>,
        probe_url: impl Into<String>,
        debug: bool,
        timeout: Duration,
    ) -> Result<Self, ProbeError> {
        let proxy_addr = proxy_addr.into();

        // socks5h: names are resolved on the far side of the tunnel
        let proxy = reqwest::Proxy::all(format!("socks5h://{}", proxy_addr)).map_err(|e| {
            ProbeError::Proxy {
                address: proxy_addr.clone(),
                source: e,
            }
        })?;

        let client = reqwest::Client::builder()
            .proxy(proxy)
            .timeout(timeout)
            .build()
            .map_err(ProbeError::Client)?;

        Ok(Self {
            proxy_addr,
            probe_url: probe_url.into(),
            client,
            debug,
        })
    }

    pub fn proxy_addr(&self) -> &str {
        &self.proxy_addr
    }

    pub fn probe_url(&self) -> &str {
        &self.probe_url
    }

    /// Issue one request through the tunnel
    pub async fn probe(&self) -> Result<HealthCheckResult, ProbeError> {
        let response = self
            .client
            .get(&self.probe_url)
            .send()
            .await
            .map_err(|e| ProbeError::Request {
                url: self.probe_url.clone(),
                source: e,
            })?;

        Ok(HealthCheckResult {
            status: response.status(),
            headers: response.headers().clone(),
        })
    }
}

#[async_trait]
impl HealthProbe for SocksHealthProber {
    async fn check(&self) -> bool {
        match self.probe().await {
            Ok(result) => {
                if self.debug {
                    debug!("Health check response headers: {:?}", result.headers);
                }
                if result.is_healthy() {
                    true
                } else {
                    warn!(
                        "Health check via {} failed with status: {}",
                        self.proxy_addr, result.status
                    );
                    false
                }
            }
            Err(e) => {
                warn!("Health check via {} failed: {}", self.proxy_addr, e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_result() {
        let ok = HealthCheckResult {
            status: StatusCode::NO_CONTENT,
            headers: HeaderMap::new(),
        };
        assert!(ok.is_healthy());

        let redirect = HealthCheckResult {
            status: StatusCode::FOUND,
            headers: HeaderMap::new(),
        };
        assert!(!redirect.is_healthy());
    }

    #[test]
    fn test_prober_accessors() {
        let prober = SocksHealthProber::new("127.0.0.1:9100", DEFAULT_PROBE_URL, false).unwrap();
        assert_eq!(prober.proxy_addr(), "127.0.0.1:9100");
        assert_eq!(prober.probe_url(), "http://192.168.0.1");
    }

    #[tokio::test]
    async fn test_unreachable_proxy_is_unhealthy() {
        // Bind then drop to get a port nobody listens on
        let addr = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap()
        };

        let prober = SocksHealthProber::with_timeout(
            addr.to_string(),
            DEFAULT_PROBE_URL,
            true,
            Duration::from_secs(2),
        )
        .unwrap();

        assert!(matches!(
            prober.probe().await,
            Err(ProbeError::Request { .. })
        ));
        assert!(!prober.check().await);
    }
}
