use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::Upstream;
use switchyard_errors::{GatewayError, GatewayResult};
use tokio::net::TcpStream;

/// Checks whether one upstream answers. Timeouts are applied by the caller.
#[async_trait]
pub trait Prober: Send + Sync {
    async fn probe(&self, upstream: &Upstream) -> GatewayResult<()>;
}

/// Reachable when a TCP connection to `host:port` opens.
#[derive(Debug, Clone, Default)]
pub struct TcpProber;

#[async_trait]
impl Prober for TcpProber {
    async fn probe(&self, upstream: &Upstream) -> GatewayResult<()> {
        let addr = upstream.socket_address();
        TcpStream::connect(&addr)
            .await
            .map(drop)
            .map_err(|e| GatewayError::probe(addr, e))
    }
}

/// Reachable when `GET {protocol}://{url}{path}` answers below 500.
#[derive(Debug, Clone)]
pub struct HttpProber {
    client: reqwest::Client,
    path: String,
}

impl HttpProber {
    pub fn new(path: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("http prober: {e}")))?;
        Ok(Self {
            client,
            path: path.into(),
        })
    }
}

#[async_trait]
impl Prober for HttpProber {
    async fn probe(&self, upstream: &Upstream) -> GatewayResult<()> {
        let target = format!("{}{}", upstream.probe_target(), self.path);
        let resp = self
            .client
            .get(&target)
            .send()
            .await
            .map_err(|e| GatewayError::probe(&target, e))?;
        if resp.status().is_server_error() {
            return Err(GatewayError::probe(target, format!("status {}", resp.status())));
        }
        Ok(())
    }
}
