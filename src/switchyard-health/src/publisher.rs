use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::StatusNotification;
use switchyard_errors::{GatewayError, GatewayResult};
use tokio::sync::mpsc;
use tracing::info;

/// Where membership changes found by health checking are sent.
#[async_trait]
pub trait StatusPublisher: Send + Sync {
    async fn publish(&self, note: &StatusNotification) -> GatewayResult<()>;
}

#[derive(Debug, Clone, Default)]
pub struct LogPublisher;

#[async_trait]
impl StatusPublisher for LogPublisher {
    async fn publish(&self, note: &StatusNotification) -> GatewayResult<()> {
        let urls: Vec<&str> = note.upstream_list.iter().map(|u| u.url.as_str()).collect();
        info!(key = %note.selector_key, upstreams = ?urls, "upstream membership changed");
        Ok(())
    }
}

/// Forwards notifications into a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelPublisher {
    tx: mpsc::Sender<StatusNotification>,
}

impl ChannelPublisher {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<StatusNotification>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

#[async_trait]
impl StatusPublisher for ChannelPublisher {
    async fn publish(&self, note: &StatusNotification) -> GatewayResult<()> {
        self.tx
            .send(note.clone())
            .await
            .map_err(|_| GatewayError::control_plane("status channel closed"))
    }
}

/// POSTs notifications as JSON to the control plane.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpPublisher {
    pub fn new(url: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("status publisher: {e}")))?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl StatusPublisher for HttpPublisher {
    async fn publish(&self, note: &StatusNotification) -> GatewayResult<()> {
        self.client
            .post(&self.url)
            .json(note)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map(drop)
            .map_err(GatewayError::control_plane)
    }
}
