use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use futures_util::StreamExt;
use switchyard_core::ChangeEvent;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{error, info, warn};

use crate::source::ControlPlaneSource;
use crate::synchronizer::{EventSender, Synchronizer};

/// Websocket change-event feed with an HTTP re-bootstrap fallback.
pub struct EventStream {
    ws_url: String,
    source: Arc<dyn ControlPlaneSource>,
    synchronizer: Arc<Synchronizer>,
    events: EventSender,
    poll_interval: Duration,
}

impl EventStream {
    pub fn new(
        ws_url: impl Into<String>,
        source: Arc<dyn ControlPlaneSource>,
        synchronizer: Arc<Synchronizer>,
        events: EventSender,
        poll_interval: Duration,
    ) -> Self {
        Self {
            ws_url: ws_url.into(),
            source,
            synchronizer,
            events,
            poll_interval,
        }
    }

    /// Prefers the websocket. Whenever it fails or closes, re-pulls the full
    /// snapshot over HTTP, waits `poll_interval` and reconnects.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                res = self.try_ws() => match res {
                    Ok(()) => warn!("change stream closed by control plane"),
                    Err(e) => error!("change stream failed: {e}. Falling back to HTTP pull"),
                },
                _ = shutdown.changed() => break,
            }

            if let Err(e) = self.synchronizer.bootstrap(self.source.as_ref()).await {
                error!("HTTP pull failed: {e}");
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }
        info!("change stream stopped");
    }

    async fn try_ws(&self) -> Result<()> {
        if self.ws_url.is_empty() {
            return Err(anyhow!("no websocket url configured"));
        }
        let (ws, _resp) = connect_async(self.ws_url.as_str()).await?;
        info!(url = %self.ws_url, "change stream connected");
        let (_write, mut read) = ws.split();
        while let Some(msg) = read.next().await {
            let text = match msg? {
                Message::Text(text) => text.as_str().to_owned(),
                Message::Binary(bytes) => String::from_utf8(bytes.to_vec())?,
                Message::Close(_) => break,
                _ => continue,
            };
            match ChangeEvent::parse_frame(&text) {
                Ok(events) => {
                    for event in events {
                        self.events.send(event).await.map_err(|_| anyhow!("event channel closed"))?;
                    }
                }
                Err(e) => warn!("ignoring change frame: {e}"),
            }
        }
        Ok(())
    }
}
