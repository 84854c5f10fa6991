use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use switchyard_config::{load_config, load_snapshot, FileConfig, ProbeKind};
use switchyard_control_sync::{event_channel, EventStream, HttpControlPlane};
use switchyard_gateway::{DataPlane, DataPlaneSettings};
use switchyard_health::{HttpProber, HttpPublisher, LogPublisher, Prober, StatusPublisher, TcpProber};
use switchyard_reference::HttpReferenceBuilder;
use tokio::signal;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(version, about = "Switchyard - API gateway data plane")]
struct Args {
    /// Path to config file (yaml/json/toml)
    #[arg(short, long, default_value = "./config.yaml")]
    config: String,
    /// Routing snapshot to start from; overrides `bootstrap.snapshot`
    #[arg(short, long)]
    snapshot: Option<String>,
}

fn build_data_plane(file: &FileConfig) -> Result<DataPlane> {
    let probe_timeout = Duration::from_millis(file.health.probe_timeout_ms.max(1));
    let prober: Arc<dyn Prober> = match file.health.probe {
        ProbeKind::Tcp => Arc::new(TcpProber),
        ProbeKind::Http => Arc::new(HttpProber::new(&file.health.probe_path, probe_timeout)?),
    };

    let notify_url = if !file.health.notify_url.is_empty() {
        Some(file.health.notify_url.clone())
    } else if file.controlplane.is_configured() {
        Some(file.controlplane.status_url())
    } else {
        None
    };
    let publisher: Arc<dyn StatusPublisher> = match notify_url {
        Some(url) => Arc::new(HttpPublisher::new(url, Duration::from_millis(file.controlplane.timeout_ms))?),
        None => Arc::new(LogPublisher),
    };

    let settings = DataPlaneSettings {
        continuation: file.gateway.continuation,
        health: file.health.to_health_config(),
        reference: file.reference.to_reference_config(),
        registry: file.reference.registry.clone(),
    };
    Ok(DataPlane::with_components(settings, prober, publisher, Arc::new(HttpReferenceBuilder)))
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();
    let file = load_config(&args.config)?;

    let service_name = if file.tracing.service_name.is_empty() {
        file.gateway.name.clone()
    } else {
        file.tracing.service_name.clone()
    };
    let otlp = Some(file.tracing.otlp_endpoint.as_str()).filter(|e| !e.is_empty());
    let _telemetry = switchyard_tracing::init(&service_name, otlp, &file.gateway.logging_mode, &file.gateway.log_filter)?;
    info!("Switchyard starting with args: {:?}", args);

    let plane = Arc::new(build_data_plane(&file)?);
    let (events, rx) = event_channel(1024);
    let mut tasks = plane.spawn_background(rx);

    if file.controlplane.is_configured() {
        let source = Arc::new(HttpControlPlane::new(
            file.controlplane.url.clone(),
            Duration::from_millis(file.controlplane.timeout_ms),
        )?);
        if let Err(e) = plane.bootstrap(source.as_ref()).await {
            warn!("initial pull from control plane failed: {e}");
        }
        let stream = EventStream::new(
            file.controlplane.ws_url.clone(),
            source,
            plane.synchronizer().clone(),
            events.clone(),
            Duration::from_secs(file.controlplane.poll_interval_sec.max(1)),
        );
        tasks.push(tokio::spawn(stream.run(plane.shutdown_signal())));
    } else if let Some(path) = args.snapshot.as_ref().or(file.bootstrap.snapshot.as_ref()) {
        plane.install(load_snapshot(path)?).await;
        info!(path = %path, "routing snapshot installed");
    } else {
        warn!("no control plane and no snapshot configured; routing table starts empty");
    }

    signal::ctrl_c().await?;
    info!("Shutting down");
    plane.shutdown();
    drop(events);
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}
