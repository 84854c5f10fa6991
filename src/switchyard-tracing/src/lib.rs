use std::borrow::Cow;

use anyhow::Result;
use opentelemetry::trace::TracerProvider;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{Protocol, WithExportConfig};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use opentelemetry_stdout::SpanExporter;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::{prelude::*, Registry};

/// Flushes and shuts the tracer provider down when dropped.
pub struct TelemetryGuard {
    provider: sdktrace::SdkTracerProvider,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("tracer provider shutdown failed: {e}");
        }
    }
}

/// `directives` as an `EnvFilter`, falling back to `info` when they do not parse.
pub fn env_filter(directives: &str) -> EnvFilter {
    EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Installs the global subscriber: an `fmt` layer in `logging_mode`
/// (`plain`, `json` or `pretty`) plus an OpenTelemetry layer exporting to
/// `otlp_endpoint`, or to stdout when none is given.
pub fn init(
    service_name: &str,
    otlp_endpoint: Option<&str>,
    logging_mode: &str,
    filter: &str,
) -> Result<TelemetryGuard> {
    let resource = Resource::builder()
        .with_service_name(Cow::Owned(service_name.to_string()))
        .with_attributes(vec![KeyValue::new("service.version", env!("CARGO_PKG_VERSION"))])
        .build();

    let provider = match otlp_endpoint.filter(|e| !e.trim().is_empty()) {
        Some(endpoint) => {
            let exporter = opentelemetry_otlp::SpanExporter::builder()
                .with_http()
                .with_protocol(Protocol::HttpBinary)
                .with_endpoint(endpoint)
                .build()?;
            sdktrace::SdkTracerProvider::builder()
                .with_batch_exporter(exporter)
                .with_resource(resource)
                .build()
        }
        None => sdktrace::SdkTracerProvider::builder()
            .with_simple_exporter(SpanExporter::default())
            .with_resource(resource)
            .build(),
    };

    let tracer = provider.tracer(Cow::Owned(service_name.to_string()));
    let otel_layer = OpenTelemetryLayer::new(tracer);

    let filter = env_filter(filter);
    // boxed so the three modes unify
    let fmt_layer: Box<dyn tracing_subscriber::Layer<_> + Send + Sync> = match logging_mode {
        "json" => Box::new(
            fmt::layer()
                .json()
                .with_thread_ids(true)
                .with_thread_names(true)
                .with_filter(filter),
        ),
        "pretty" => Box::new(fmt::layer().pretty().with_filter(filter)),
        _ => Box::new(fmt::layer().with_filter(filter)),
    };

    let subscriber = Registry::default().with(fmt_layer).with(otel_layer);
    tracing::subscriber::set_global_default(subscriber)?;

    Ok(TelemetryGuard { provider })
}
