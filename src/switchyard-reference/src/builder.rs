use std::time::Duration;

use async_trait::async_trait;
use switchyard_core::MetaData;
use switchyard_errors::{GatewayError, GatewayResult};
use url::Url;

use crate::reference::{runtime_load_balance, RegistryConfig, RouteReference};

/// Constructs the network-facing part of a reference.
#[async_trait]
pub trait ReferenceBuilder: Send + Sync {
    async fn build(&self, meta: &MetaData, registry: &RegistryConfig) -> GatewayResult<RouteReference>;
}

/// Builds HTTP invokers with `reqwest`, aimed at the metadata url or the
/// registry address.
#[derive(Debug, Clone, Default)]
pub struct HttpReferenceBuilder;

#[async_trait]
impl ReferenceBuilder for HttpReferenceBuilder {
    async fn build(&self, meta: &MetaData, registry: &RegistryConfig) -> GatewayResult<RouteReference> {
        if !meta.enabled {
            return Err(GatewayError::build(&meta.path, "metadata disabled"));
        }
        let ext = meta.rpc_ext()?.unwrap_or_default();

        let target = ext
            .url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .unwrap_or_else(|| registry.address.clone());
        if target.trim().is_empty() {
            return Err(GatewayError::build(&meta.path, "no url and no registry address"));
        }
        let target = if target.contains("://") { target } else { format!("http://{target}") };
        let parsed = Url::parse(&target).map_err(|e| GatewayError::build(&meta.path, format!("bad target {target}: {e}")))?;
        if parsed.host_str().is_none() {
            return Err(GatewayError::build(&meta.path, format!("target {target} has no host")));
        }

        let timeout = Duration::from_millis(ext.timeout.unwrap_or(registry.timeout_ms));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::build(&meta.path, e))?;

        let mut reference = RouteReference::new(&meta.path, &meta.service_name, target, client);
        reference.method_name = meta.method_name.clone();
        reference.version = ext.version;
        reference.group = ext.group;
        reference.retries = ext.retries.unwrap_or(0);
        reference.timeout = timeout;
        if let Some(lb) = ext.loadbalance.as_deref() {
            reference.load_balance = runtime_load_balance(lb);
        }
        Ok(reference)
    }
}
