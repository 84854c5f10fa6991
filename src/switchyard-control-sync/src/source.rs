use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use switchyard_core::{ConfigSnapshot, MetaData, Plugin, Rule, Selector};
use switchyard_errors::{GatewayError, GatewayResult};
use tracing::{debug, info};

/// Bulk reads against the control plane.
#[async_trait]
pub trait ControlPlaneSource: Send + Sync {
    async fn plugins(&self) -> GatewayResult<Vec<Plugin>>;
    async fn selectors_for_plugin(&self, plugin_id: &str) -> GatewayResult<Vec<Selector>>;
    async fn rules_for_selector(&self, selector_id: &str) -> GatewayResult<Vec<Rule>>;
    async fn all_metadata(&self) -> GatewayResult<Vec<MetaData>>;
}

/// Pulls plugins, their selectors, the selectors' rules and all metadata.
pub async fn pull_snapshot(source: &dyn ControlPlaneSource) -> GatewayResult<ConfigSnapshot> {
    let plugins = source.plugins().await?;
    let mut selectors = Vec::new();
    for plugin in &plugins {
        for mut selector in source.selectors_for_plugin(&plugin.id).await? {
            if selector.plugin_name.is_empty() {
                selector.plugin_name = plugin.name.clone();
            }
            selectors.push(selector);
        }
    }
    let mut rules = Vec::new();
    for selector in &selectors {
        rules.extend(source.rules_for_selector(&selector.id).await?);
    }
    let metadata = source.all_metadata().await?;
    info!(
        plugins = plugins.len(),
        selectors = selectors.len(),
        rules = rules.len(),
        metadata = metadata.len(),
        "control plane snapshot pulled"
    );
    Ok(ConfigSnapshot {
        plugins,
        selectors,
        rules,
        metadata,
    })
}

// Control planes either answer with the bare list or wrap it in `{code, message, data}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

/// `reqwest` client for the control plane's bulk endpoints.
#[derive(Debug, Clone)]
pub struct HttpControlPlane {
    client: reqwest::Client,
    base: String,
}

impl HttpControlPlane {
    pub fn new(base: impl Into<String>, timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Config(format!("control plane client: {e}")))?;
        Ok(Self {
            client,
            base: base.into().trim_end_matches('/').to_string(),
        })
    }

    async fn fetch<T: DeserializeOwned>(&self, path: &str) -> GatewayResult<T> {
        let url = format!("{}{}", self.base, path);
        debug!(url = %url, "control plane pull");
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GatewayError::control_plane(format!("GET {url}: {e}")))?;
        let body: Envelope<T> = resp
            .json()
            .await
            .map_err(|e| GatewayError::control_plane(format!("GET {url}: {e}")))?;
        Ok(match body {
            Envelope::Wrapped { data } | Envelope::Bare(data) => data,
        })
    }
}

#[async_trait]
impl ControlPlaneSource for HttpControlPlane {
    async fn plugins(&self) -> GatewayResult<Vec<Plugin>> {
        self.fetch("/plugin/all").await
    }

    async fn selectors_for_plugin(&self, plugin_id: &str) -> GatewayResult<Vec<Selector>> {
        self.fetch(&format!("/selector/plugin/{plugin_id}")).await
    }

    async fn rules_for_selector(&self, selector_id: &str) -> GatewayResult<Vec<Rule>> {
        self.fetch(&format!("/rule/selector/{selector_id}")).await
    }

    async fn all_metadata(&self) -> GatewayResult<Vec<MetaData>> {
        self.fetch("/meta-data/all").await
    }
}

/// In-memory source, used for local snapshot files.
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    snapshot: ConfigSnapshot,
}

impl StaticSource {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self { snapshot }
    }
}

#[async_trait]
impl ControlPlaneSource for StaticSource {
    async fn plugins(&self) -> GatewayResult<Vec<Plugin>> {
        Ok(self.snapshot.plugins.clone())
    }

    async fn selectors_for_plugin(&self, plugin_id: &str) -> GatewayResult<Vec<Selector>> {
        Ok(self
            .snapshot
            .selectors
            .iter()
            .filter(|s| s.plugin_id == plugin_id)
            .cloned()
            .collect())
    }

    async fn rules_for_selector(&self, selector_id: &str) -> GatewayResult<Vec<Rule>> {
        Ok(self
            .snapshot
            .rules
            .iter()
            .filter(|r| r.selector_id == selector_id)
            .cloned()
            .collect())
    }

    async fn all_metadata(&self) -> GatewayResult<Vec<MetaData>> {
        Ok(self.snapshot.metadata.clone())
    }
}
