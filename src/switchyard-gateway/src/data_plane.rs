use std::sync::Arc;
use std::time::Duration;

use switchyard_control_sync::{ControlPlaneSource, Synchronizer};
use switchyard_core::{
    ChangeEvent, CompiledSelector, ConfigSnapshot, ContinuationPolicy, LoadBalance, RequestContext, RoutingTable,
    Upstream,
};
use switchyard_errors::{GatewayError, GatewayResult};
use switchyard_health::{HealthChecker, HealthConfig, LogPublisher, Prober, StatusPublisher, TcpProber};
use switchyard_reference::{
    HttpReferenceBuilder, ReferenceBuilder, ReferenceCache, ReferenceConfig, RegistryConfig, RouteReference,
};
use switchyard_upstream::UpstreamPool;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::decision::{DecisionHandle, RouteDecision};

#[derive(Debug, Clone, Default)]
pub struct DataPlaneSettings {
    pub continuation: ContinuationPolicy,
    pub health: HealthConfig,
    pub reference: ReferenceConfig,
    pub registry: RegistryConfig,
}

/// Owns every data-plane component and answers routing questions.
pub struct DataPlane {
    continuation: ContinuationPolicy,
    table: Arc<RoutingTable>,
    pool: Arc<UpstreamPool>,
    health: Arc<HealthChecker>,
    references: Arc<ReferenceCache>,
    synchronizer: Arc<Synchronizer>,
    shutdown: watch::Sender<bool>,
}

impl DataPlane {
    /// TCP probes, log-only status publishing and HTTP references.
    pub fn new(settings: DataPlaneSettings) -> Self {
        Self::with_components(
            settings,
            Arc::new(TcpProber),
            Arc::new(LogPublisher),
            Arc::new(HttpReferenceBuilder),
        )
    }

    pub fn with_components(
        settings: DataPlaneSettings,
        prober: Arc<dyn Prober>,
        publisher: Arc<dyn StatusPublisher>,
        builder: Arc<dyn ReferenceBuilder>,
    ) -> Self {
        let table = Arc::new(RoutingTable::new());
        let pool = Arc::new(UpstreamPool::new());
        let health = Arc::new(HealthChecker::new(pool.clone(), prober, publisher, settings.health));
        let references = Arc::new(ReferenceCache::new(builder, settings.reference));
        references.init(settings.registry);
        let synchronizer = Arc::new(Synchronizer::new(table.clone(), pool.clone(), references.clone()));
        Self {
            continuation: settings.continuation,
            table,
            pool,
            health,
            references,
            synchronizer,
            shutdown: watch::Sender::new(false),
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub fn pool(&self) -> &Arc<UpstreamPool> {
        &self.pool
    }

    pub fn health(&self) -> &Arc<HealthChecker> {
        &self.health
    }

    pub fn references(&self) -> &Arc<ReferenceCache> {
        &self.references
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer> {
        &self.synchronizer
    }

    pub fn continuation(&self) -> ContinuationPolicy {
        self.continuation
    }

    // ---------- request path ----------

    /// Selector, then rule, then upstream pick for one request.
    ///
    /// `hash_key` feeds consistent hashing; the client address is used when
    /// it is absent.
    pub fn route(&self, plugin_name: &str, ctx: &RequestContext, hash_key: Option<&str>) -> GatewayResult<RouteDecision> {
        let snap = self.table.load();
        let matched = snap.match_selectors(plugin_name, ctx);
        let candidates = match self.continuation {
            ContinuationPolicy::FirstMatch => &matched[..matched.len().min(1)],
            ContinuationPolicy::Accumulate => &matched[..],
        };

        for selector in candidates {
            let rule = snap.match_rule(selector.id(), ctx);
            let handle = match rule {
                Some(r) => DecisionHandle::Rule(r.handle.clone()),
                None if !selector.handle.is_none() => DecisionHandle::Selector(selector.handle.clone()),
                None => {
                    debug!(selector = %selector.id(), path = %ctx.path(), "selector matched but yields no handle");
                    continue;
                }
            };

            let upstream = self.pick_for(selector, &handle, ctx, hash_key)?;
            let additional = matched
                .iter()
                .filter(|s| s.id() != selector.id())
                .map(|s| s.selector.clone())
                .collect();
            return Ok(RouteDecision {
                selector: selector.selector.clone(),
                rule: rule.map(|r| r.rule.clone()),
                handle,
                upstream,
                additional,
            });
        }
        Err(GatewayError::no_route(plugin_name, ctx.path()))
    }

    fn pick_for(
        &self,
        selector: &CompiledSelector,
        handle: &DecisionHandle,
        ctx: &RequestContext,
        hash_key: Option<&str>,
    ) -> GatewayResult<Option<Upstream>> {
        if selector.handle.upstreams().is_none() {
            return Ok(None);
        }
        let strategy = handle.load_balance().unwrap_or(LoadBalance::Random);
        let client = ctx.client_ip().map(|ip| ip.to_string());
        let key = hash_key.or(client.as_deref());
        self.pool.pick(selector.name(), strategy, key).map(Some)
    }

    /// Reference for `path`, built from its indexed metadata on first use.
    /// A path without metadata answers the cached entry or the placeholder.
    pub async fn resolve_reference(&self, path: &str) -> GatewayResult<Arc<RouteReference>> {
        let meta = self.table.load().metadata(path).cloned();
        match meta {
            Some(meta) => self.references.resolve(&meta).await,
            None => Ok(self.references.get(path).await),
        }
    }

    // ---------- configuration ----------

    pub async fn apply(&self, event: &ChangeEvent) -> GatewayResult<()> {
        self.synchronizer.apply(event).await
    }

    pub async fn install(&self, snapshot: ConfigSnapshot) {
        self.synchronizer.install(snapshot).await
    }

    pub async fn bootstrap(&self, source: &dyn ControlPlaneSource) -> GatewayResult<()> {
        self.synchronizer.bootstrap(source).await
    }

    // ---------- admin operations ----------

    pub fn submit_upstream(&self, key: &str, upstream: Upstream) -> bool {
        self.health.submit(key, upstream)
    }

    pub fn remove_upstream(&self, key: &str, url: &str) -> bool {
        self.pool.remove(key, |u| u.url == url) > 0
    }

    pub fn remove_upstreams_by_key(&self, key: &str) -> bool {
        self.health.remove_by_key(key)
    }

    pub fn replace_upstreams(&self, key: &str, upstreams: Vec<Upstream>) {
        self.pool.replace(key, upstreams)
    }

    pub async fn invalidate_reference(&self, path: &str) {
        self.references.invalidate(path).await
    }

    pub fn invalidate_all_references(&self) {
        self.references.invalidate_all()
    }

    pub fn init_registry(&self, registry: RegistryConfig) -> bool {
        self.references.init(registry)
    }

    pub fn set_health_check_enabled(&self, enabled: bool) {
        self.health.set_enabled(enabled)
    }

    pub fn set_probe_interval(&self, interval: Duration) {
        self.health.set_interval(interval)
    }

    // ---------- lifecycle ----------

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Spawns the event consumer and the health loop.
    pub fn spawn_background(&self, events: mpsc::Receiver<ChangeEvent>) -> Vec<JoinHandle<()>> {
        let sync = tokio::spawn(self.synchronizer.clone().run(events, self.shutdown_signal()));
        let health = tokio::spawn(self.health.clone().run(self.shutdown_signal()));
        info!("data plane background tasks started");
        vec![sync, health]
    }

    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
        info!("data plane shutdown requested");
    }
}
