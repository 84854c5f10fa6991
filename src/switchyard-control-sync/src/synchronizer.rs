use std::sync::Arc;

use switchyard_core::{ChangeEvent, ConfigSnapshot, GatewayError, RoutingTable, SideEffect};
use switchyard_errors::GatewayResult;
use switchyard_reference::ReferenceCache;
use switchyard_upstream::UpstreamPool;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::source::{pull_snapshot, ControlPlaneSource};

pub type EventSender = mpsc::Sender<ChangeEvent>;

/// Typed change-event channel; clone the sender for every producer.
pub fn event_channel(capacity: usize) -> (EventSender, mpsc::Receiver<ChangeEvent>) {
    mpsc::channel(capacity)
}

/// Applies configuration into the routing index and carries out the
/// resulting pool and reference changes.
pub struct Synchronizer {
    table: Arc<RoutingTable>,
    pool: Arc<UpstreamPool>,
    references: Arc<ReferenceCache>,
}

impl Synchronizer {
    pub fn new(table: Arc<RoutingTable>, pool: Arc<UpstreamPool>, references: Arc<ReferenceCache>) -> Self {
        Self {
            table,
            pool,
            references,
        }
    }

    pub fn table(&self) -> &Arc<RoutingTable> {
        &self.table
    }

    pub async fn apply(&self, event: &ChangeEvent) -> GatewayResult<()> {
        let effects = self.table.apply(event)?;
        self.carry_out(effects).await;
        Ok(())
    }

    /// Installs a complete snapshot in one swap.
    pub async fn install(&self, snapshot: ConfigSnapshot) {
        let effects = self.table.install(snapshot);
        self.carry_out(effects).await;
    }

    pub async fn bootstrap(&self, source: &dyn ControlPlaneSource) -> GatewayResult<()> {
        let snapshot = pull_snapshot(source).await?;
        self.install(snapshot).await;
        Ok(())
    }

    async fn carry_out(&self, effects: Vec<SideEffect>) {
        for effect in effects {
            debug!(?effect, "side effect");
            match effect {
                SideEffect::ReplaceUpstreams { key, upstreams } => self.pool.replace(&key, upstreams),
                SideEffect::RemovePool { key } => {
                    self.pool.remove_key(&key);
                }
                SideEffect::InvalidateReference { path } => self.references.invalidate(&path).await,
            }
        }
    }

    /// Single consumer of the event channel; preserves per-entity order.
    /// Errors are logged and never stop the loop.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<ChangeEvent>, mut shutdown: watch::Receiver<bool>) {
        info!("config synchronizer started");
        loop {
            tokio::select! {
                next = events.recv() => {
                    let Some(event) = next else { break };
                    match self.apply(&event).await {
                        Ok(()) => {}
                        Err(e @ GatewayError::ConfigApplyConflict { .. }) => warn!("dropping stale change: {e}"),
                        Err(e) => warn!("dropping change event: {e}"),
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("config synchronizer stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use switchyard_core::{
        Condition, Entity, LoadBalance, MatchMode, MetaData, OwnerType, Plugin, Rule, Selector, Upstream,
        DIVIDE_PLUGIN,
    };
    use switchyard_reference::{HttpReferenceBuilder, ReferenceConfig};

    use crate::source::StaticSource;

    fn synchronizer() -> Arc<Synchronizer> {
        let references = Arc::new(ReferenceCache::new(
            Arc::new(HttpReferenceBuilder),
            ReferenceConfig::default(),
        ));
        Arc::new(Synchronizer::new(
            Arc::new(RoutingTable::new()),
            Arc::new(UpstreamPool::new()),
            references,
        ))
    }

    fn selector(version: i64, upstreams: &[&str]) -> Selector {
        let mut s = Selector::new("s-1", "p-1", "order");
        s.match_mode = MatchMode::Or;
        s.date_updated = version;
        let list: Vec<Upstream> = upstreams.iter().map(|u| Upstream::new(*u, 50)).collect();
        s.handle = Some(serde_json::to_string(&list).unwrap());
        s.conditions = vec![Condition::new("uri", "match", "/", "/order/**").owned_by(OwnerType::Selector, "s-1")];
        s
    }

    fn meta() -> MetaData {
        let mut m = MetaData::new("/order/find", "svc");
        m.rpc_ext = Some(r#"{"url":"127.0.0.1:1"}"#.into());
        m
    }

    fn snapshot() -> ConfigSnapshot {
        let mut rule = Rule::new("r-1", "s-1", "find");
        rule.handle = Some(r#"{"loadBalance":"roundRobin","retry":1,"timeout":1000}"#.into());
        rule.conditions = vec![Condition::new("uri", "match", "/", "/order/**")];
        ConfigSnapshot {
            plugins: vec![Plugin::new("p-1", DIVIDE_PLUGIN)],
            selectors: vec![selector(10, &["10.0.0.1:80", "10.0.0.2:80"])],
            rules: vec![rule],
            metadata: vec![meta()],
        }
    }

    #[tokio::test]
    async fn test_bootstrap_fills_index_and_pool() {
        let sync = synchronizer();
        sync.bootstrap(&StaticSource::new(snapshot())).await.unwrap();
        assert_eq!(sync.pool.upstreams("order").len(), 2);
        let snap = sync.table().load();
        assert_eq!(
            snap.rule("r-1").unwrap().handle.load_balance(),
            Some(LoadBalance::RoundRobin)
        );
    }

    #[tokio::test]
    async fn test_selector_update_swaps_pool() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        sync.apply(&ChangeEvent::upsert(Entity::Selector(selector(20, &["10.0.0.9:80"]))))
            .await
            .unwrap();
        let urls: Vec<_> = sync.pool.upstreams("order").into_iter().map(|u| u.url).collect();
        assert_eq!(urls, vec!["10.0.0.9:80"]);
    }

    #[tokio::test]
    async fn test_selector_delete_drops_pool() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        sync.apply(&ChangeEvent::delete(Entity::Selector(selector(20, &[]))))
            .await
            .unwrap();
        assert!(!sync.pool.contains_key("order"));
    }

    #[tokio::test]
    async fn test_metadata_update_invalidates_reference() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        sync.references.build(&meta()).await.unwrap();
        assert!(!sync.references.get("/order/find").await.is_placeholder());

        sync.apply(&ChangeEvent::upsert(Entity::MetaData(meta()))).await.unwrap();
        assert!(sync.references.get("/order/find").await.is_placeholder());
    }

    #[tokio::test]
    async fn test_eviction_survives_reinstall_and_condition_events() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        sync.references.build(&meta()).await.unwrap();
        assert!(sync.pool.evict("order", "10.0.0.1:80"));

        sync.install(snapshot()).await;
        let added = Condition::new("header", "=", "x-env", "gray")
            .with_id("c-2")
            .owned_by(OwnerType::Selector, "s-1");
        sync.apply(&ChangeEvent::upsert(Entity::Condition(added))).await.unwrap();

        let urls: Vec<_> = sync.pool.upstreams("order").into_iter().map(|u| u.url).collect();
        assert_eq!(urls, vec!["10.0.0.2:80"]);
        assert_eq!(sync.pool.evicted("order").len(), 1);
        assert!(!sync.references.get("/order/find").await.is_placeholder());
    }

    #[tokio::test]
    async fn test_stale_event_is_rejected() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        let err = sync
            .apply(&ChangeEvent::upsert(Entity::Selector(selector(5, &["10.9.9.9:80"]))))
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::ConfigApplyConflict { .. }));
        assert_eq!(sync.pool.upstreams("order").len(), 2);
    }

    #[tokio::test]
    async fn test_run_consumes_channel_in_order() {
        let sync = synchronizer();
        sync.install(snapshot()).await;
        let (tx, rx) = event_channel(16);
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(sync.clone().run(rx, stop_rx));

        tx.send(ChangeEvent::upsert(Entity::Selector(selector(11, &["a:80"])))).await.unwrap();
        tx.send(ChangeEvent::upsert(Entity::Selector(selector(9, &["stale:80"])))).await.unwrap();
        tx.send(ChangeEvent::upsert(Entity::Selector(selector(12, &["b:80"])))).await.unwrap();

        let mut last = Vec::new();
        for _ in 0..100 {
            last = sync.pool.upstreams("order").into_iter().map(|u| u.url).collect::<Vec<_>>();
            if last == vec!["b:80"] {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(last, vec!["b:80"]);

        stop_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}
