use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_control_sync::{event_channel, StaticSource};
use switchyard_core::*;
use switchyard_gateway::{DataPlane, DataPlaneSettings, DecisionHandle};
use switchyard_health::{HealthConfig, LogPublisher, Prober};
use switchyard_reference::{HttpReferenceBuilder, RegistryConfig};

// ========== Fixtures ==========

#[derive(Default)]
struct ScriptedProber {
    down: Mutex<HashSet<String>>,
}

impl ScriptedProber {
    fn fail(&self, url: &str) {
        self.down.lock().insert(url.to_string());
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn probe(&self, upstream: &Upstream) -> GatewayResult<()> {
        if self.down.lock().contains(&upstream.url) {
            Err(GatewayError::probe(&upstream.url, "down"))
        } else {
            Ok(())
        }
    }
}

fn plane_with(continuation: ContinuationPolicy, prober: Arc<ScriptedProber>) -> DataPlane {
    let settings = DataPlaneSettings {
        continuation,
        health: HealthConfig {
            enabled: true,
            ..HealthConfig::default()
        },
        ..DataPlaneSettings::default()
    };
    DataPlane::with_components(settings, prober, Arc::new(LogPublisher), Arc::new(HttpReferenceBuilder))
}

fn plane() -> DataPlane {
    plane_with(ContinuationPolicy::FirstMatch, Arc::new(ScriptedProber::default()))
}

fn uri_selector(id: &str, name: &str, sort: i32, pattern: &str, handle: Option<&str>) -> Selector {
    let mut s = Selector::new(id, "p-divide", name);
    s.sort = sort;
    s.handle = handle.map(str::to_string);
    s.conditions = vec![Condition::new("uri", "match", "/", pattern).owned_by(OwnerType::Selector, id)];
    s
}

fn uri_rule(id: &str, selector_id: &str, pattern: &str, handle: &str) -> Rule {
    let mut r = Rule::new(id, selector_id, format!("rule-{id}"));
    r.handle = Some(handle.to_string());
    r.conditions = vec![Condition::new("uri", "match", "/", pattern).owned_by(OwnerType::Rule, id)];
    r
}

fn snapshot() -> ConfigSnapshot {
    ConfigSnapshot {
        plugins: vec![Plugin::new("p-divide", DIVIDE_PLUGIN)],
        selectors: vec![uri_selector(
            "s-1",
            "/http",
            1,
            "/http/test/**",
            Some(r#"[{"upstreamUrl":"10.0.0.1:8080"},{"upstreamUrl":"10.0.0.2:8080"}]"#),
        )],
        rules: vec![uri_rule(
            "r-1",
            "s-1",
            "/http/test/**",
            r#"{"loadBalance":"random","retry":0,"timeout":3000}"#,
        )],
        metadata: vec![],
    }
}

fn get(path: &str) -> RequestContext {
    RequestContext::new("GET", path).with_client_ip(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 7)))
}

// ========== Phase 1: routing ==========

#[tokio::test]
async fn test_glob_selector_and_divide_rule_route_to_pool_member() {
    let plane = plane();
    plane.install(snapshot()).await;

    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert_eq!(decision.selector_id(), "s-1");
    assert_eq!(decision.rule_id(), Some("r-1"));
    assert_eq!(
        decision.handle,
        DecisionHandle::Rule(RuleHandle::Divide(DivideRuleHandle {
            load_balance: LoadBalance::Random,
            retry: 0,
            timeout_ms: 3000,
        }))
    );
    let upstream = decision.upstream.expect("divide selector picks an upstream");
    assert!(["10.0.0.1:8080", "10.0.0.2:8080"].contains(&upstream.url.as_str()));
    assert!(decision.additional.is_empty());
}

#[tokio::test]
async fn test_unmatched_path_is_no_route() {
    let plane = plane();
    plane.install(snapshot()).await;

    let err = plane.route(DIVIDE_PLUGIN, &get("/other/abc"), None).unwrap_err();
    assert!(matches!(err, GatewayError::NoRouteMatch { .. }));
    assert_eq!(err.status_code(), 404);
}

#[tokio::test]
async fn test_unknown_plugin_is_no_route() {
    let plane = plane();
    plane.install(snapshot()).await;

    assert!(plane.route("rewrite", &get("/http/test/abc"), None).is_err());
}

#[tokio::test]
async fn test_selector_handle_used_when_no_rule_matches() {
    let plane = plane();
    let mut config = snapshot();
    config.rules[0] = uri_rule("r-1", "s-1", "/http/test/only/**", r#"{"loadBalance":"hash"}"#);
    plane.install(config).await;

    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert!(decision.rule.is_none());
    assert!(matches!(decision.handle, DecisionHandle::Selector(SelectorHandle::Upstreams(ref list)) if list.len() == 2));
    assert!(decision.upstream.is_some());
}

#[tokio::test]
async fn test_hash_rule_is_sticky_per_key() {
    let plane = plane();
    let mut config = snapshot();
    config.rules[0].handle = Some(r#"{"loadBalance":"hash"}"#.into());
    plane.install(config).await;

    let ctx = get("/http/test/abc");
    let first = plane.route(DIVIDE_PLUGIN, &ctx, Some("user-42")).unwrap().upstream.unwrap();
    for _ in 0..20 {
        let again = plane.route(DIVIDE_PLUGIN, &ctx, Some("user-42")).unwrap().upstream.unwrap();
        assert_eq!(again.url, first.url);
    }
}

#[tokio::test]
async fn test_round_robin_rule_alternates() {
    let plane = plane();
    let mut config = snapshot();
    config.rules[0].handle = Some(r#"{"loadBalance":"roundRobin"}"#.into());
    plane.install(config).await;

    let ctx = get("/http/test/abc");
    let a = plane.route(DIVIDE_PLUGIN, &ctx, None).unwrap().upstream.unwrap();
    let b = plane.route(DIVIDE_PLUGIN, &ctx, None).unwrap().upstream.unwrap();
    assert_ne!(a.url, b.url);
}

// ========== Phase 2: continuation ==========

fn chained_snapshot() -> ConfigSnapshot {
    let mut head = uri_selector("s-0", "/head", 0, "/http/**", None);
    head.continued = true;
    let mut config = snapshot();
    config.selectors.insert(0, head);
    config
}

#[tokio::test]
async fn test_first_match_reports_continued_chain() {
    let plane = plane();
    let mut config = chained_snapshot();
    config.selectors[0].handle = Some(r#"[{"upstreamUrl":"10.0.0.9:8080"}]"#.into());
    plane.install(config).await;

    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert_eq!(decision.selector_id(), "s-0");
    assert_eq!(decision.upstream.unwrap().url, "10.0.0.9:8080");
    let additional: Vec<_> = decision.additional.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(additional, vec!["s-1"]);
}

#[tokio::test]
async fn test_first_match_stops_at_selector_without_handle() {
    let plane = plane();
    plane.install(chained_snapshot()).await;

    let err = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap_err();
    assert!(matches!(err, GatewayError::NoRouteMatch { .. }));
}

#[tokio::test]
async fn test_accumulate_walks_on_to_next_selector() {
    let plane = plane_with(ContinuationPolicy::Accumulate, Arc::new(ScriptedProber::default()));
    plane.install(chained_snapshot()).await;

    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert_eq!(decision.selector_id(), "s-1");
    assert_eq!(decision.rule_id(), Some("r-1"));
    let additional: Vec<_> = decision.additional.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(additional, vec!["s-0"]);
}

// ========== Phase 3: health and admin ==========

#[tokio::test]
async fn test_all_members_failing_gives_no_upstream() {
    let prober = Arc::new(ScriptedProber::default());
    prober.fail("10.0.0.1:8080");
    prober.fail("10.0.0.2:8080");
    let plane = plane_with(ContinuationPolicy::FirstMatch, prober);
    plane.install(snapshot()).await;

    let report = plane.health().check_once().await;
    assert_eq!(report.evicted, 2);

    let err = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap_err();
    assert!(matches!(err, GatewayError::NoUpstreamAvailable { ref key } if key == "/http"));
}

#[tokio::test]
async fn test_failing_member_is_never_picked() {
    let prober = Arc::new(ScriptedProber::default());
    prober.fail("10.0.0.2:8080");
    let plane = plane_with(ContinuationPolicy::FirstMatch, prober);
    plane.install(snapshot()).await;
    plane.health().check_once().await;

    for _ in 0..20 {
        let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
        assert_eq!(decision.upstream.unwrap().url, "10.0.0.1:8080");
    }
}

#[tokio::test]
async fn test_admin_submit_and_remove_upstream() {
    let plane = plane();
    plane.install(snapshot()).await;

    assert!(plane.submit_upstream("/http", Upstream::new("10.0.0.3:8080", 50)));
    assert!(!plane.submit_upstream("/http", Upstream::new("10.0.0.3:8080", 50)));
    assert_eq!(plane.pool().upstreams("/http").len(), 3);

    assert!(plane.remove_upstream("/http", "10.0.0.3:8080"));
    assert!(!plane.remove_upstream("/http", "10.0.0.3:8080"));
    assert_eq!(plane.pool().upstreams("/http").len(), 2);

    plane.replace_upstreams("/http", vec![Upstream::new("10.0.0.7:8080", 50)]);
    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert_eq!(decision.upstream.unwrap().url, "10.0.0.7:8080");

    assert!(plane.remove_upstreams_by_key("/http"));
    assert!(plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).is_err());
}

#[tokio::test]
async fn test_health_toggles() {
    let plane = plane();
    assert!(plane.health().is_enabled());
    plane.set_health_check_enabled(false);
    assert!(!plane.health().is_enabled());
    plane.set_probe_interval(Duration::from_millis(250));
    assert_eq!(plane.health().interval(), Duration::from_millis(250));
}

// ========== Phase 4: configuration changes ==========

#[tokio::test]
async fn test_selector_event_replaces_pool_members() {
    let plane = plane();
    plane.install(snapshot()).await;

    let mut updated = snapshot().selectors.remove(0);
    updated.handle = Some(r#"[{"upstreamUrl":"10.0.0.5:8080"}]"#.into());
    updated.date_updated = 10;
    plane.apply(&ChangeEvent::upsert(Entity::Selector(updated))).await.unwrap();

    let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
    assert_eq!(decision.upstream.unwrap().url, "10.0.0.5:8080");
}

#[tokio::test]
async fn test_evicted_member_stays_out_across_config_churn() {
    let prober = Arc::new(ScriptedProber::default());
    prober.fail("10.0.0.2:8080");
    let plane = plane_with(ContinuationPolicy::FirstMatch, prober);
    plane.install(snapshot()).await;
    assert_eq!(plane.health().check_once().await.evicted, 1);

    plane.install(snapshot()).await;
    let added = Condition::new("header", "=", "x-env", "gray")
        .with_id("c-9")
        .owned_by(OwnerType::Rule, "r-1");
    plane.apply(&ChangeEvent::upsert(Entity::Condition(added))).await.unwrap();
    plane.apply(&ChangeEvent::upsert(Entity::Plugin(Plugin::new("p-divide", DIVIDE_PLUGIN)))).await.unwrap();

    for _ in 0..20 {
        let decision = plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).unwrap();
        assert_eq!(decision.upstream.unwrap().url, "10.0.0.1:8080");
    }
}

#[tokio::test]
async fn test_selector_delete_drops_route_and_pool() {
    let plane = plane();
    plane.install(snapshot()).await;

    let selector = snapshot().selectors.remove(0);
    plane.apply(&ChangeEvent::delete(Entity::Selector(selector))).await.unwrap();

    assert!(plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).is_err());
    assert!(!plane.pool().contains_key("/http"));
}

#[tokio::test]
async fn test_stale_event_is_rejected() {
    let plane = plane();
    let mut config = snapshot();
    config.selectors[0].date_updated = 100;
    plane.install(config).await;

    let mut stale = snapshot().selectors.remove(0);
    stale.date_updated = 50;
    stale.handle = Some("[]".into());
    let err = plane.apply(&ChangeEvent::upsert(Entity::Selector(stale))).await.unwrap_err();
    assert!(matches!(err, GatewayError::ConfigApplyConflict { .. }));
    assert_eq!(plane.pool().upstreams("/http").len(), 2);
}

#[tokio::test]
async fn test_bootstrap_from_static_source() {
    let plane = plane();
    plane.bootstrap(&StaticSource::new(snapshot())).await.unwrap();

    assert!(plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).is_ok());
}

#[tokio::test]
async fn test_background_tasks_consume_events_and_stop() {
    let plane = plane();
    let (tx, rx) = event_channel(8);
    let handles = plane.spawn_background(rx);

    tx.send(ChangeEvent::upsert(Entity::Plugin(Plugin::new("p-divide", DIVIDE_PLUGIN))))
        .await
        .unwrap();
    let selector = snapshot().selectors.remove(0);
    tx.send(ChangeEvent::upsert(Entity::Selector(selector))).await.unwrap();

    let mut routed = false;
    for _ in 0..50 {
        if plane.route(DIVIDE_PLUGIN, &get("/http/test/abc"), None).is_ok() {
            routed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(routed);

    plane.shutdown();
    for handle in handles {
        tokio::time::timeout(Duration::from_secs(2), handle).await.unwrap().unwrap();
    }
}

// ========== Phase 5: references ==========

#[tokio::test]
async fn test_reference_built_from_indexed_metadata() {
    let plane = plane();
    let mut meta = MetaData::new("/order/find", "order-service");
    meta.id = "m-1".into();
    meta.rpc_ext = Some(r#"{"url":"127.0.0.1:9000","loadbalance":"hash","retries":2}"#.into());
    let mut config = snapshot();
    config.metadata.push(meta);
    plane.install(config).await;

    let reference = plane.resolve_reference("/order/find").await.unwrap();
    assert_eq!(reference.target, "http://127.0.0.1:9000");
    assert_eq!(reference.load_balance, "consistenthash");
    assert_eq!(reference.retries, 2);
    assert!(!plane.references().get("/order/find").await.is_placeholder());

    plane.invalidate_reference("/order/find").await;
    assert!(plane.references().get("/order/find").await.is_placeholder());
}

#[tokio::test]
async fn test_unknown_path_resolves_to_placeholder() {
    let plane = plane();
    let reference = plane.resolve_reference("/nowhere").await.unwrap();
    assert!(reference.is_placeholder());
}

#[tokio::test]
async fn test_registry_address_used_without_url() {
    let plane = plane();
    plane.init_registry(RegistryConfig {
        address: "registry.local:8848".into(),
        ..RegistryConfig::default()
    });
    let mut config = snapshot();
    config.metadata.push(MetaData::new("/user/get", "user-service"));
    plane.install(config).await;

    let reference = plane.resolve_reference("/user/get").await.unwrap();
    assert_eq!(reference.target, "http://registry.local:8848");
}
