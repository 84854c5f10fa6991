use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use switchyard_core::{StatusNotification, Upstream};
use switchyard_upstream::UpstreamPool;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::prober::Prober;
use crate::publisher::StatusPublisher;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthConfig {
    pub enabled: bool,
    pub interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failures before a member is evicted.
    pub unhealthy_threshold: u32,
    pub max_concurrent_probes: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: Duration::from_secs(10),
            probe_timeout: Duration::from_secs(3),
            unhealthy_threshold: 1,
            max_concurrent_probes: 16,
        }
    }
}

/// Outcome of one probe cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub probed: usize,
    pub reachable: usize,
    pub evicted: usize,
    pub readmitted: usize,
    pub changed_keys: Vec<String>,
}

struct Target {
    key: String,
    upstream: Upstream,
    evicted: bool,
}

pub struct HealthChecker {
    pool: Arc<UpstreamPool>,
    prober: Arc<dyn Prober>,
    publisher: Arc<dyn StatusPublisher>,
    probe_timeout: Duration,
    threshold: u32,
    concurrency: usize,
    failures: DashMap<(String, String), u32>,
    enabled: watch::Sender<bool>,
    interval: watch::Sender<Duration>,
}

impl HealthChecker {
    pub fn new(
        pool: Arc<UpstreamPool>,
        prober: Arc<dyn Prober>,
        publisher: Arc<dyn StatusPublisher>,
        config: HealthConfig,
    ) -> Self {
        Self {
            pool,
            prober,
            publisher,
            probe_timeout: config.probe_timeout,
            threshold: config.unhealthy_threshold.max(1),
            concurrency: config.max_concurrent_probes.max(1),
            failures: DashMap::new(),
            enabled: watch::Sender::new(config.enabled),
            interval: watch::Sender::new(config.interval),
        }
    }

    pub fn pool(&self) -> &Arc<UpstreamPool> {
        &self.pool
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.borrow()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.send_replace(enabled);
        info!(enabled, "health check toggled");
    }

    pub fn interval(&self) -> Duration {
        *self.interval.borrow()
    }

    /// Takes effect on the running loop immediately. Zero is ignored.
    pub fn set_interval(&self, interval: Duration) {
        if interval.is_zero() {
            warn!("ignoring zero health check interval");
            return;
        }
        self.interval.send_replace(interval);
        info!(interval_ms = interval.as_millis() as u64, "health check interval changed");
    }

    /// Manual registration of an upstream under `key`.
    pub fn submit(&self, key: &str, upstream: Upstream) -> bool {
        self.pool.add(key, upstream)
    }

    pub fn remove_by_key(&self, key: &str) -> bool {
        self.failures.retain(|(k, _), _| k != key);
        self.pool.remove_key(key)
    }

    /// Runs one full probe cycle, whatever the enabled flag says.
    pub async fn check_once(&self) -> CycleReport {
        let snapshot = self.pool.snapshot();
        let live: BTreeSet<&str> = snapshot.iter().map(|(k, _)| k.as_str()).collect();
        self.failures.retain(|(k, _), _| live.contains(k.as_str()));

        let targets: Vec<Target> = snapshot
            .iter()
            .flat_map(|(key, snap)| {
                let members = snap.members().iter().map(move |u| (key, u, false));
                let evicted = snap.evicted().iter().map(move |u| (key, u, true));
                members.chain(evicted)
            })
            .map(|(key, upstream, evicted)| Target {
                key: key.clone(),
                upstream: upstream.clone(),
                evicted,
            })
            .collect();

        let probe_timeout = self.probe_timeout;
        let results: Vec<(Target, bool)> = stream::iter(targets)
            .map(|target| {
                let prober = self.prober.clone();
                async move {
                    let ok = match timeout(probe_timeout, prober.probe(&target.upstream)).await {
                        Ok(Ok(())) => true,
                        Ok(Err(e)) => {
                            debug!("{e}");
                            false
                        }
                        Err(_) => {
                            debug!(url = %target.upstream.url, "probe timed out");
                            false
                        }
                    };
                    (target, ok)
                }
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = CycleReport {
            probed: results.len(),
            ..Default::default()
        };
        let mut changed = BTreeSet::new();
        let now = Utc::now().timestamp_millis();

        for (target, ok) in results {
            let Target { key, upstream, evicted } = target;
            let url = upstream.url.as_str();
            self.pool.mark(&key, url, ok, now);

            if ok {
                report.reachable += 1;
                self.failures.remove(&(key.clone(), upstream.url.clone()));
                if evicted {
                    if self.pool.readmit(&key, url) {
                        info!(key = %key, url, "upstream re-admitted");
                        report.readmitted += 1;
                        changed.insert(key);
                    }
                } else if !upstream.status {
                    changed.insert(key);
                }
                continue;
            }

            if evicted {
                continue;
            }
            let count = {
                let mut slot = self.failures.entry((key.clone(), upstream.url.clone())).or_insert(0);
                *slot += 1;
                *slot
            };
            if count >= self.threshold {
                if self.pool.evict(&key, url) {
                    warn!(key = %key, url, failures = count, "upstream evicted");
                    report.evicted += 1;
                    changed.insert(key);
                }
            } else if upstream.status {
                changed.insert(key);
            }
        }

        for key in &changed {
            let note = StatusNotification::new(key.clone(), self.pool.upstreams(key));
            if let Err(e) = self.publisher.publish(&note).await {
                warn!(key = %key, "status publish failed: {e}");
            }
        }
        report.changed_keys = changed.into_iter().collect();
        debug!(
            probed = report.probed,
            reachable = report.reachable,
            evicted = report.evicted,
            readmitted = report.readmitted,
            "health check cycle done"
        );
        report
    }

    /// Scheduled loop. Sleeps `interval` between cycles, skips cycles while
    /// disabled and exits when `shutdown` flips to true or its sender drops.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut interval = self.interval.subscribe();
        info!(interval_ms = self.interval().as_millis() as u64, "health checker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            let period = *interval.borrow_and_update();
            tokio::select! {
                _ = sleep(period) => {
                    if self.is_enabled() {
                        let report = self.check_once().await;
                        if !report.changed_keys.is_empty() {
                            info!(keys = ?report.changed_keys, "upstream membership updated");
                        }
                    }
                }
                res = interval.changed() => {
                    if res.is_err() {
                        error!("health check interval channel closed");
                        break;
                    }
                }
                res = shutdown.changed() => {
                    if res.is_err() {
                        break;
                    }
                }
            }
        }
        info!("health checker stopped");
    }
}
