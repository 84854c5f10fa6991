use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::Mutex;
use switchyard_core::{LoadBalance, Upstream};
use switchyard_errors::{GatewayError, GatewayResult};
use tracing::{debug, info};

use crate::balance::select;
use crate::ring::HashRing;

/// Immutable view of one pool key.
#[derive(Debug, Clone, Default)]
pub struct PoolSnapshot {
    members: Vec<Upstream>,
    evicted: Vec<Upstream>,
    reachable: Vec<usize>,
    ring: HashRing,
}

impl PoolSnapshot {
    pub fn new(members: Vec<Upstream>, evicted: Vec<Upstream>) -> Self {
        let reachable: Vec<usize> = members
            .iter()
            .enumerate()
            .filter(|(_, u)| u.is_reachable())
            .map(|(i, _)| i)
            .collect();
        let ring = HashRing::build(reachable.iter().map(|&i| (i, &members[i])));
        Self {
            members,
            evicted,
            reachable,
            ring,
        }
    }

    pub fn members(&self) -> &[Upstream] {
        &self.members
    }

    /// Members taken out by health checking; still probed for re-admission.
    pub fn evicted(&self) -> &[Upstream] {
        &self.evicted
    }

    pub fn reachable_indexes(&self) -> &[usize] {
        &self.reachable
    }

    pub fn ring(&self) -> &HashRing {
        &self.ring
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[derive(Debug, Default)]
struct PoolEntry {
    current: ArcSwap<PoolSnapshot>,
    cursor: AtomicUsize,
    writer: Mutex<()>,
}

/// Upstream pools keyed by selector name.
///
/// Reads load a snapshot without locking. Each key has its own writer lock;
/// there is no lock shared across keys.
#[derive(Debug, Default)]
pub struct UpstreamPool {
    entries: DashMap<String, Arc<PoolEntry>>,
}

impl UpstreamPool {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Option<Arc<PoolEntry>> {
        self.entries.get(key).map(|e| e.value().clone())
    }

    /// Runs `f` against the key's current lists and swaps in the result.
    /// `f` returns whether anything changed.
    fn update<F>(&self, key: &str, create: bool, mut f: F) -> bool
    where
        F: FnMut(&mut Vec<Upstream>, &mut Vec<Upstream>) -> bool,
    {
        loop {
            let entry = if create {
                self.entries.entry(key.to_string()).or_default().value().clone()
            } else {
                match self.entry(key) {
                    Some(e) => e,
                    None => return false,
                }
            };
            let _guard = entry.writer.lock();
            // the key may have been removed (and recreated) while we waited
            let still_current = self
                .entries
                .get(key)
                .is_some_and(|e| Arc::ptr_eq(e.value(), &entry));
            if !still_current {
                continue;
            }

            let snap = entry.current.load();
            let mut members = snap.members.clone();
            let mut evicted = snap.evicted.clone();
            if !f(&mut members, &mut evicted) {
                return false;
            }
            entry.current.store(Arc::new(PoolSnapshot::new(members, evicted)));
            return true;
        }
    }

    /// Picks a reachable member. Never blocks.
    pub fn pick(&self, key: &str, strategy: LoadBalance, hash_key: Option<&str>) -> GatewayResult<Upstream> {
        let entry = self.entry(key).ok_or_else(|| GatewayError::no_upstream(key))?;
        let snap = entry.current.load();
        let picked = select(strategy, &snap, &entry.cursor, hash_key)
            .cloned()
            .ok_or_else(|| GatewayError::no_upstream(key))?;
        debug!(key, upstream = %picked.url, strategy = strategy.name(), "upstream picked");
        Ok(picked)
    }

    /// Adds `upstream` unless a member with the same url exists. An evicted
    /// member with that url is re-admitted. Returns whether the pool changed.
    pub fn add(&self, key: &str, upstream: Upstream) -> bool {
        let changed = self.update(key, true, |members, evicted| {
            if members.iter().any(|m| m.url == upstream.url) {
                return false;
            }
            evicted.retain(|m| m.url != upstream.url);
            members.push(upstream.clone());
            true
        });
        if changed {
            info!(key, url = %upstream.url, "upstream added");
        }
        changed
    }

    /// Atomic full swap; clears the evicted set of the key.
    pub fn replace(&self, key: &str, upstreams: Vec<Upstream>) {
        let mut deduped: Vec<Upstream> = Vec::with_capacity(upstreams.len());
        for u in upstreams {
            if !deduped.iter().any(|d| d.url == u.url) {
                deduped.push(u);
            }
        }
        let count = deduped.len();
        self.update(key, true, |members, evicted| {
            *members = deduped.clone();
            evicted.clear();
            true
        });
        info!(key, count, "upstreams replaced");
    }

    /// Removes members matching `predicate`; returns how many went.
    pub fn remove<P>(&self, key: &str, predicate: P) -> usize
    where
        P: Fn(&Upstream) -> bool,
    {
        let mut removed = 0;
        self.update(key, false, |members, _| {
            let before = members.len();
            members.retain(|m| !predicate(m));
            removed = before - members.len();
            removed > 0
        });
        removed
    }

    pub fn remove_key(&self, key: &str) -> bool {
        let removed = self.entries.remove(key).is_some();
        if removed {
            info!(key, "upstream pool removed");
        }
        removed
    }

    /// Moves the member with `url` into the evicted set.
    pub fn evict(&self, key: &str, url: &str) -> bool {
        self.update(key, false, |members, evicted| {
            let Some(pos) = members.iter().position(|m| m.url == url) else {
                return false;
            };
            let mut gone = members.remove(pos);
            gone.status = false;
            evicted.retain(|m| m.url != url);
            evicted.push(gone);
            true
        })
    }

    /// Moves an evicted member back into the pool as reachable.
    pub fn readmit(&self, key: &str, url: &str) -> bool {
        self.update(key, false, |members, evicted| {
            let Some(pos) = evicted.iter().position(|m| m.url == url) else {
                return false;
            };
            let mut back = evicted.remove(pos);
            back.status = true;
            if !members.iter().any(|m| m.url == url) {
                members.push(back);
            }
            true
        })
    }

    /// Records a probe result on a member or evicted entry.
    pub fn mark(&self, key: &str, url: &str, reachable: bool, checked_at: i64) -> bool {
        self.update(key, false, |members, evicted| {
            let mut found = false;
            for m in members.iter_mut().chain(evicted.iter_mut()).filter(|m| m.url == url) {
                m.last_checked_at = checked_at;
                m.status = reachable;
                found = true;
            }
            found
        })
    }

    pub fn upstreams(&self, key: &str) -> Vec<Upstream> {
        self.entry(key)
            .map(|e| e.current.load().members.clone())
            .unwrap_or_default()
    }

    pub fn evicted(&self, key: &str) -> Vec<Upstream> {
        self.entry(key)
            .map(|e| e.current.load().evicted.clone())
            .unwrap_or_default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<PoolSnapshot>> {
        self.entry(key).map(|e| e.current.load_full())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Every key with its current snapshot, ordered by key.
    pub fn snapshot(&self) -> Vec<(String, Arc<PoolSnapshot>)> {
        let mut all: Vec<_> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().current.load_full()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    fn up(url: &str) -> Upstream {
        Upstream::new(url, 50)
    }

    fn urls(list: &[Upstream]) -> Vec<&str> {
        list.iter().map(|u| u.url.as_str()).collect()
    }

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn test_pool_is_send_sync() {
        assert_send_sync::<UpstreamPool>();
        assert_send_sync::<PoolSnapshot>();
    }

    // ========== Phase 1: membership ==========

    #[test]
    fn test_add_is_idempotent_by_url() {
        let pool = UpstreamPool::new();
        assert!(pool.add("order", up("a:80")));
        assert!(!pool.add("order", up("a:80")));
        assert_eq!(pool.upstreams("order").len(), 1);
    }

    #[test]
    fn test_add_new_key_and_grow() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        assert_eq!(urls(&pool.upstreams("order")), vec!["a:80"]);
        pool.add("order", up("b:80"));
        assert_eq!(urls(&pool.upstreams("order")), vec!["a:80", "b:80"]);
        pool.add("billing", up("a:80"));
        assert_eq!(pool.keys(), vec!["billing", "order"]);
    }

    #[test]
    fn test_replace_after_add_leaves_only_new_list() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        pool.replace("order", vec![up("b:80")]);
        assert_eq!(urls(&pool.upstreams("order")), vec!["b:80"]);
    }

    #[test]
    fn test_replace_dedupes_and_clears_evicted() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        pool.evict("order", "a:80");
        pool.replace("order", vec![up("b:80"), up("b:80")]);
        assert_eq!(pool.upstreams("order").len(), 1);
        assert!(pool.evicted("order").is_empty());
    }

    #[test]
    fn test_remove_by_predicate() {
        let pool = UpstreamPool::new();
        pool.replace("order", vec![up("a:80"), up("b:80"), up("c:81")]);
        assert_eq!(pool.remove("order", |u| u.url.ends_with(":80")), 2);
        assert_eq!(urls(&pool.upstreams("order")), vec!["c:81"]);
        assert_eq!(pool.remove("missing", |_| true), 0);
    }

    #[test]
    fn test_remove_key_makes_lookups_empty() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        assert!(pool.remove_key("order"));
        assert!(pool.upstreams("order").is_empty());
        assert!(pool.get("order").is_none());
        assert!(matches!(
            pool.pick("order", LoadBalance::Random, None),
            Err(GatewayError::NoUpstreamAvailable { .. })
        ));
    }

    // ========== Phase 2: eviction ==========

    #[test]
    fn test_evict_and_readmit() {
        let pool = UpstreamPool::new();
        pool.replace("order", vec![up("a:80"), up("b:80")]);
        assert!(pool.evict("order", "a:80"));
        assert_eq!(urls(&pool.upstreams("order")), vec!["b:80"]);
        assert_eq!(urls(&pool.evicted("order")), vec!["a:80"]);
        assert!(!pool.evicted("order")[0].status);

        assert!(pool.readmit("order", "a:80"));
        assert!(pool.evicted("order").is_empty());
        let members = pool.upstreams("order");
        assert_eq!(members.len(), 2);
        assert!(members.iter().all(|m| m.status));
        assert!(!pool.readmit("order", "a:80"));
    }

    #[test]
    fn test_add_readmits_evicted_url() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        pool.evict("order", "a:80");
        assert!(pool.add("order", up("a:80")));
        assert!(pool.evicted("order").is_empty());
        assert_eq!(pool.upstreams("order").len(), 1);
    }

    #[test]
    fn test_mark_updates_status_and_check_time() {
        let pool = UpstreamPool::new();
        pool.add("order", up("a:80"));
        assert!(pool.mark("order", "a:80", false, 1234));
        let m = &pool.upstreams("order")[0];
        assert!(!m.status);
        assert_eq!(m.last_checked_at, 1234);
        assert!(pool.pick("order", LoadBalance::RoundRobin, None).is_err());
        assert!(!pool.mark("order", "zz:80", true, 1));
    }

    // ========== Phase 3: picking ==========

    #[test]
    fn test_empty_pool_is_no_upstream() {
        let pool = UpstreamPool::new();
        pool.replace("order", vec![]);
        let err = pool.pick("order", LoadBalance::RoundRobin, None).unwrap_err();
        assert_eq!(err, GatewayError::no_upstream("order"));
    }

    #[test]
    fn test_round_robin_cursor_survives_replace() {
        let pool = UpstreamPool::new();
        pool.replace("order", vec![up("a:80"), up("b:80")]);
        assert_eq!(pool.pick("order", LoadBalance::RoundRobin, None).unwrap().url, "a:80");
        pool.replace("order", vec![up("a:80"), up("b:80")]);
        assert_eq!(pool.pick("order", LoadBalance::RoundRobin, None).unwrap().url, "b:80");
    }

    #[test]
    fn test_concurrent_picks_during_replace_see_old_or_new() {
        let pool = Arc::new(UpstreamPool::new());
        let old = vec![up("a:80"), up("b:80"), up("c:80")];
        let new = vec![up("x:80")];
        pool.replace("order", old.clone());

        let allowed: HashSet<String> = old.iter().chain(new.iter()).map(|u| u.url.clone()).collect();
        thread::scope(|s| {
            for strategy in [LoadBalance::RoundRobin, LoadBalance::Random, LoadBalance::Hash] {
                let pool = pool.clone();
                let allowed = &allowed;
                s.spawn(move || {
                    for i in 0..2_000 {
                        let key = format!("client-{i}");
                        let picked = pool.pick("order", strategy, Some(&key)).unwrap();
                        assert!(allowed.contains(&picked.url));
                    }
                });
            }
            let writer = pool.clone();
            let (old, new) = (old.clone(), new.clone());
            s.spawn(move || {
                for i in 0..500 {
                    let list = if i % 2 == 0 { new.clone() } else { old.clone() };
                    writer.replace("order", list);
                }
            });
        });
    }

    #[test]
    fn test_concurrent_adds_keep_every_url() {
        let pool = Arc::new(UpstreamPool::new());
        thread::scope(|s| {
            for t in 0..4 {
                let pool = pool.clone();
                s.spawn(move || {
                    for i in 0..50 {
                        pool.add("order", up(&format!("10.0.{t}.{i}:80")));
                    }
                });
            }
        });
        assert_eq!(pool.upstreams("order").len(), 200);
    }
}
