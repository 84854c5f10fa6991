//! Copy-on-write routing index.
//!
//! Readers load an immutable [`RoutingSnapshot`]; writers serialize on one
//! mutex, apply a change to a clone and swap it in. Effects that reach
//! outside the index (pools, references) are returned to the caller.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use switchyard_errors::{GatewayError, GatewayResult};
use tracing::{debug, info};

use crate::context::RequestContext;
use crate::events::{ChangeEvent, ConfigSnapshot, Entity, EntityType, Operation};
use crate::matching::{match_rule, match_selectors, sort_rules, sort_selectors, CompiledRule, CompiledSelector};
use crate::models::{Condition, MetaData, OwnerType, Plugin, Rule, Selector, Upstream};

/// Work the caller must carry out after a change has been indexed.
#[derive(Debug, Clone, PartialEq)]
pub enum SideEffect {
    ReplaceUpstreams { key: String, upstreams: Vec<Upstream> },
    RemovePool { key: String },
    InvalidateReference { path: String },
}

type VersionKey = (EntityType, String);

#[derive(Debug, Clone, Default)]
pub struct RoutingSnapshot {
    plugins: HashMap<String, Arc<Plugin>>,
    plugin_ids: HashMap<String, String>,
    selectors: HashMap<String, Arc<CompiledSelector>>,
    by_plugin: HashMap<String, Arc<[Arc<CompiledSelector>]>>,
    rules: HashMap<String, Arc<CompiledRule>>,
    by_selector: HashMap<String, Arc<[Arc<CompiledRule>]>>,
    metadata: HashMap<String, Arc<MetaData>>,
    metadata_paths: HashMap<String, String>,
    versions: HashMap<VersionKey, i64>,
}

impl RoutingSnapshot {
    // ---------- reads ----------

    pub fn plugin(&self, id: &str) -> Option<&Arc<Plugin>> {
        self.plugins.get(id)
    }

    pub fn plugin_by_name(&self, name: &str) -> Option<&Arc<Plugin>> {
        self.plugin_ids.get(name).and_then(|id| self.plugins.get(id))
    }

    pub fn plugins(&self) -> impl Iterator<Item = &Arc<Plugin>> {
        self.plugins.values()
    }

    pub fn selector(&self, id: &str) -> Option<&Arc<CompiledSelector>> {
        self.selectors.get(id)
    }

    pub fn selectors(&self) -> impl Iterator<Item = &Arc<CompiledSelector>> {
        self.selectors.values()
    }

    /// Selectors of a plugin in evaluation order.
    pub fn selectors_for_plugin(&self, plugin_name: &str) -> &[Arc<CompiledSelector>] {
        self.plugin_ids
            .get(plugin_name)
            .and_then(|id| self.by_plugin.get(id))
            .map(|list| &list[..])
            .unwrap_or(&[])
    }

    pub fn rule(&self, id: &str) -> Option<&Arc<CompiledRule>> {
        self.rules.get(id)
    }

    /// Rules of a selector in evaluation order.
    pub fn rules_for_selector(&self, selector_id: &str) -> &[Arc<CompiledRule>] {
        self.by_selector.get(selector_id).map(|list| &list[..]).unwrap_or(&[])
    }

    pub fn metadata(&self, path: &str) -> Option<&Arc<MetaData>> {
        self.metadata.get(path)
    }

    pub fn all_metadata(&self) -> impl Iterator<Item = &Arc<MetaData>> {
        self.metadata.values()
    }

    pub fn version_of(&self, entity_type: EntityType, id: &str) -> Option<i64> {
        self.versions.get(&(entity_type, id.to_string())).copied()
    }

    /// Matched selectors of an enabled plugin; an unknown or disabled plugin
    /// matches nothing.
    pub fn match_selectors(&self, plugin_name: &str, ctx: &RequestContext) -> Vec<&Arc<CompiledSelector>> {
        match self.plugin_by_name(plugin_name) {
            Some(plugin) if plugin.enabled => match_selectors(self.selectors_for_plugin(plugin_name), ctx),
            _ => Vec::new(),
        }
    }

    pub fn match_rule(&self, selector_id: &str, ctx: &RequestContext) -> Option<&Arc<CompiledRule>> {
        match_rule(self.rules_for_selector(selector_id), ctx)
    }

    // ---------- writes ----------

    fn version_key(&self, entity: &Entity) -> VersionKey {
        let id = match entity {
            Entity::MetaData(m) if !m.path.is_empty() => m.path.clone(),
            Entity::MetaData(m) => self.metadata_paths.get(&m.id).cloned().unwrap_or_else(|| m.id.clone()),
            // id-less conditions are told apart by owner and parameter
            Entity::Condition(c) if c.id.is_empty() => {
                format!("{}:{}:{}", c.owner_id, c.param_type, c.param_name)
            }
            other => other.id().to_string(),
        };
        (entity.entity_type(), id)
    }

    fn check_version(&self, entity: &Entity) -> GatewayResult<VersionKey> {
        let key = self.version_key(entity);
        let incoming = entity.version();
        if let Some(&current) = self.versions.get(&key) {
            if incoming != 0 && incoming < current {
                return Err(GatewayError::ConfigApplyConflict {
                    entity: key.0.as_str().to_string(),
                    id: key.1,
                    current,
                    incoming,
                });
            }
        }
        Ok(key)
    }

    fn record_version(&mut self, key: VersionKey, version: i64) {
        let slot = self.versions.entry(key).or_insert(version);
        *slot = (*slot).max(version);
    }

    pub(crate) fn apply(&mut self, event: &ChangeEvent) -> GatewayResult<Vec<SideEffect>> {
        let key = self.check_version(&event.entity)?;
        let delete = event.operation == Operation::Delete;
        let effects = match &event.entity {
            Entity::Plugin(p) if delete => self.delete_plugin(&p.id),
            Entity::Plugin(p) => self.upsert_plugin(p.clone()),
            Entity::Selector(s) if delete => self.delete_selector(&s.id),
            Entity::Selector(s) => self.upsert_selector(s.clone()),
            Entity::Rule(r) if delete => self.delete_rule(&r.id),
            Entity::Rule(r) => self.upsert_rule(r.clone()),
            Entity::Condition(c) => self.patch_condition(c, delete)?,
            Entity::MetaData(m) if delete => self.delete_metadata(m),
            Entity::MetaData(m) => self.upsert_metadata(m.clone()),
        };
        self.record_version(key, event.entity.version());
        Ok(effects)
    }

    fn plugin_name(&self, plugin_id: &str, fallback: &str) -> String {
        self.plugins
            .get(plugin_id)
            .map(|p| p.name.clone())
            .unwrap_or_else(|| fallback.to_string())
    }

    fn rebuild_plugin_list(&mut self, plugin_id: &str) {
        let mut list: Vec<_> = self
            .selectors
            .values()
            .filter(|s| s.selector.plugin_id == plugin_id)
            .cloned()
            .collect();
        if list.is_empty() {
            self.by_plugin.remove(plugin_id);
            return;
        }
        sort_selectors(&mut list);
        self.by_plugin.insert(plugin_id.to_string(), list.into());
    }

    fn rebuild_rule_list(&mut self, selector_id: &str) {
        let mut list: Vec<_> = self
            .rules
            .values()
            .filter(|r| r.rule.selector_id == selector_id)
            .cloned()
            .collect();
        if list.is_empty() {
            self.by_selector.remove(selector_id);
            return;
        }
        sort_rules(&mut list);
        self.by_selector.insert(selector_id.to_string(), list.into());
    }

    fn upsert_plugin(&mut self, plugin: Plugin) -> Vec<SideEffect> {
        if let Some(old) = self.plugins.get(&plugin.id) {
            if old.name != plugin.name && self.plugin_ids.get(&old.name) == Some(&plugin.id) {
                self.plugin_ids.remove(&old.name);
            }
        }
        let id = plugin.id.clone();
        self.plugin_ids.insert(plugin.name.clone(), id.clone());
        self.plugins.insert(id.clone(), Arc::new(plugin));

        // handles are parsed per plugin name, so everything below is recompiled
        let owned: Vec<Selector> = self
            .selectors
            .values()
            .filter(|s| s.selector.plugin_id == id)
            .map(|s| (*s.selector).clone())
            .collect();
        let mut effects = Vec::new();
        for selector in owned {
            effects.extend(self.upsert_selector(selector));
        }
        effects
    }

    fn delete_plugin(&mut self, id: &str) -> Vec<SideEffect> {
        if let Some(old) = self.plugins.remove(id) {
            if self.plugin_ids.get(&old.name).map(String::as_str) == Some(id) {
                self.plugin_ids.remove(&old.name);
            }
        }
        let owned: Vec<String> = self
            .selectors
            .values()
            .filter(|s| s.selector.plugin_id == id)
            .map(|s| s.selector.id.clone())
            .collect();
        owned.iter().flat_map(|sid| self.delete_selector(sid)).collect()
    }

    fn upsert_selector(&mut self, selector: Selector) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        let plugin_name = self.plugin_name(&selector.plugin_id, &selector.plugin_name);
        let previous = self.selectors.get(&selector.id).cloned();
        if let Some(old) = &previous {
            if old.name() != selector.name && self.pool_key_free(old.name(), &selector.id) {
                effects.push(SideEffect::RemovePool {
                    key: old.name().to_string(),
                });
            }
        }

        let compiled = Arc::new(CompiledSelector::compile(selector, &plugin_name));
        // the pool is only touched when its configured members change, so
        // health evictions survive re-applied selectors
        let same_pool = previous.as_ref().filter(|old| old.name() == compiled.name());
        match (compiled.handle.upstreams(), same_pool.and_then(|old| old.handle.upstreams())) {
            (Some(list), Some(old)) if list == old => {}
            (Some(list), _) => effects.push(SideEffect::ReplaceUpstreams {
                key: compiled.name().to_string(),
                upstreams: list.to_vec(),
            }),
            (None, Some(_)) if self.pool_key_free(compiled.name(), compiled.id()) => {
                effects.push(SideEffect::RemovePool {
                    key: compiled.name().to_string(),
                });
            }
            (None, _) => {}
        }
        let id = compiled.id().to_string();
        let plugin_id = compiled.selector.plugin_id.clone();
        self.selectors.insert(id.clone(), compiled);

        if let Some(old) = previous {
            if old.selector.plugin_id != plugin_id {
                self.rebuild_plugin_list(&old.selector.plugin_id);
            }
        }
        self.rebuild_plugin_list(&plugin_id);
        self.recompile_rules(&id, &plugin_name);
        effects
    }

    // Another selector may already own the same pool key.
    fn pool_key_free(&self, key: &str, except: &str) -> bool {
        !self.selectors.values().any(|s| s.id() != except && s.name() == key)
    }

    fn recompile_rules(&mut self, selector_id: &str, plugin_name: &str) {
        let stale: Vec<Rule> = self
            .rules
            .values()
            .filter(|r| r.rule.selector_id == selector_id)
            .map(|r| (*r.rule).clone())
            .collect();
        for rule in stale {
            self.rules
                .insert(rule.id.clone(), Arc::new(CompiledRule::compile(rule, plugin_name)));
        }
        self.rebuild_rule_list(selector_id);
    }

    fn delete_selector(&mut self, id: &str) -> Vec<SideEffect> {
        let Some(old) = self.selectors.remove(id) else {
            return Vec::new();
        };
        self.rules.retain(|_, r| r.rule.selector_id != id);
        self.by_selector.remove(id);
        self.rebuild_plugin_list(&old.selector.plugin_id);
        if self.pool_key_free(old.name(), id) {
            vec![SideEffect::RemovePool {
                key: old.name().to_string(),
            }]
        } else {
            Vec::new()
        }
    }

    fn upsert_rule(&mut self, rule: Rule) -> Vec<SideEffect> {
        let plugin_name = self
            .selectors
            .get(&rule.selector_id)
            .map(|s| s.plugin_name.clone())
            .unwrap_or_default();
        let previous = self.rules.get(&rule.id).map(|r| r.rule.selector_id.clone());
        let selector_id = rule.selector_id.clone();
        self.rules
            .insert(rule.id.clone(), Arc::new(CompiledRule::compile(rule, &plugin_name)));
        if let Some(old_selector) = previous.filter(|old| *old != selector_id) {
            self.rebuild_rule_list(&old_selector);
        }
        self.rebuild_rule_list(&selector_id);
        Vec::new()
    }

    fn delete_rule(&mut self, id: &str) -> Vec<SideEffect> {
        if let Some(old) = self.rules.remove(id) {
            self.rebuild_rule_list(&old.rule.selector_id);
        }
        Vec::new()
    }

    fn patch_condition(&mut self, condition: &Condition, delete: bool) -> GatewayResult<Vec<SideEffect>> {
        fn patch(list: &mut Vec<Condition>, condition: &Condition, delete: bool) {
            let pos = list.iter().position(|c| {
                if condition.id.is_empty() { c == condition } else { c.id == condition.id }
            });
            match (pos, delete) {
                (Some(i), true) => {
                    list.remove(i);
                }
                (Some(i), false) => list[i] = condition.clone(),
                (None, false) => list.push(condition.clone()),
                (None, true) => {}
            }
        }

        let unknown_owner = || {
            GatewayError::InvalidEvent(format!(
                "condition `{}` refers to unknown {:?} `{}`",
                condition.id, condition.owner_type, condition.owner_id
            ))
        };
        match condition.owner_type {
            OwnerType::Selector => {
                let owner = self.selectors.get(&condition.owner_id).ok_or_else(unknown_owner)?;
                let mut selector = (*owner.selector).clone();
                patch(&mut selector.conditions, condition, delete);
                Ok(self.upsert_selector(selector))
            }
            OwnerType::Rule => {
                let owner = self.rules.get(&condition.owner_id).ok_or_else(unknown_owner)?;
                let mut rule = (*owner.rule).clone();
                patch(&mut rule.conditions, condition, delete);
                Ok(self.upsert_rule(rule))
            }
        }
    }

    fn upsert_metadata(&mut self, meta: MetaData) -> Vec<SideEffect> {
        let mut effects = Vec::new();
        if !meta.id.is_empty() {
            if let Some(old_path) = self.metadata_paths.get(&meta.id).cloned() {
                if old_path != meta.path {
                    self.metadata.remove(&old_path);
                    effects.push(SideEffect::InvalidateReference { path: old_path });
                }
            }
            self.metadata_paths.insert(meta.id.clone(), meta.path.clone());
        }
        effects.push(SideEffect::InvalidateReference { path: meta.path.clone() });
        self.metadata.insert(meta.path.clone(), Arc::new(meta));
        effects
    }

    fn delete_metadata(&mut self, meta: &MetaData) -> Vec<SideEffect> {
        let path = if meta.path.is_empty() {
            self.metadata_paths.get(&meta.id).cloned().unwrap_or_default()
        } else {
            meta.path.clone()
        };
        if let Some(old) = self.metadata.remove(&path) {
            self.metadata_paths.remove(&old.id);
        }
        vec![SideEffect::InvalidateReference { path }]
    }

    /// The pulled entity, unless this index already holds a newer version
    /// of it. Then the indexed entity wins, or nothing when the newer
    /// version is a deletion.
    fn newer_of<T>(&self, key: &VersionKey, pulled: T, pulled_version: i64, indexed: Option<T>) -> Option<T> {
        match self.versions.get(key) {
            Some(&current) if pulled_version != 0 && pulled_version < current => {
                debug!(entity = key.0.as_str(), id = %key.1, current, pulled_version, "pulled entity is older than indexed");
                indexed
            }
            _ => Some(pulled),
        }
    }

    /// Next index for a full pull, reconciled against `self`: versions and
    /// tombstones carry over and newer indexed entities are kept.
    fn reconcile(&self, config: ConfigSnapshot) -> (Self, Vec<SideEffect>) {
        let mut next = RoutingSnapshot {
            versions: self.versions.clone(),
            ..Default::default()
        };
        let mut effects = Vec::new();

        for pulled in config.plugins {
            let key = (EntityType::Plugin, pulled.id.clone());
            let version = pulled.date_updated;
            let indexed = self.plugins.get(&pulled.id).map(|p| (**p).clone());
            let Some(plugin) = self.newer_of(&key, pulled, version, indexed) else { continue };
            next.record_version(key, plugin.date_updated);
            next.plugin_ids.insert(plugin.name.clone(), plugin.id.clone());
            next.plugins.insert(plugin.id.clone(), Arc::new(plugin));
        }
        for pulled in config.selectors {
            let key = (EntityType::Selector, pulled.id.clone());
            let version = pulled.date_updated;
            let indexed = self.selectors.get(&pulled.id).map(|s| (*s.selector).clone());
            let Some(selector) = self.newer_of(&key, pulled, version, indexed) else { continue };
            next.record_version(key, selector.date_updated);
            let plugin_name = next.plugin_name(&selector.plugin_id, &selector.plugin_name);
            let compiled = CompiledSelector::compile(selector, &plugin_name);
            if let Some(list) = compiled.handle.upstreams() {
                let unchanged = self
                    .selectors
                    .get(compiled.id())
                    .filter(|old| old.name() == compiled.name())
                    .and_then(|old| old.handle.upstreams())
                    .is_some_and(|old| old == list);
                if !unchanged {
                    effects.push(SideEffect::ReplaceUpstreams {
                        key: compiled.name().to_string(),
                        upstreams: list.to_vec(),
                    });
                }
            }
            next.selectors.insert(compiled.id().to_string(), Arc::new(compiled));
        }
        for pulled in config.rules {
            let key = (EntityType::Rule, pulled.id.clone());
            let version = pulled.date_updated;
            let indexed = self.rules.get(&pulled.id).map(|r| (*r.rule).clone());
            let Some(rule) = self.newer_of(&key, pulled, version, indexed) else { continue };
            next.record_version(key, rule.date_updated);
            let plugin_name = next
                .selectors
                .get(&rule.selector_id)
                .map(|s| s.plugin_name.clone())
                .unwrap_or_default();
            next.rules
                .insert(rule.id.clone(), Arc::new(CompiledRule::compile(rule, &plugin_name)));
        }
        for pulled in config.metadata {
            let key = next.version_key(&Entity::MetaData(pulled.clone()));
            let version = pulled.date_updated;
            let indexed = self.metadata.get(&pulled.path).map(|m| (**m).clone());
            let Some(meta) = self.newer_of(&key, pulled, version, indexed) else { continue };
            next.record_version(key, meta.date_updated);
            if !meta.id.is_empty() {
                next.metadata_paths.insert(meta.id.clone(), meta.path.clone());
            }
            next.metadata.insert(meta.path.clone(), Arc::new(meta));
        }

        let plugin_ids: HashSet<String> = next.selectors.values().map(|s| s.selector.plugin_id.clone()).collect();
        for id in plugin_ids {
            next.rebuild_plugin_list(&id);
        }
        let selector_ids: HashSet<String> = next.rules.values().map(|r| r.rule.selector_id.clone()).collect();
        for id in selector_ids {
            next.rebuild_rule_list(&id);
        }

        // only references whose metadata changed or vanished are rebuilt
        let mut stale_paths: Vec<&String> = self
            .metadata
            .keys()
            .chain(next.metadata.keys())
            .filter(|path| match (self.metadata.get(*path), next.metadata.get(*path)) {
                (Some(old), Some(new)) => old != new,
                _ => true,
            })
            .collect();
        stale_paths.sort();
        stale_paths.dedup();
        effects.extend(
            stale_paths
                .into_iter()
                .map(|path| SideEffect::InvalidateReference { path: path.clone() }),
        );
        (next, effects)
    }
}

/// Shared handle on the current routing snapshot.
#[derive(Debug, Default)]
pub struct RoutingTable {
    current: ArcSwap<RoutingSnapshot>,
    writer: Mutex<()>,
}

impl RoutingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock-free read of the current snapshot.
    pub fn load(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Applies one change event as a single atomic swap.
    pub fn apply(&self, event: &ChangeEvent) -> GatewayResult<Vec<SideEffect>> {
        let _guard = self.writer.lock();
        let mut next = RoutingSnapshot::clone(&self.current.load());
        let effects = next.apply(event)?;
        self.current.store(Arc::new(next));
        debug!(
            entity = event.entity.entity_type().as_str(),
            id = %event.entity.id(),
            op = ?event.operation,
            "change applied"
        );
        Ok(effects)
    }

    /// Replaces the whole index with a full pull. Entities the index holds
    /// at a newer version survive; pools of selectors that disappeared are
    /// reported for removal.
    pub fn install(&self, config: ConfigSnapshot) -> Vec<SideEffect> {
        let _guard = self.writer.lock();
        let previous = self.current.load();
        let (next, mut effects) = previous.reconcile(config);

        let kept: HashSet<&str> = next.selectors.values().map(|s| s.name()).collect();
        let mut dropped: Vec<String> = previous
            .selectors
            .values()
            .map(|s| s.name())
            .filter(|name| !kept.contains(name))
            .map(str::to_string)
            .collect();
        dropped.sort();
        dropped.dedup();
        effects.extend(dropped.into_iter().map(|key| SideEffect::RemovePool { key }));

        info!(
            plugins = next.plugins.len(),
            selectors = next.selectors.len(),
            rules = next.rules.len(),
            metadata = next.metadata.len(),
            "routing index installed"
        );
        self.current.store(Arc::new(next));
        effects
    }
}
