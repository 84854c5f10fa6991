use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use parking_lot::{Mutex, RwLock};
use switchyard_core::MetaData;
use switchyard_errors::{GatewayError, GatewayResult};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::builder::ReferenceBuilder;
use crate::reference::{RegistryConfig, RouteReference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceConfig {
    pub build_timeout: Duration,
    pub max_references: u64,
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            build_timeout: Duration::from_secs(5),
            max_references: 1000,
        }
    }
}

/// Registry generation and path generation a reference was built under.
type Stamp = (u64, u64);

#[derive(Clone)]
struct Built {
    stamp: Stamp,
    reference: Arc<RouteReference>,
}

/// Path to built reference. Concurrent builds of one path share a single
/// construction; failed builds are not cached.
///
/// Every entry carries the generations it was built under. An entry whose
/// build was still running when its path, or the whole cache, was
/// invalidated is never served.
pub struct ReferenceCache {
    cache: Cache<String, Built>,
    registry: RwLock<RegistryConfig>,
    generation: AtomicU64,
    path_generations: Mutex<HashMap<String, u64>>,
    builder: Arc<dyn ReferenceBuilder>,
    build_timeout: Duration,
}

impl ReferenceCache {
    pub fn new(builder: Arc<dyn ReferenceBuilder>, config: ReferenceConfig) -> Self {
        Self {
            cache: Cache::builder().max_capacity(config.max_references).build(),
            registry: RwLock::new(RegistryConfig::default()),
            generation: AtomicU64::new(0),
            path_generations: Mutex::new(HashMap::new()),
            builder,
            build_timeout: config.build_timeout,
        }
    }

    /// Installs the registry config used by later builds. A config different
    /// from the current one drops every cached reference.
    pub fn init(&self, registry: RegistryConfig) -> bool {
        let mut current = self.registry.write();
        if *current == registry {
            return false;
        }
        *current = registry;
        drop(current);
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
        info!("registry config changed, references invalidated");
        true
    }

    pub fn registry(&self) -> RegistryConfig {
        self.registry.read().clone()
    }

    fn stamp(&self, path: &str) -> Stamp {
        let generation = self.generation.load(Ordering::SeqCst);
        let path_generation = self.path_generations.lock().get(path).copied().unwrap_or(0);
        (generation, path_generation)
    }

    // The stamp is taken before the registry is read.
    async fn construct(&self, meta: &MetaData) -> GatewayResult<Built> {
        let stamp = self.stamp(&meta.path);
        let registry = self.registry();
        debug!(path = %meta.path, "building reference");
        match timeout(self.build_timeout, self.builder.build(meta, &registry)).await {
            Ok(Ok(reference)) => Ok(Built {
                stamp,
                reference: Arc::new(reference),
            }),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(GatewayError::build(&meta.path, "build timed out")),
        }
    }

    /// Builds and caches the reference for `meta.path`, or returns the cached one.
    pub async fn build(&self, meta: &MetaData) -> GatewayResult<Arc<RouteReference>> {
        let path = meta.path.clone();
        for _ in 0..2 {
            let built = self
                .cache
                .try_get_with(path.clone(), self.construct(meta))
                .await
                .map_err(|e: Arc<GatewayError>| {
                    warn!(path = %path, "reference build failed: {e}");
                    (*e).clone()
                })?;
            if built.stamp == self.stamp(&path) {
                return Ok(built.reference);
            }
            debug!(path = %path, "reference invalidated while building, rebuilding");
            self.cache.invalidate(&path).await;
        }
        // still racing invalidations: hand out an uncached build
        self.construct(meta)
            .await
            .map(|built| built.reference)
            .inspect_err(|e| warn!(path = %path, "reference build failed: {e}"))
    }

    /// Same as [`build`](Self::build); reads as "use the cache, build on a miss".
    pub async fn resolve(&self, meta: &MetaData) -> GatewayResult<Arc<RouteReference>> {
        self.build(meta).await
    }

    /// Cached reference or the placeholder. Never builds.
    pub async fn get(&self, path: &str) -> Arc<RouteReference> {
        match self.cache.get(path).await {
            Some(built) if built.stamp == self.stamp(path) => built.reference,
            _ => Arc::new(RouteReference::placeholder(path)),
        }
    }

    pub async fn invalidate(&self, path: &str) {
        *self.path_generations.lock().entry(path.to_string()).or_insert(0) += 1;
        self.cache.invalidate(path).await;
        debug!(path, "reference invalidated");
    }

    pub fn invalidate_all(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.cache.invalidate_all();
        info!("all references invalidated");
    }
}
