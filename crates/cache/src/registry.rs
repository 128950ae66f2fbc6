//! Cascading cache registry.
//!
//! Holds named layers in priority order (lower first). Registration and
//! reordering take the registry write lock; lookups clone the layer handles
//! under a read lock and do their I/O after releasing it, so a slow layer
//! never blocks unrelated ones.

use claimcache_config::{EngineConfig, LayerKind};
use claimcache_core::cache::{CacheEntry, CacheLayer, KeyPattern, LayerStats, PutOptions};
use claimcache_core::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::memory_layer::MemoryLayer;
use crate::sqlite_layer::SqliteLayer;

struct Registered {
    name: String,
    priority: i32,
    layer: Arc<dyn CacheLayer>,
}

/// Registry-wide statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegistryStats {
    /// Per-layer stats in cascade order.
    pub layers: Vec<LayerStats>,
    pub cascade_lookups: u64,
    pub cascade_hits: u64,
    pub cascade_hit_rate: f64,
    /// Which layer answered each cascade hit.
    pub hits_by_layer: BTreeMap<String, u64>,
}

pub struct CacheRegistry {
    layers: RwLock<Vec<Registered>>,
    cascade_lookups: AtomicU64,
    cascade_hits: AtomicU64,
    hits_by_layer: Mutex<HashMap<String, u64>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self {
            layers: RwLock::new(Vec::new()),
            cascade_lookups: AtomicU64::new(0),
            cascade_hits: AtomicU64::new(0),
            hits_by_layer: Mutex::new(HashMap::new()),
        }
    }

    /// Build a registry with every layer in `config.cache.layers`.
    pub async fn from_config(config: &EngineConfig) -> Result<Self, CacheError> {
        let registry = Self::new();
        for layer_config in &config.cache.layers {
            let settings = layer_config.settings();
            let layer: Arc<dyn CacheLayer> = match layer_config.kind {
                LayerKind::Memory => Arc::new(MemoryLayer::new(&layer_config.name, settings)),
                LayerKind::Sqlite => {
                    let path = config.layer_db_path(layer_config);
                    if let Some(parent) = path.parent() {
                        std::fs::create_dir_all(parent).map_err(|e| {
                            CacheError::Storage(format!("{}: {e}", parent.display()))
                        })?;
                    }
                    Arc::new(
                        SqliteLayer::new(&layer_config.name, settings, &path.to_string_lossy())
                            .await?,
                    )
                }
            };
            registry
                .register(&layer_config.name, layer, layer_config.priority)
                .await;
        }
        Ok(registry)
    }

    /// Add a layer, replacing any existing layer with the same name.
    pub async fn register(&self, name: &str, layer: Arc<dyn CacheLayer>, priority: i32) {
        let mut layers = self.layers.write().await;
        layers.retain(|r| r.name != name);
        layers.push(Registered {
            name: name.to_string(),
            priority,
            layer,
        });
        // Stable sort keeps registration order among equal priorities.
        layers.sort_by_key(|r| r.priority);
        info!(layer = name, priority, "Registered cache layer");
    }

    pub async fn set_priority(&self, name: &str, priority: i32) -> Result<(), CacheError> {
        let mut layers = self.layers.write().await;
        let entry = layers
            .iter_mut()
            .find(|r| r.name == name)
            .ok_or_else(|| CacheError::UnknownLayer(name.to_string()))?;
        entry.priority = priority;
        layers.sort_by_key(|r| r.priority);
        Ok(())
    }

    pub async fn unregister(&self, name: &str) -> Option<Arc<dyn CacheLayer>> {
        let mut layers = self.layers.write().await;
        let idx = layers.iter().position(|r| r.name == name)?;
        Some(layers.remove(idx).layer)
    }

    /// Layer names in cascade order.
    pub async fn layer_names(&self) -> Vec<String> {
        self.layers.read().await.iter().map(|r| r.name.clone()).collect()
    }

    pub async fn layer(&self, name: &str) -> Option<Arc<dyn CacheLayer>> {
        self.layers
            .read()
            .await
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.layer.clone())
    }

    async fn require(&self, name: &str) -> Result<Arc<dyn CacheLayer>, CacheError> {
        self.layer(name)
            .await
            .ok_or_else(|| CacheError::UnknownLayer(name.to_string()))
    }

    /// Resolve an explicit layer order, or the registry's own.
    async fn resolve(
        &self,
        order: Option<&[&str]>,
    ) -> Result<Vec<(String, Arc<dyn CacheLayer>)>, CacheError> {
        let layers = self.layers.read().await;
        let handle = |r: &Registered| (r.name.clone(), r.layer.clone());
        match order {
            None => Ok(layers.iter().map(handle).collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    layers
                        .iter()
                        .find(|r| r.name == *name)
                        .map(handle)
                        .ok_or_else(|| CacheError::UnknownLayer(name.to_string()))
                })
                .collect(),
        }
    }

    /// Lookup in one layer. Layer failures are logged and reported as a miss.
    pub async fn get(&self, layer: &str, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let handle = self.require(layer).await?;
        Ok(lookup(handle.as_ref(), key).await)
    }

    /// Try each layer in order and stop at the first hit.
    ///
    /// Returns the entry and the name of the layer that answered.
    pub async fn get_cascade(
        &self,
        key: &str,
        order: Option<&[&str]>,
    ) -> Result<Option<(CacheEntry, String)>, CacheError> {
        let layers = self.resolve(order).await?;
        self.cascade_lookups.fetch_add(1, Ordering::Relaxed);

        for (name, layer) in layers {
            if let Some(entry) = lookup(layer.as_ref(), key).await {
                self.cascade_hits.fetch_add(1, Ordering::Relaxed);
                if let Ok(mut by_layer) = self.hits_by_layer.lock() {
                    *by_layer.entry(name.clone()).or_insert(0) += 1;
                }
                debug!(key, layer = %name, "Cascade hit");
                return Ok(Some((entry, name)));
            }
        }
        Ok(None)
    }

    pub async fn put(
        &self,
        layer: &str,
        key: &str,
        value: serde_json::Value,
        options: PutOptions,
    ) -> Result<(), CacheError> {
        let handle = self.require(layer).await?;
        let mut entry = CacheEntry::new(key, value);
        if options.ttl_secs.is_some() {
            entry = entry.with_ttl(options.ttl_secs);
        }
        if let Some(quality) = options.quality {
            entry = entry.with_quality(quality);
        }
        if let Some(metadata) = options.metadata {
            entry = entry.with_metadata(metadata);
        }
        handle.put(entry).await
    }

    /// Remove matching keys from the given layers (all layers by default).
    pub async fn invalidate(&self, pattern: &str, layers: Option<&[&str]>) -> Result<usize, CacheError> {
        let pattern = KeyPattern::new(pattern)?;
        let mut removed = 0;
        for (name, layer) in self.resolve(layers).await? {
            match layer.invalidate(&pattern).await {
                Ok(n) => removed += n,
                Err(e) => warn!(layer = %name, "Invalidate failed: {e}"),
            }
        }
        info!(pattern = pattern.as_str(), removed, "Cache invalidated");
        Ok(removed)
    }

    /// Sweep expired entries from every layer.
    pub async fn cleanup_expired(&self) -> usize {
        let mut removed = 0;
        for (name, layer) in self.resolve(None).await.unwrap_or_default() {
            match layer.cleanup_expired().await {
                Ok(n) => removed += n,
                Err(e) => warn!(layer = %name, "Expiry sweep failed: {e}"),
            }
        }
        removed
    }

    pub async fn stats(&self) -> RegistryStats {
        let mut layer_stats = Vec::new();
        for (name, layer) in self.resolve(None).await.unwrap_or_default() {
            match layer.stats().await {
                Ok(stats) => layer_stats.push(LayerStats {
                    layer: name,
                    ..stats
                }),
                Err(e) => {
                    warn!(layer = %name, "Stats unavailable: {e}");
                    layer_stats.push(LayerStats {
                        layer: name,
                        ..Default::default()
                    });
                }
            }
        }

        let lookups = self.cascade_lookups.load(Ordering::Relaxed);
        let hits = self.cascade_hits.load(Ordering::Relaxed);
        let hits_by_layer = self
            .hits_by_layer
            .lock()
            .map(|m| m.iter().map(|(k, v)| (k.clone(), *v)).collect())
            .unwrap_or_default();

        RegistryStats {
            layers: layer_stats,
            cascade_lookups: lookups,
            cascade_hits: hits,
            cascade_hit_rate: LayerStats::compute_hit_rate(hits, lookups.saturating_sub(hits)),
            hits_by_layer,
        }
    }
}

impl Default for CacheRegistry {
    fn default() -> Self {
        Self::new()
    }
}

async fn lookup(layer: &dyn CacheLayer, key: &str) -> Option<CacheEntry> {
    match layer.get(key).await {
        Ok(entry) => entry,
        Err(e) => {
            warn!(layer = layer.name(), key, "Cache lookup failed, treating as miss: {e}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use claimcache_core::cache::LayerSettings;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn mem(name: &str) -> Arc<MemoryLayer> {
        Arc::new(MemoryLayer::new(name, LayerSettings::default()))
    }

    /// Counts lookups; always fails them.
    struct BrokenLayer {
        settings: LayerSettings,
        gets: AtomicUsize,
    }

    #[async_trait]
    impl CacheLayer for BrokenLayer {
        fn name(&self) -> &str {
            "broken"
        }
        fn settings(&self) -> &LayerSettings {
            &self.settings
        }
        async fn get(&self, _key: &str) -> Result<Option<CacheEntry>, CacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            Err(CacheError::Storage("disk on fire".into()))
        }
        async fn put(&self, _entry: CacheEntry) -> Result<(), CacheError> {
            Err(CacheError::Storage("disk on fire".into()))
        }
        async fn remove(&self, _key: &str) -> Result<bool, CacheError> {
            Ok(false)
        }
        async fn invalidate(&self, _pattern: &KeyPattern) -> Result<usize, CacheError> {
            Err(CacheError::Storage("disk on fire".into()))
        }
        async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
            Ok(vec![])
        }
        async fn cleanup_expired(&self) -> Result<usize, CacheError> {
            Ok(0)
        }
        async fn stats(&self) -> Result<LayerStats, CacheError> {
            Err(CacheError::Storage("disk on fire".into()))
        }
        async fn clear(&self) -> Result<(), CacheError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn cascade_stops_at_first_hit() {
        let registry = CacheRegistry::new();
        let l1 = mem("l1");
        let l2 = mem("l2");
        let l3 = mem("l3");
        registry.register("l1", l1.clone(), 0).await;
        registry.register("l2", l2.clone(), 10).await;
        registry.register("l3", l3.clone(), 20).await;

        registry.put("l2", "k", json!("from-l2"), PutOptions::default()).await.unwrap();
        registry.put("l3", "k", json!("from-l3"), PutOptions::default()).await.unwrap();

        let (entry, layer) = registry.get_cascade("k", None).await.unwrap().unwrap();
        assert_eq!(layer, "l2");
        assert_eq!(entry.value, json!("from-l2"));

        // l1 missed, l2 hit, l3 never consulted
        assert_eq!(l1.stats().await.unwrap().misses, 1);
        assert_eq!(l2.stats().await.unwrap().hits, 1);
        let l3_stats = l3.stats().await.unwrap();
        assert_eq!(l3_stats.hits + l3_stats.misses, 0);
    }

    #[tokio::test]
    async fn cascade_matches_direct_get_on_first_holder() {
        let registry = CacheRegistry::new();
        registry.register("a", mem("a"), 5).await;
        registry.register("b", mem("b"), 1).await;
        registry.put("a", "k", json!(1), PutOptions::default()).await.unwrap();

        let (cascaded, layer) = registry.get_cascade("k", None).await.unwrap().unwrap();
        let direct = registry.get(&layer, "k").await.unwrap().unwrap();
        assert_eq!(layer, "a");
        assert_eq!(cascaded.value, direct.value);
    }

    #[tokio::test]
    async fn priority_and_explicit_order() {
        let registry = CacheRegistry::new();
        registry.register("fast", mem("fast"), 0).await;
        registry.register("slow", mem("slow"), 10).await;
        assert_eq!(registry.layer_names().await, vec!["fast", "slow"]);

        registry.set_priority("slow", -1).await.unwrap();
        assert_eq!(registry.layer_names().await, vec!["slow", "fast"]);
        assert!(registry.set_priority("nope", 0).await.is_err());

        registry.put("fast", "k", json!("f"), PutOptions::default()).await.unwrap();
        registry.put("slow", "k", json!("s"), PutOptions::default()).await.unwrap();
        let (_, layer) = registry
            .get_cascade("k", Some(&["fast", "slow"][..]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(layer, "fast");
        assert!(registry.get_cascade("k", Some(&["missing"][..])).await.is_err());
    }

    #[tokio::test]
    async fn failing_layer_degrades_to_miss() {
        let registry = CacheRegistry::new();
        let broken = Arc::new(BrokenLayer {
            settings: LayerSettings::default(),
            gets: AtomicUsize::new(0),
        });
        registry.register("broken", broken.clone(), 0).await;
        registry.register("ok", mem("ok"), 1).await;
        registry.put("ok", "k", json!(true), PutOptions::default()).await.unwrap();

        let (_, layer) = registry.get_cascade("k", None).await.unwrap().unwrap();
        assert_eq!(layer, "ok");
        assert_eq!(broken.gets.load(Ordering::SeqCst), 1);

        let stats = registry.stats().await;
        assert_eq!(stats.layers.len(), 2);
        assert_eq!(stats.layers[0].layer, "broken");
    }

    #[tokio::test]
    async fn put_options_and_invalidate() {
        let registry = CacheRegistry::new();
        registry.register("l", mem("l"), 0).await;
        let mut metadata = serde_json::Map::new();
        metadata.insert("source".into(), json!("test"));
        registry
            .put(
                "l",
                "user:1",
                json!(1),
                PutOptions {
                    ttl_secs: Some(30),
                    metadata: Some(metadata),
                    quality: Some(0.9),
                },
            )
            .await
            .unwrap();
        registry.put("l", "user:2", json!(2), PutOptions::default()).await.unwrap();

        let entry = registry.get("l", "user:1").await.unwrap().unwrap();
        assert_eq!(entry.quality, 0.9);
        assert_eq!(entry.metadata["source"], "test");

        assert_eq!(registry.invalidate("user:[1]", None).await.unwrap(), 1);
        assert!(registry.get("l", "user:1").await.unwrap().is_none());
        assert!(registry.get("l", "user:2").await.unwrap().is_some());
        assert!(registry.get("unknown", "x").await.is_err());
    }

    #[tokio::test]
    async fn stats_track_cascade_hit_rate() {
        let registry = CacheRegistry::new();
        registry.register("l", mem("l"), 0).await;
        registry.put("l", "k", json!(1), PutOptions::default()).await.unwrap();
        registry.get_cascade("k", None).await.unwrap();
        registry.get_cascade("missing", None).await.unwrap();

        let stats = registry.stats().await;
        assert_eq!(stats.cascade_lookups, 2);
        assert_eq!(stats.cascade_hits, 1);
        assert_eq!(stats.cascade_hit_rate, 0.5);
        assert_eq!(stats.hits_by_layer.get("l"), Some(&1));
    }

    #[tokio::test]
    async fn unregister_removes_layer() {
        let registry = CacheRegistry::new();
        registry.register("l", mem("l"), 0).await;
        assert!(registry.unregister("l").await.is_some());
        assert!(registry.unregister("l").await.is_none());
        assert!(registry.layer_names().await.is_empty());
    }

    #[tokio::test]
    async fn from_config_builds_default_layers() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig {
            data_dir: Some(dir.path().to_string_lossy().into_owned()),
            ..Default::default()
        };
        let registry = CacheRegistry::from_config(&config).await.unwrap();
        assert_eq!(registry.layer_names().await, vec!["session", "shared", "durable"]);
        assert!(dir.path().join("cache-durable.sqlite").exists());
    }
}
