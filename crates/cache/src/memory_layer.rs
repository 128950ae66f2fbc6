//! In-process cache layer.
//!
//! Entries live in a `HashMap` behind a `tokio::sync::RwLock`. Counters are
//! atomics so `stats()` never contends with lookups.

use async_trait::async_trait;
use chrono::Utc;
use claimcache_core::cache::{CacheEntry, CacheLayer, KeyPattern, LayerSettings, LayerStats};
use claimcache_core::error::CacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;
use tracing::debug;

use crate::eviction;

pub struct MemoryLayer {
    name: String,
    settings: LayerSettings,
    entries: RwLock<HashMap<String, CacheEntry>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl MemoryLayer {
    pub fn new(name: impl Into<String>, settings: LayerSettings) -> Self {
        Self {
            name: name.into(),
            settings,
            entries: RwLock::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl CacheLayer for MemoryLayer {
    fn name(&self) -> &str {
        &self.name
    }

    fn settings(&self) -> &LayerSettings {
        &self.settings
    }

    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let mut entries = self.entries.write().await;
        let now = Utc::now();

        let expired = match entries.get_mut(key) {
            Some(entry) if !entry.is_expired(now) => {
                entry.hits += 1;
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.clone()));
            }
            Some(_) => true,
            None => false,
        };

        if expired {
            entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        Ok(None)
    }

    async fn put(&self, mut entry: CacheEntry) -> Result<(), CacheError> {
        if entry.expires_at.is_none() && self.settings.default_ttl_secs.is_some() {
            entry = entry.with_ttl(self.settings.default_ttl_secs);
        }

        let mut entries = self.entries.write().await;
        let key = entry.key.clone();
        entries.insert(key.clone(), entry);

        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired(now));

        let victims = eviction::select_victims(entries.values(), &self.settings, &key);
        for victim in &victims {
            entries.remove(victim);
        }
        if !victims.is_empty() {
            self.evictions.fetch_add(victims.len() as u64, Ordering::Relaxed);
            debug!(layer = %self.name, evicted = victims.len(), "Cache eviction");
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn invalidate(&self, pattern: &KeyPattern) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|k, _| !pattern.matches(k));
        Ok(before - entries.len())
    }

    async fn entries(&self) -> Result<Vec<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.values().cloned().collect())
    }

    async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        let now = Utc::now();
        entries.retain(|_, e| !e.is_expired(now));
        Ok(before - entries.len())
    }

    async fn stats(&self) -> Result<LayerStats, CacheError> {
        let entries = self.entries.read().await;
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        Ok(LayerStats {
            layer: self.name.clone(),
            entry_count: entries.len(),
            size_bytes: entries.values().map(|e| e.size_bytes).sum(),
            hits,
            misses,
            evictions: self.evictions.load(Ordering::Relaxed),
            hit_rate: LayerStats::compute_hit_rate(hits, misses),
        })
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.write().await.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use claimcache_core::cache::EvictionPolicy;
    use serde_json::json;

    fn layer(max_entries: usize) -> MemoryLayer {
        MemoryLayer::new(
            "session",
            LayerSettings {
                default_ttl_secs: Some(60),
                max_entries,
                max_size_bytes: 0,
                eviction: EvictionPolicy::LowestQuality,
            },
        )
    }

    #[tokio::test]
    async fn put_get_counts_hits_and_misses() {
        let l = layer(10);
        l.put(CacheEntry::new("a", json!({"v": 1}))).await.unwrap();

        let hit = l.get("a").await.unwrap().unwrap();
        assert_eq!(hit.value["v"], 1);
        assert_eq!(hit.hits, 1);
        assert!(hit.expires_at.is_some(), "default TTL applied");
        assert!(l.get("b").await.unwrap().is_none());

        let stats = l.stats().await.unwrap();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate, 0.5);
        assert_eq!(stats.entry_count, 1);
    }

    #[tokio::test]
    async fn expired_entry_is_a_miss() {
        let l = layer(10);
        l.put(CacheEntry::new("a", json!(1)).with_ttl(Some(0)))
            .await
            .unwrap();
        assert!(l.get("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn evicts_lowest_quality_first() {
        let l = layer(2);
        l.put(CacheEntry::new("low", json!(1)).with_quality(0.1))
            .await
            .unwrap();
        l.put(CacheEntry::new("high", json!(1)).with_quality(0.9))
            .await
            .unwrap();
        l.put(CacheEntry::new("new", json!(1)).with_quality(0.5))
            .await
            .unwrap();

        assert!(l.get("low").await.unwrap().is_none());
        assert!(l.get("high").await.unwrap().is_some());
        assert!(l.get("new").await.unwrap().is_some());
        assert_eq!(l.stats().await.unwrap().evictions, 1);
    }

    #[tokio::test]
    async fn invalidate_by_pattern() {
        let l = layer(10);
        l.put(CacheEntry::new("tool:search:1", json!(1))).await.unwrap();
        l.put(CacheEntry::new("tool:search:2", json!(1))).await.unwrap();
        l.put(CacheEntry::new("tool:shop:1", json!(1))).await.unwrap();

        let removed = l
            .invalidate(&KeyPattern::new("tool:search:*").unwrap())
            .await
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(l.entries().await.unwrap().len(), 1);
    }
}
