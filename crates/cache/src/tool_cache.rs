//! Cross-session tool output cache.
//!
//! Keys are `tool:{name}:{sha256 of canonical args}`. Lookups try the exact
//! key first; for allow-listed tools a miss falls back to the cached entry
//! whose original query embeds closest to the current one. The embedding
//! index lives in memory and is rebuilt from the backing layer on demand.

use chrono::{DateTime, Utc};
use claimcache_config::ToolCacheConfig;
use claimcache_core::cache::{CacheEntry, CacheLayer, KeyPattern};
use claimcache_core::embedding::Embedder;
use claimcache_core::error::CacheError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Argument fields that carry the natural-language query, in lookup order.
const QUERY_FIELDS: &[&str] = &["query", "q", "search", "keywords", "prompt"];

/// How a cached response was found.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CacheHit {
    Exact,
    Semantic { similarity: f32, matched_key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedToolOutput {
    pub response: Value,
    pub hit: CacheHit,
}

struct IndexedQuery {
    key: String,
    embedding: Vec<f32>,
    expires_at: Option<DateTime<Utc>>,
}

pub struct ToolOutputCache {
    layer: Arc<dyn CacheLayer>,
    embedder: Option<Arc<dyn Embedder>>,
    config: ToolCacheConfig,
    /// tool name → embedded queries of cached entries
    index: RwLock<HashMap<String, Vec<IndexedQuery>>>,
}

impl ToolOutputCache {
    pub fn new(
        layer: Arc<dyn CacheLayer>,
        embedder: Option<Arc<dyn Embedder>>,
        config: ToolCacheConfig,
    ) -> Self {
        Self {
            layer,
            embedder,
            config,
            index: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ToolCacheConfig {
        &self.config
    }

    /// Look up a cached response for `tool` called with `args`.
    pub async fn get(&self, tool: &str, args: &Value) -> Option<CachedToolOutput> {
        if self.config.ttl_for(tool) <= 0 {
            return None;
        }

        let key = cache_key(tool, args);
        if let Some(entry) = self.layer_get(&key).await {
            debug!(tool, "Tool cache exact hit");
            return Some(CachedToolOutput {
                response: entry.value,
                hit: CacheHit::Exact,
            });
        }

        if !self.config.is_semantic(tool) {
            return None;
        }
        let embedding = self.embed(&query_text(args)).await?;

        let (matched_key, similarity) = {
            let index = self.index.read().await;
            let now = Utc::now();
            let live = index
                .get(tool)?
                .iter()
                .filter(|q| q.key != key && q.expires_at.is_none_or(|exp| exp > now))
                .map(|q| (q.embedding.as_slice(), q.key.as_str()));
            let (k, sim) = claimcache_memory::best_match(
                live,
                &embedding,
                self.config.similarity_threshold,
            )?;
            (k.to_string(), sim)
        };

        match self.layer_get(&matched_key).await {
            Some(entry) => {
                debug!(tool, similarity, "Tool cache semantic hit");
                Some(CachedToolOutput {
                    response: entry.value,
                    hit: CacheHit::Semantic {
                        similarity,
                        matched_key,
                    },
                })
            }
            None => {
                self.forget(tool, &matched_key).await;
                None
            }
        }
    }

    /// Cache a response. Returns `false` when caching is disabled for the tool.
    pub async fn set(&self, tool: &str, args: &Value, response: Value) -> Result<bool, CacheError> {
        let ttl = self.config.ttl_for(tool);
        if ttl <= 0 {
            return Ok(false);
        }

        let key = cache_key(tool, args);
        let query = query_text(args);
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool".into(), Value::String(tool.to_string()));
        metadata.insert("query".into(), Value::String(query.clone()));

        let entry = CacheEntry::new(&key, response)
            .with_ttl(Some(ttl))
            .with_metadata(metadata);
        let expires_at = entry.expires_at;
        self.layer.put(entry).await?;

        if self.config.is_semantic(tool) {
            if let Some(embedding) = self.embed(&query).await {
                let mut index = self.index.write().await;
                let queries = index.entry(tool.to_string()).or_default();
                queries.retain(|q| q.key != key);
                queries.push(IndexedQuery {
                    key,
                    embedding,
                    expires_at,
                });
            }
        }
        Ok(true)
    }

    /// Drop every cached response for one tool.
    pub async fn invalidate_tool(&self, tool: &str) -> Result<usize, CacheError> {
        let pattern = KeyPattern::new(&format!("tool:{}:*", escape_glob(tool)))?;
        let removed = self.layer.invalidate(&pattern).await?;
        self.index.write().await.remove(tool);
        Ok(removed)
    }

    /// Remove expired entries from the backing layer and rebuild the index.
    pub async fn cleanup_expired(&self) -> Result<usize, CacheError> {
        let removed = self.layer.cleanup_expired().await?;
        self.rebuild_index().await?;
        Ok(removed)
    }

    /// Re-embed the queries of every live, allow-listed entry in the layer.
    pub async fn rebuild_index(&self) -> Result<usize, CacheError> {
        let now = Utc::now();
        let mut rebuilt: HashMap<String, Vec<IndexedQuery>> = HashMap::new();
        let mut indexed = 0;

        for entry in self.layer.entries().await? {
            if entry.is_expired(now) || !entry.key.starts_with("tool:") {
                continue;
            }
            let (Some(tool), Some(query)) = (
                entry.metadata.get("tool").and_then(Value::as_str),
                entry.metadata.get("query").and_then(Value::as_str),
            ) else {
                continue;
            };
            if !self.config.is_semantic(tool) {
                continue;
            }
            let Some(embedding) = self.embed(query).await else {
                continue;
            };
            rebuilt.entry(tool.to_string()).or_default().push(IndexedQuery {
                key: entry.key.clone(),
                embedding,
                expires_at: entry.expires_at,
            });
            indexed += 1;
        }

        *self.index.write().await = rebuilt;
        debug!(indexed, "Tool cache index rebuilt");
        Ok(indexed)
    }

    async fn layer_get(&self, key: &str) -> Option<CacheEntry> {
        match self.layer.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, "Tool cache lookup failed, treating as miss: {e}");
                None
            }
        }
    }

    async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        match embedder.embed(text).await {
            Ok(v) => Some(v),
            Err(e) => {
                warn!(embedder = embedder.name(), "Embedding failed, exact lookups only: {e}");
                None
            }
        }
    }

    async fn forget(&self, tool: &str, key: &str) {
        if let Some(queries) = self.index.write().await.get_mut(tool) {
            queries.retain(|q| q.key != key);
        }
    }
}

/// Cache key for a tool call.
pub fn cache_key(tool: &str, args: &Value) -> String {
    let digest = Sha256::digest(canonical_json(&normalize_args(args)).as_bytes());
    format!("tool:{tool}:{digest:x}")
}

/// Drop nulls, sort arrays. Object keys are ordered by `canonical_json`.
pub fn normalize_args(args: &Value) -> Value {
    match args {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), normalize_args(v)))
                .collect(),
        ),
        Value::Array(items) => {
            let mut normalized: Vec<Value> = items
                .iter()
                .filter(|v| !v.is_null())
                .map(normalize_args)
                .collect();
            normalized.sort_by_cached_key(canonical_json);
            Value::Array(normalized)
        }
        other => other.clone(),
    }
}

/// JSON text with object keys in sorted order regardless of map backing.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", parts.join(","))
        }
        other => other.to_string(),
    }
}

/// The natural-language query in a tool's args, or the canonical args.
pub fn query_text(args: &Value) -> String {
    QUERY_FIELDS
        .iter()
        .find_map(|field| args.get(*field).and_then(Value::as_str))
        .map(|q| q.trim().to_string())
        .filter(|q| !q.is_empty())
        .unwrap_or_else(|| canonical_json(&normalize_args(args)))
}

fn escape_glob(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '*' | '?' | '[' | ']' => format!("[{c}]"),
            c => c.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_layer::MemoryLayer;
    use async_trait::async_trait;
    use claimcache_core::cache::LayerSettings;
    use claimcache_core::error::EmbeddingError;
    use claimcache_memory::HashEmbedder;
    use serde_json::json;

    struct DownEmbedder;

    #[async_trait]
    impl Embedder for DownEmbedder {
        fn name(&self) -> &str {
            "down"
        }
        fn dimensions(&self) -> usize {
            8
        }
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Err(EmbeddingError::Unavailable("offline".into()))
        }
    }

    fn cache_with(embedder: Option<Arc<dyn Embedder>>) -> ToolOutputCache {
        let layer = Arc::new(MemoryLayer::new("tools", LayerSettings::default()));
        ToolOutputCache::new(layer, embedder, ToolCacheConfig::default())
    }

    fn hash_cache() -> ToolOutputCache {
        cache_with(Some(Arc::new(HashEmbedder::new(256))))
    }

    #[test]
    fn key_ignores_order_and_nulls() {
        let a = json!({"q": "earbuds", "filters": ["b", "a"], "page": null});
        let b = json!({"filters": ["a", "b"], "q": "earbuds"});
        assert_eq!(cache_key("web_search", &a), cache_key("web_search", &b));
        assert_ne!(cache_key("web_search", &a), cache_key("news_search", &a));
        assert!(cache_key("web_search", &a).starts_with("tool:web_search:"));
    }

    #[test]
    fn nested_objects_normalize() {
        let a = json!({"opts": {"z": 1, "a": [3, 1, null]}});
        let b = json!({"opts": {"a": [1, 3], "z": 1}});
        assert_eq!(cache_key("t", &a), cache_key("t", &b));
    }

    #[test]
    fn query_text_prefers_query_fields() {
        assert_eq!(query_text(&json!({"query": " laptops "})), "laptops");
        assert_eq!(query_text(&json!({"keywords": "ssd"})), "ssd");
        assert_eq!(query_text(&json!({"path": "/a"})), r#"{"path":"/a"}"#);
    }

    #[tokio::test]
    async fn exact_hit() {
        let cache = hash_cache();
        let args = json!({"path": "/tmp/report.pdf"});
        assert!(cache.set("file_read", &args, json!("contents")).await.unwrap());

        let hit = cache.get("file_read", &args).await.unwrap();
        assert_eq!(hit.response, json!("contents"));
        assert_eq!(hit.hit, CacheHit::Exact);
    }

    #[tokio::test]
    async fn semantic_hit_for_allow_listed_tool() {
        let cache = hash_cache();
        cache
            .set(
                "commerce.search_offers",
                &json!({"query": "best wireless earbuds under $100"}),
                json!({"offers": [1]}),
            )
            .await
            .unwrap();

        let hit = cache
            .get(
                "commerce.search_offers",
                &json!({"query": "Best wireless earbuds under 100"}),
            )
            .await
            .unwrap();
        assert!(matches!(hit.hit, CacheHit::Semantic { similarity, .. } if similarity >= 0.85));
        assert_eq!(hit.response["offers"][0], 1);
    }

    #[tokio::test]
    async fn no_semantic_fallback_outside_allow_list() {
        let cache = hash_cache();
        cache
            .set("weather", &json!({"query": "weather in Paris today"}), json!("sunny"))
            .await
            .unwrap();
        assert!(cache
            .get("weather", &json!({"query": "Weather in Paris today!"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn dissimilar_query_misses() {
        let cache = hash_cache();
        cache
            .set("research.lookup", &json!({"query": "lithium battery recycling"}), json!(1))
            .await
            .unwrap();
        assert!(cache
            .get("research.lookup", &json!({"query": "medieval castle architecture"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn zero_ttl_disables_caching() {
        let mut config = ToolCacheConfig::default();
        config.ttl_secs.insert("calculator".into(), 0);
        let layer = Arc::new(MemoryLayer::new("tools", LayerSettings::default()));
        let cache = ToolOutputCache::new(layer, None, config);

        let args = json!({"expr": "1+1"});
        assert!(!cache.set("calculator", &args, json!(2)).await.unwrap());
        assert!(cache.get("calculator", &args).await.is_none());
    }

    #[tokio::test]
    async fn embedder_failure_degrades_to_exact() {
        let cache = cache_with(Some(Arc::new(DownEmbedder)));
        let args = json!({"query": "gaming laptop"});
        cache.set("commerce.search", &args, json!("x")).await.unwrap();

        assert_eq!(cache.get("commerce.search", &args).await.unwrap().hit, CacheHit::Exact);
        assert!(cache
            .get("commerce.search", &json!({"query": "gaming laptops"}))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn rebuild_index_restores_semantic_lookups() {
        let layer: Arc<dyn CacheLayer> =
            Arc::new(MemoryLayer::new("tools", LayerSettings::default()));
        let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));

        let first = ToolOutputCache::new(layer.clone(), Some(embedder.clone()), ToolCacheConfig::default());
        first
            .set("research.web", &json!({"q": "rust async runtimes"}), json!("r"))
            .await
            .unwrap();

        let second = ToolOutputCache::new(layer, Some(embedder), ToolCacheConfig::default());
        assert!(second
            .get("research.web", &json!({"q": "Rust async runtimes"}))
            .await
            .is_none());
        assert_eq!(second.rebuild_index().await.unwrap(), 1);
        assert!(second
            .get("research.web", &json!({"q": "Rust async runtimes"}))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn invalidate_tool_clears_entries_and_index() {
        let cache = hash_cache();
        let args = json!({"query": "usb c hub"});
        cache.set("commerce.search", &args, json!(1)).await.unwrap();
        cache.set("web_search", &args, json!(2)).await.unwrap();

        assert_eq!(cache.invalidate_tool("commerce.search").await.unwrap(), 1);
        assert!(cache.get("commerce.search", &args).await.is_none());
        assert!(cache.get("web_search", &args).await.is_some());
    }

    #[tokio::test]
    async fn invalidate_tool_with_glob_characters_in_name() {
        let cache = hash_cache();
        let args = json!({"path": "/a"});
        cache.set("reader[v2]", &args, json!(1)).await.unwrap();
        cache.set("reader2", &args, json!(2)).await.unwrap();
        cache.set("odd]*?", &args, json!(3)).await.unwrap();

        assert_eq!(cache.invalidate_tool("reader[v2]").await.unwrap(), 1);
        assert!(cache.get("reader2", &args).await.is_some());
        assert_eq!(cache.invalidate_tool("odd]*?").await.unwrap(), 1);
    }
}
