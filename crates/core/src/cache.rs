//! Cache layer trait: one named tier of the cascading cache.
//!
//! Each layer owns its entries and enforces its own TTL default and size
//! cap. Implementations: in-process (`MemoryLayer`) and durable
//! (`SqliteLayer`). A layer that cannot read an entry reports a miss.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex_lite::Regex;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::freshness;

/// A cached value with bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: serde_json::Value,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub hits: u64,
    /// Higher-quality entries survive eviction longer.
    #[serde(default = "default_quality")]
    pub quality: f64,
    pub size_bytes: u64,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_quality() -> f64 {
    0.5
}

impl CacheEntry {
    /// A non-expiring entry with default quality, sized by its JSON encoding.
    pub fn new(key: impl Into<String>, value: serde_json::Value) -> Self {
        let key = key.into();
        let size_bytes = (key.len() + value.to_string().len()) as u64;
        Self {
            key,
            value,
            created_at: Utc::now(),
            expires_at: None,
            hits: 0,
            quality: default_quality(),
            size_bytes,
            metadata: serde_json::Map::new(),
        }
    }

    /// Expire `ttl_secs` after creation. `None` keeps the entry indefinitely.
    pub fn with_ttl(mut self, ttl_secs: Option<i64>) -> Self {
        self.expires_at = ttl_secs.map(|ttl| freshness::expiry_timestamp(self.created_at, ttl));
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = quality;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|exp| exp <= now)
    }
}

/// Which entries a full layer gives up first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Lowest quality first, oldest first among equals.
    #[default]
    LowestQuality,
    /// Oldest first.
    Oldest,
    /// Fewest hits first, oldest first among equals.
    LeastHit,
}

impl EvictionPolicy {
    /// Order two entries so that the one to evict first sorts first.
    pub fn compare(&self, a: &CacheEntry, b: &CacheEntry) -> std::cmp::Ordering {
        let by_age = a.created_at.cmp(&b.created_at);
        match self {
            EvictionPolicy::LowestQuality => a
                .quality
                .partial_cmp(&b.quality)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(by_age),
            EvictionPolicy::Oldest => by_age,
            EvictionPolicy::LeastHit => a.hits.cmp(&b.hits).then(by_age),
        }
    }
}

/// Per-layer limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayerSettings {
    /// TTL applied when a put does not specify one. `None` = no expiry.
    pub default_ttl_secs: Option<i64>,
    /// Maximum number of entries (0 = unlimited).
    pub max_entries: usize,
    /// Maximum total entry size in bytes (0 = unlimited).
    pub max_size_bytes: u64,
    pub eviction: EvictionPolicy,
}

impl Default for LayerSettings {
    fn default() -> Self {
        Self {
            default_ttl_secs: Some(freshness::HOUR_SECS),
            max_entries: 1_000,
            max_size_bytes: 0,
            eviction: EvictionPolicy::default(),
        }
    }
}

impl LayerSettings {
    /// Whether a layer holding `entries` entries of `bytes` total is over budget.
    pub fn over_budget(&self, entries: usize, bytes: u64) -> bool {
        (self.max_entries > 0 && entries > self.max_entries)
            || (self.max_size_bytes > 0 && bytes > self.max_size_bytes)
    }
}

/// Statistics for one layer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LayerStats {
    pub layer: String,
    pub entry_count: usize,
    pub size_bytes: u64,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

impl LayerStats {
    pub fn compute_hit_rate(hits: u64, misses: u64) -> f64 {
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

/// Optional per-put overrides.
#[derive(Debug, Clone, Default)]
pub struct PutOptions {
    pub ttl_secs: Option<i64>,
    pub metadata: Option<serde_json::Map<String, serde_json::Value>>,
    pub quality: Option<f64>,
}

/// Glob-style key matcher: `*`, `?` and `[...]` (with `[!...]` negation).
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> std::result::Result<Self, CacheError> {
        let regex = Regex::new(&glob_to_regex(glob))
            .map_err(|e| CacheError::InvalidPattern(format!("{glob}: {e}")))?;
        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}

fn glob_to_regex(glob: &str) -> String {
    let chars: Vec<char> = glob.chars().collect();
    let mut out = String::from("^");
    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '*' => out.push_str(".*"),
            '?' => out.push('.'),
            '[' => {
                // A `]` right after `[` or `[!` is a member, not the terminator.
                let mut j = i + 1;
                let negate = chars.get(j) == Some(&'!');
                if negate {
                    j += 1;
                }
                let first = j;
                if chars.get(j) == Some(&']') {
                    j += 1;
                }
                match chars[j..].iter().position(|&c| c == ']') {
                    Some(rel) => {
                        let close = j + rel;
                        out.push('[');
                        if negate {
                            out.push('^');
                        }
                        for &m in &chars[first..close] {
                            if matches!(m, '\\' | '[' | ']' | '^') {
                                out.push('\\');
                            }
                            out.push(m);
                        }
                        out.push(']');
                        i = close;
                    }
                    None => out.push_str(&regex_lite::escape("[")),
                }
            }
            c => out.push_str(&regex_lite::escape(&c.to_string())),
        }
        i += 1;
    }
    out.push('$');
    out
}

/// The core CacheLayer trait.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// The layer name (e.g., "session", "shared", "durable").
    fn name(&self) -> &str;

    fn settings(&self) -> &LayerSettings;

    /// Look up a live entry, counting a hit or miss. Expired entries miss.
    async fn get(&self, key: &str) -> std::result::Result<Option<CacheEntry>, CacheError>;

    /// Store an entry, evicting per the layer's policy if over budget.
    async fn put(&self, entry: CacheEntry) -> std::result::Result<(), CacheError>;

    async fn remove(&self, key: &str) -> std::result::Result<bool, CacheError>;

    /// Remove every entry whose key matches. Returns the number removed.
    async fn invalidate(&self, pattern: &KeyPattern) -> std::result::Result<usize, CacheError>;

    /// All readable entries, expired ones included.
    async fn entries(&self) -> std::result::Result<Vec<CacheEntry>, CacheError>;

    /// Remove expired entries. Returns the number removed.
    async fn cleanup_expired(&self) -> std::result::Result<usize, CacheError>;

    async fn stats(&self) -> std::result::Result<LayerStats, CacheError>;

    async fn clear(&self) -> std::result::Result<(), CacheError>;
}
