//! Configuration loading, validation, and management for Claimcache.
//!
//! Loads configuration from `~/.claimcache/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use claimcache_core::bundle::ToolKind;
use claimcache_core::cache::{EvictionPolicy, LayerSettings};
use claimcache_core::freshness::{DAY_SECS, HOUR_SECS};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.claimcache/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Directory for databases. Defaults to `~/.claimcache`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,

    /// Claim store configuration
    #[serde(default)]
    pub claims: ClaimsConfig,

    /// Capsule compilation and working-memory limits
    #[serde(default)]
    pub capsule: CapsuleConfig,

    /// Cascading cache layers
    #[serde(default)]
    pub cache: CacheConfig,

    /// Cross-session tool output cache
    #[serde(default)]
    pub tool_cache: ToolCacheConfig,

    /// Embedding service used for semantic lookups
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimsConfig {
    /// "sqlite" or "memory"
    #[serde(default = "default_claims_backend")]
    pub backend: String,

    /// Database path; defaults to `<data_dir>/claims.sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    /// Archived claims older than this are purged by `sweep`.
    #[serde(default = "default_archive_retention_days")]
    pub archive_retention_days: u32,
}

fn default_claims_backend() -> String {
    "sqlite".into()
}
fn default_archive_retention_days() -> u32 {
    30
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            backend: default_claims_backend(),
            path: None,
            archive_retention_days: default_archive_retention_days(),
        }
    }
}

/// What the pruner does with claims that fall outside the cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PruneMode {
    #[default]
    Archive,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapsuleConfig {
    /// Claims selected per compile
    #[serde(default = "default_claim_limit")]
    pub capsule_claim_limit: usize,

    /// Active claims kept per session after pruning
    #[serde(default = "default_max_working_memory")]
    pub max_working_memory: usize,

    #[serde(default = "default_max_notes")]
    pub max_caveats: usize,

    #[serde(default = "default_max_notes")]
    pub max_open_questions: usize,

    #[serde(default = "default_max_artifacts")]
    pub max_artifacts: usize,

    /// Commerce quality below this triggers a refinement suggestion
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    /// Token budget for the compressed prior-context block
    #[serde(default = "default_context_budget_tokens")]
    pub context_budget_tokens: usize,

    #[serde(default)]
    pub prune_mode: PruneMode,

    /// Domains hidden from the working-memory snapshot
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excluded_domains: Vec<String>,
}

fn default_claim_limit() -> usize {
    10
}
fn default_max_working_memory() -> usize {
    15
}
fn default_max_notes() -> usize {
    5
}
fn default_max_artifacts() -> usize {
    3
}
fn default_quality_threshold() -> f64 {
    0.5
}
fn default_context_budget_tokens() -> usize {
    200
}

impl Default for CapsuleConfig {
    fn default() -> Self {
        Self {
            capsule_claim_limit: default_claim_limit(),
            max_working_memory: default_max_working_memory(),
            max_caveats: default_max_notes(),
            max_open_questions: default_max_notes(),
            max_artifacts: default_max_artifacts(),
            quality_threshold: default_quality_threshold(),
            context_budget_tokens: default_context_budget_tokens(),
            prune_mode: PruneMode::default(),
            excluded_domains: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayerKind {
    Memory,
    Sqlite,
}

/// One cache tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayerConfig {
    pub name: String,

    pub kind: LayerKind,

    /// Lower priority is consulted first in a cascade
    #[serde(default)]
    pub priority: i32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ttl_secs: Option<i64>,

    /// 0 = unlimited
    #[serde(default)]
    pub max_entries: usize,

    /// 0 = unlimited
    #[serde(default)]
    pub max_size_mb: f64,

    #[serde(default)]
    pub eviction: EvictionPolicy,

    /// Database path for sqlite layers; defaults to `<data_dir>/cache-<name>.sqlite`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl LayerConfig {
    pub fn settings(&self) -> LayerSettings {
        LayerSettings {
            default_ttl_secs: self.default_ttl_secs,
            max_entries: self.max_entries,
            max_size_bytes: (self.max_size_mb.max(0.0) * 1024.0 * 1024.0) as u64,
            eviction: self.eviction,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_layers")]
    pub layers: Vec<LayerConfig>,
}

fn default_layers() -> Vec<LayerConfig> {
    vec![
        LayerConfig {
            name: "session".into(),
            kind: LayerKind::Memory,
            priority: 0,
            default_ttl_secs: Some(15 * 60),
            max_entries: 1_000,
            max_size_mb: 16.0,
            eviction: EvictionPolicy::LowestQuality,
            path: None,
        },
        LayerConfig {
            name: "shared".into(),
            kind: LayerKind::Memory,
            priority: 10,
            default_ttl_secs: Some(HOUR_SECS),
            max_entries: 5_000,
            max_size_mb: 64.0,
            eviction: EvictionPolicy::LeastHit,
            path: None,
        },
        LayerConfig {
            name: "durable".into(),
            kind: LayerKind::Sqlite,
            priority: 20,
            default_ttl_secs: Some(7 * DAY_SECS),
            max_entries: 50_000,
            max_size_mb: 256.0,
            eviction: EvictionPolicy::LowestQuality,
            path: None,
        },
    ]
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            layers: default_layers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Registry layer that backs the tool cache
    #[serde(default = "default_tool_cache_layer")]
    pub layer: String,

    /// Minimum cosine similarity for a semantic hit
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Tool-name fragments eligible for semantic fallback
    #[serde(default = "default_semantic_tools")]
    pub semantic_tools: Vec<String>,

    /// TTL for tools that match no kind-specific default
    #[serde(default = "default_tool_ttl")]
    pub default_ttl_secs: i64,

    /// Per-tool TTL overrides (tool name → seconds, 0 disables caching)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub ttl_secs: HashMap<String, i64>,
}

fn default_true() -> bool {
    true
}
fn default_tool_cache_layer() -> String {
    "durable".into()
}
fn default_similarity_threshold() -> f32 {
    0.85
}
fn default_semantic_tools() -> Vec<String> {
    vec!["commerce".into(), "purchasing".into(), "research".into()]
}
fn default_tool_ttl() -> i64 {
    HOUR_SECS
}

impl Default for ToolCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            layer: default_tool_cache_layer(),
            similarity_threshold: default_similarity_threshold(),
            semantic_tools: default_semantic_tools(),
            default_ttl_secs: default_tool_ttl(),
            ttl_secs: HashMap::new(),
        }
    }
}

impl ToolCacheConfig {
    /// TTL for a tool: explicit override, else a per-kind default.
    pub fn ttl_for(&self, tool_name: &str) -> i64 {
        if let Some(ttl) = self.ttl_secs.get(tool_name) {
            return *ttl;
        }
        match ToolKind::classify(tool_name) {
            ToolKind::Commerce => 6 * HOUR_SECS,
            ToolKind::Research => DAY_SECS,
            ToolKind::Document => 12 * HOUR_SECS,
            ToolKind::Generic => self.default_ttl_secs,
        }
    }

    /// Whether a tool may be served from a semantically similar entry.
    pub fn is_semantic(&self, tool_name: &str) -> bool {
        let name = tool_name.to_ascii_lowercase();
        self.semantic_tools
            .iter()
            .any(|fragment| name.contains(&fragment.to_ascii_lowercase()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "hash" (built-in, deterministic) or "none"
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}
fn default_embedding_dimensions() -> usize {
    256
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            dimensions: default_embedding_dimensions(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the default path (~/.claimcache/config.toml).
    ///
    /// Environment overrides (highest priority):
    /// - `CLAIMCACHE_DATA_DIR`
    /// - `CLAIMCACHE_CLAIM_LIMIT`
    /// - `CLAIMCACHE_MAX_WORKING_MEMORY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if let Ok(dir) = std::env::var("CLAIMCACHE_DATA_DIR") {
            config.data_dir = Some(dir);
        }
        if let Some(limit) = env_usize("CLAIMCACHE_CLAIM_LIMIT")? {
            config.capsule.capsule_claim_limit = limit;
        }
        if let Some(max) = env_usize("CLAIMCACHE_MAX_WORKING_MEMORY")? {
            config.capsule.max_working_memory = max;
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".claimcache")
    }

    /// Directory holding databases.
    pub fn data_dir(&self) -> PathBuf {
        self.data_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::config_dir)
    }

    /// Claim database location.
    pub fn claims_db_path(&self) -> PathBuf {
        self.claims
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join("claims.sqlite"))
    }

    /// Database location for a sqlite cache layer.
    pub fn layer_db_path(&self, layer: &LayerConfig) -> PathBuf {
        layer
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| self.data_dir().join(format!("cache-{}.sqlite", layer.name)))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !matches!(self.claims.backend.as_str(), "sqlite" | "memory") {
            return Err(ConfigError::ValidationError(format!(
                "claims.backend must be \"sqlite\" or \"memory\", got \"{}\"",
                self.claims.backend
            )));
        }

        if self.capsule.capsule_claim_limit == 0 {
            return Err(ConfigError::ValidationError(
                "capsule.capsule_claim_limit must be > 0".into(),
            ));
        }

        if self.capsule.max_working_memory == 0 {
            return Err(ConfigError::ValidationError(
                "capsule.max_working_memory must be > 0".into(),
            ));
        }

        if !(0.0..=1.0).contains(&self.capsule.quality_threshold) {
            return Err(ConfigError::ValidationError(
                "capsule.quality_threshold must be between 0.0 and 1.0".into(),
            ));
        }

        let mut names = HashSet::new();
        for layer in &self.cache.layers {
            if layer.name.trim().is_empty() {
                return Err(ConfigError::ValidationError(
                    "cache layer names must not be empty".into(),
                ));
            }
            if !names.insert(layer.name.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "duplicate cache layer \"{}\"",
                    layer.name
                )));
            }
            if layer.max_size_mb < 0.0 {
                return Err(ConfigError::ValidationError(format!(
                    "cache layer \"{}\": max_size_mb must be >= 0",
                    layer.name
                )));
            }
        }

        if self.tool_cache.enabled && !names.contains(self.tool_cache.layer.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "tool_cache.layer \"{}\" is not a configured cache layer",
                self.tool_cache.layer
            )));
        }

        let threshold = self.tool_cache.similarity_threshold;
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "tool_cache.similarity_threshold must be in (0.0, 1.0]".into(),
            ));
        }

        if !matches!(self.embedding.provider.as_str(), "hash" | "none") {
            return Err(ConfigError::ValidationError(format!(
                "embedding.provider must be \"hash\" or \"none\", got \"{}\"",
                self.embedding.provider
            )));
        }

        if self.embedding.provider == "hash" && self.embedding.dimensions == 0 {
            return Err(ConfigError::ValidationError(
                "embedding.dimensions must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            claims: ClaimsConfig::default(),
            capsule: CapsuleConfig::default(),
            cache: CacheConfig::default(),
            tool_cache: ToolCacheConfig::default(),
            embedding: EmbeddingConfig::default(),
        }
    }
}

fn env_usize(var: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) => raw
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|e| ConfigError::ValidationError(format!("{var}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capsule.capsule_claim_limit, 10);
        assert_eq!(config.capsule.max_working_memory, 15);
        assert_eq!(config.cache.layers.len(), 3);
        assert_eq!(config.tool_cache.similarity_threshold, 0.85);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: EngineConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.claims.backend, config.claims.backend);
        assert_eq!(parsed.cache.layers.len(), config.cache.layers.len());
        assert_eq!(parsed.cache.layers[2].kind, LayerKind::Sqlite);
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = EngineConfig::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_ok());
        assert_eq!(result.unwrap().claims.backend, "sqlite");
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
data_dir = "/var/lib/claimcache"

[capsule]
capsule_claim_limit = 4
prune_mode = "delete"

[[cache.layers]]
name = "tiny"
kind = "memory"
max_size_mb = 1.0

[tool_cache]
layer = "tiny"
"#,
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.capsule.capsule_claim_limit, 4);
        assert_eq!(config.capsule.prune_mode, PruneMode::Delete);
        assert_eq!(config.cache.layers.len(), 1);
        assert_eq!(config.cache.layers[0].settings().max_size_bytes, 1024 * 1024);
        assert_eq!(
            config.claims_db_path(),
            PathBuf::from("/var/lib/claimcache/claims.sqlite")
        );
    }

    #[test]
    fn unparsable_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "capsule = 12").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn zero_claim_limit_rejected() {
        let mut config = EngineConfig::default();
        config.capsule.capsule_claim_limit = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duplicate_layers_rejected() {
        let mut config = EngineConfig::default();
        let dup = config.cache.layers[0].clone();
        config.cache.layers.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn tool_cache_layer_must_exist() {
        let mut config = EngineConfig::default();
        config.tool_cache.layer = "missing".into();
        assert!(config.validate().is_err());
        config.tool_cache.enabled = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn tool_ttl_overrides_and_kinds() {
        let mut tc = ToolCacheConfig::default();
        tc.ttl_secs.insert("calculator".into(), 0);
        assert_eq!(tc.ttl_for("calculator"), 0);
        assert_eq!(tc.ttl_for("commerce.search_offers"), 6 * HOUR_SECS);
        assert_eq!(tc.ttl_for("weather"), HOUR_SECS);
        assert!(tc.is_semantic("Commerce.search_offers"));
        assert!(!tc.is_semantic("file_read"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = EngineConfig::default_toml();
        assert!(toml_str.contains("capsule_claim_limit"));
        assert!(toml_str.contains("durable"));
    }
}
