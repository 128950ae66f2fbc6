//! Engine facade: everything wired from one `EngineConfig`.
//!
//! Construct once at startup and share by reference or `Arc`; there are no
//! process-wide singletons.

use chrono::{Duration, Utc};
use claimcache_cache::{CacheHit, CacheRegistry, RegistryStats, ToolOutputCache};
use claimcache_config::{EmbeddingConfig, EngineConfig};
use claimcache_core::embedding::Embedder;
use claimcache_core::error::{CacheError, Error, Result, StoreError};
use claimcache_core::evaluator::{ClaimEvaluator, KeepAllEvaluator};
use claimcache_core::store::ClaimStore;
use claimcache_memory::{HashEmbedder, InMemoryClaimStore, SqliteClaimStore};
use serde::Serialize;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

use crate::compile::{CapsuleCompiler, CompileError, CompileOutput, CompileRequest};
use crate::prune::{PruneOutcome, WorkingMemoryPruner};

/// What a sweep removed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub expired_claims: usize,
    pub archived_claims: usize,
    pub cache_entries: usize,
}

/// Store and cache totals for `claimcache status`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub store_backend: String,
    pub claims: usize,
    pub tool_cache_enabled: bool,
    pub cache: RegistryStats,
}

/// Result of a cache-first tool call.
#[derive(Debug, Clone)]
pub struct ToolCallOutcome {
    pub response: Value,
    /// `None` when the tool actually ran.
    pub cache_hit: Option<CacheHit>,
}

pub struct Engine {
    config: EngineConfig,
    store: Arc<dyn ClaimStore>,
    registry: Arc<CacheRegistry>,
    tool_cache: Option<Arc<ToolOutputCache>>,
    pruner: Arc<WorkingMemoryPruner>,
    compiler: CapsuleCompiler,
}

impl Engine {
    /// Open the configured claim store and cache layers.
    pub async fn from_config(config: EngineConfig) -> Result<Self> {
        config.validate().map_err(|e| Error::Config {
            message: e.to_string(),
        })?;

        let store: Arc<dyn ClaimStore> = match config.claims.backend.as_str() {
            "memory" => Arc::new(InMemoryClaimStore::new()),
            _ => {
                let path = config.claims_db_path();
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)
                        .map_err(|e| StoreError::Storage(format!("{}: {e}", parent.display())))?;
                }
                Arc::new(SqliteClaimStore::new(&path.to_string_lossy()).await?)
            }
        };
        let registry = Arc::new(CacheRegistry::from_config(&config).await?);
        let embedder = embedder_for(&config.embedding);

        Self::with_parts(config, store, registry, embedder, Arc::new(KeepAllEvaluator)).await
    }

    /// Assemble an engine from pre-built parts (tests, embedding hosts).
    pub async fn with_parts(
        config: EngineConfig,
        store: Arc<dyn ClaimStore>,
        registry: Arc<CacheRegistry>,
        embedder: Option<Arc<dyn Embedder>>,
        evaluator: Arc<dyn ClaimEvaluator>,
    ) -> Result<Self> {
        let tool_cache = if config.tool_cache.enabled {
            let layer = registry
                .layer(&config.tool_cache.layer)
                .await
                .ok_or_else(|| CacheError::UnknownLayer(config.tool_cache.layer.clone()))?;
            let cache = ToolOutputCache::new(layer, embedder, config.tool_cache.clone());
            let indexed = cache.rebuild_index().await?;
            info!(layer = %config.tool_cache.layer, indexed, "Tool cache ready");
            Some(Arc::new(cache))
        } else {
            None
        };

        let pruner = Arc::new(
            WorkingMemoryPruner::new(store.clone())
                .with_evaluator(evaluator)
                .with_mode(config.capsule.prune_mode)
                .with_excluded_domains(config.capsule.excluded_domains.clone()),
        );
        let compiler = CapsuleCompiler::new(store.clone(), pruner.clone(), config.capsule.clone());

        info!(store = store.name(), "Engine initialized");
        Ok(Self {
            config,
            store,
            registry,
            tool_cache,
            pruner,
            compiler,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn ClaimStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<CacheRegistry> {
        &self.registry
    }

    pub fn tool_cache(&self) -> Option<&Arc<ToolOutputCache>> {
        self.tool_cache.as_ref()
    }

    pub async fn compile(&self, request: CompileRequest) -> std::result::Result<CompileOutput, CompileError> {
        self.compiler.compile(request).await
    }

    /// Prune a session to the configured working-memory cap.
    pub async fn prune(&self, session_id: &str) -> std::result::Result<PruneOutcome, StoreError> {
        self.pruner
            .prune_with_stats(session_id, self.config.capsule.max_working_memory)
            .await
    }

    /// Serve `tool(args)` from cache, else run `invoke` and cache its result.
    ///
    /// Cache failures never fail the call; only `invoke`'s own error does.
    pub async fn call_tool<F, Fut, E>(&self, tool: &str, args: &Value, invoke: F) -> std::result::Result<ToolCallOutcome, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Value, E>>,
    {
        let Some(cache) = &self.tool_cache else {
            return Ok(ToolCallOutcome {
                response: invoke().await?,
                cache_hit: None,
            });
        };

        if let Some(cached) = cache.get(tool, args).await {
            return Ok(ToolCallOutcome {
                response: cached.response,
                cache_hit: Some(cached.hit),
            });
        }

        let response = invoke().await?;
        if let Err(e) = cache.set(tool, args, response.clone()).await {
            warn!(tool, "Failed to cache tool output: {e}");
        }
        Ok(ToolCallOutcome {
            response,
            cache_hit: None,
        })
    }

    /// Purge expired claims, old archived claims and expired cache entries.
    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = Utc::now();
        let retention = Duration::days(i64::from(self.config.claims.archive_retention_days));

        let report = SweepReport {
            expired_claims: self.store.purge_expired(now).await?,
            archived_claims: self.store.purge_archived(now - retention).await?,
            cache_entries: self.registry.cleanup_expired().await,
        };
        if let Some(cache) = &self.tool_cache {
            if let Err(e) = cache.rebuild_index().await {
                warn!("Tool cache index rebuild failed: {e}");
            }
        }

        info!(
            expired_claims = report.expired_claims,
            archived_claims = report.archived_claims,
            cache_entries = report.cache_entries,
            "Sweep complete"
        );
        Ok(report)
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        Ok(EngineStatus {
            store_backend: self.store.name().to_string(),
            claims: self.store.count(None).await?,
            tool_cache_enabled: self.tool_cache.is_some(),
            cache: self.registry.stats().await,
        })
    }
}

/// Embedder for the configured provider; `None` disables semantic lookups.
pub fn embedder_for(config: &EmbeddingConfig) -> Option<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "hash" => Some(Arc::new(HashEmbedder::new(config.dimensions))),
        _ => None,
    }
}
