//! Cascading cache layers, registry, and tool output cache for Claimcache.

pub mod eviction;
pub mod memory_layer;
pub mod registry;
pub mod sqlite_layer;
pub mod tool_cache;

pub use memory_layer::MemoryLayer;
pub use registry::{CacheRegistry, RegistryStats};
pub use sqlite_layer::SqliteLayer;
pub use tool_cache::{CacheHit, CachedToolOutput, ToolOutputCache, cache_key};
