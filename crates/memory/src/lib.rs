//! Claim persistence and embedding backends for Claimcache.

pub mod embedding;
pub mod in_memory;
pub mod vector;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use embedding::{HashEmbedder, NoopEmbedder};
pub use in_memory::InMemoryClaimStore;
pub use vector::{best_match, cosine_similarity, normalize};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteClaimStore;
