//! # Claimcache Core
//!
//! Domain types, traits, and error definitions for the Claimcache
//! working-memory and caching engine. This crate has **no storage
//! dependencies**: it defines the domain model that all other crates
//! implement against.
//!
//! ## Design Philosophy
//!
//! Every subsystem seam is a trait here (`ClaimStore`, `CacheLayer`,
//! `Embedder`, `ClaimEvaluator`). Implementations live in their respective
//! crates, so backends can be swapped via configuration and tests can run
//! against in-memory stand-ins.

pub mod bundle;
pub mod cache;
pub mod candidate;
pub mod capsule;
pub mod claim;
pub mod embedding;
pub mod error;
pub mod evaluator;
pub mod freshness;
pub mod store;

// Re-export key types at crate root for ergonomics
pub use bundle::{RawOutput, RawOutputBundle, ToolKind, ToolRecord};
pub use cache::{CacheEntry, CacheLayer, EvictionPolicy, KeyPattern, LayerSettings, LayerStats, PutOptions};
pub use candidate::Candidate;
pub use capsule::{
    BudgetReport, Capsule, CapsuleDelta, CapsuleEnvelope, CapsuleStatus, QualityReport,
    QueryRefinement, SessionContext, Ticket, WorkingMemorySnapshot,
};
pub use claim::{ArtifactRef, Claim, ClaimMetadata, Confidence, QualityScores};
pub use embedding::Embedder;
pub use error::{Error, Result};
pub use evaluator::{ClaimEvaluator, KeepAllEvaluator, Verdict};
pub use store::ClaimStore;
