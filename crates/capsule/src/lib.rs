//! Capsule compilation: the heart of Claimcache.
//!
//! Turns one ticket's raw tool outputs into a small, budgeted capsule:
//!
//! 1. **Extract** candidates per tool kind (offers, hits, statements)
//! 2. **Score** them against the ticket goal and the session's active claims
//! 3. **Persist** the top-N as claims with quality-adjusted retention
//! 4. **Prune** the session's working memory back under its cap
//! 5. **Emit** an envelope of claim ids, summaries, caveats and a delta
//!
//! [`Engine`] wires this together with the claim store and cache layers.

pub mod compile;
pub mod context;
pub mod engine;
pub mod extract;
pub mod prune;
pub mod quality;
pub mod score;
pub mod token;

pub use compile::{CapsuleCompiler, CompileError, CompileOutput, CompileRequest};
pub use engine::{Engine, EngineStatus, SweepReport, ToolCallOutcome};
pub use prune::{PruneOutcome, PruneStats, WorkingMemoryPruner};
pub use score::{ScoreBreakdown, ScoredCandidate};
