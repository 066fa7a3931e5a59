//! Context window management: estimation, usage, budgets, classification,
//! rewrite strategies, chunking, summarization, and the compression engine.
//!
//! The context window is the scarcest resource in a long-running agent.
//! The pieces here, leaf-first:
//!
//! 1. **[`estimator`]**: token estimates for turns and tool schemas.
//!
//! 2. **[`usage`]**: running usage against the model ceiling, and the
//!    "needs compression" signal.
//!
//! 3. **[`budget`]**: proportional allocation of a ceiling across named
//!    sections, rescaled when the model changes.
//!
//! 4. **[`classifier`]** and **[`policy`]**: importance tiers per turn and the
//!    ordered keep/archive/discard rules applied to them.
//!
//! 5. **[`strategies`]**, **[`chunker`]**, **[`summarizer`]**, **[`cache`]**,
//!    **[`keywords`]**: the machinery a pass uses to shrink and archive.
//!
//! 6. **[`layout`]**: the four-zone output transcript.
//!
//! 7. **[`engine`]**: [`CompressionEngine`] ties it together.

pub mod budget;
pub mod cache;
pub mod chunker;
pub mod classifier;
pub mod engine;
pub mod estimator;
pub mod keywords;
pub mod layout;
pub mod paths;
pub mod policy;
pub mod strategies;
pub mod summarizer;
pub mod usage;

// Re-export commonly used items at the module level.
pub use budget::{BudgetAllocator, ContextBudget};
pub use classifier::{Category, Classification, Classify, HeuristicClassifier, Importance};
pub use engine::{CompressionEngine, CompressionOutcome};
pub use estimator::{CharRatioEstimator, DEFAULT_CHARS_PER_TOKEN, TokenEstimator};
pub use layout::LayoutBreakdown;
pub use summarizer::{LlmSummarizer, Summarizer};
pub use usage::{Usage, UsageTracker, needs_compression};
