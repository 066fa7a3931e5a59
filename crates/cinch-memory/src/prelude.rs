//! Convenience re-exports for common `cinch-memory` types.
//!
//! Meant to be glob-imported by agent loops:
//!
//! ```ignore
//! use cinch_memory::prelude::*;
//! ```
//!
//! This pulls in what most callers need: [`Message`] constructors, the
//! [`UsageTracker`], the [`CompressionEngine`] and its config, the archive
//! store, and event handlers. Strategy functions, chunking and the
//! classifier rules stay in their modules.

// ── Core types ──────────────────────────────────────────────────────
pub use crate::{Message, MessageRole, OpenRouterClient, ToolCall, ToolDef, json_schema_for};

// ── Configuration and errors ────────────────────────────────────────
pub use crate::config::{CompressionConfig, EngineConfig};
pub use crate::error::{ArchiveError, CompressError, ConfigError};

// ── Context management ──────────────────────────────────────────────
pub use crate::context::{
    BudgetAllocator, CharRatioEstimator, Classify, CompressionEngine, CompressionOutcome,
    ContextBudget, HeuristicClassifier, Importance, LlmSummarizer, Summarizer, TokenEstimator,
    Usage, UsageTracker,
};

// ── Archive ─────────────────────────────────────────────────────────
pub use crate::archive::recall::{RETRIEVED_CONTEXT_MARKER, recall_tool_definition};
pub use crate::archive::store::JsonArchiveStore;
pub use crate::archive::{ArchiveEntry, ArchiveFacts, ArchiveStore};

// ── Events ──────────────────────────────────────────────────────────
pub use crate::events::{
    CompositeEventHandler, CompressionEvent, EventHandler, FnEventHandler, LoggingHandler,
    NoopHandler,
};
