//! Engine configuration.
//!
//! [`CompressionConfig`] holds the knobs of one compression pass and is
//! built in code with `with_*` methods. [`EngineConfig`] aggregates every
//! tunable (ceiling, threshold, estimator ratio, cache size, budget
//! proportions, compression settings) and can be loaded from a partial JSON
//! file; missing fields take their defaults.
//!
//! ```json
//! {
//!   "context_window": 128000,
//!   "compression_threshold_percent": 70,
//!   "min_recent_messages": 12,
//!   "strategies": { "summarize_long_messages": { "enabled": false, "trigger_ratio": 2.5 } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::DEFAULT_SUMMARY_MODEL;
use crate::archive::recall::DEFAULT_RECALL_LIMIT;
use crate::context::budget::{BudgetAllocator, ContextBudget, DEFAULT_PROPORTIONS, SECTION_HISTORY};
use crate::context::cache::DEFAULT_CACHE_CAPACITY;
use crate::context::chunker::DEFAULT_MAX_CHUNK_TURNS;
use crate::context::estimator::{CharRatioEstimator, DEFAULT_CHARS_PER_TOKEN};
use crate::context::policy::PolicyContext;
use crate::context::strategies::StrategySet;
use crate::context::usage::{
    DEFAULT_COMPRESSION_THRESHOLD_PERCENT, DEFAULT_CONTEXT_WINDOW, UsageTracker,
};
use crate::error::ConfigError;

pub const DEFAULT_MIN_RECENT_MESSAGES: usize = 8;
pub const DEFAULT_SMALL_CODE_CHARS: usize = 1_500;
pub const DEFAULT_LONG_MESSAGE_CHARS: usize = 4_000;
pub const DEFAULT_MEMORY_BUDGET_TOKENS: usize = 2_000;

// ── Compression pass ───────────────────────────────────────────────

/// Configuration for one compression pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionConfig {
    /// Token budget the output should fit in. Must be positive.
    pub target_tokens: usize,
    /// Trailing turns kept verbatim regardless of classification.
    pub min_recent_messages: usize,
    /// Cap on turns per archived chunk, within
    /// `2..=DEFAULT_MAX_CHUNK_TURNS`.
    pub max_chunk_turns: usize,
    /// Keep error reports verbatim.
    pub preserve_error_context: bool,
    /// Keep small code snippets verbatim.
    pub preserve_code_blocks: bool,
    /// Code turns at or under this size count as small. Larger turns get
    /// code-block compression.
    pub small_code_chars: usize,
    /// Turns longer than this are candidates for long-message summarization.
    pub long_message_chars: usize,
    /// Token budget for the `[Persistent Memory]` block.
    pub memory_budget_tokens: usize,
    pub strategies: StrategySet,
}

impl CompressionConfig {
    pub fn new(target_tokens: usize) -> Self {
        Self {
            target_tokens,
            min_recent_messages: DEFAULT_MIN_RECENT_MESSAGES,
            max_chunk_turns: DEFAULT_MAX_CHUNK_TURNS,
            preserve_error_context: true,
            preserve_code_blocks: true,
            small_code_chars: DEFAULT_SMALL_CODE_CHARS,
            long_message_chars: DEFAULT_LONG_MESSAGE_CHARS,
            memory_budget_tokens: DEFAULT_MEMORY_BUDGET_TOKENS,
            strategies: StrategySet::default(),
        }
    }

    pub fn with_min_recent_messages(mut self, n: usize) -> Self {
        self.min_recent_messages = n;
        self
    }

    pub fn with_max_chunk_turns(mut self, n: usize) -> Self {
        self.max_chunk_turns = n;
        self
    }

    pub fn with_preserve_error_context(mut self, preserve: bool) -> Self {
        self.preserve_error_context = preserve;
        self
    }

    pub fn with_preserve_code_blocks(mut self, preserve: bool) -> Self {
        self.preserve_code_blocks = preserve;
        self
    }

    pub fn with_long_message_chars(mut self, chars: usize) -> Self {
        self.long_message_chars = chars;
        self
    }

    pub fn with_memory_budget_tokens(mut self, tokens: usize) -> Self {
        self.memory_budget_tokens = tokens;
        self
    }

    pub fn with_strategies(mut self, strategies: StrategySet) -> Self {
        self.strategies = strategies;
        self
    }

    /// Reject configurations a pass cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_tokens == 0 {
            return Err(ConfigError::NonPositiveTarget);
        }
        if self.max_chunk_turns < 2 {
            return Err(ConfigError::ChunkCapTooSmall(self.max_chunk_turns));
        }
        if self.max_chunk_turns > DEFAULT_MAX_CHUNK_TURNS {
            return Err(ConfigError::ChunkCapTooLarge {
                got: self.max_chunk_turns,
                max: DEFAULT_MAX_CHUNK_TURNS,
            });
        }
        if let Some(ratio) = self
            .strategies
            .trigger_ratios()
            .into_iter()
            .find(|r| !(*r >= 1.0))
        {
            return Err(ConfigError::InvalidThreshold(ratio));
        }
        Ok(())
    }

    /// The flags the retention rules consult.
    pub fn policy_context(&self) -> PolicyContext {
        PolicyContext {
            preserve_error_context: self.preserve_error_context,
            preserve_code_blocks: self.preserve_code_blocks,
            small_code_chars: self.small_code_chars,
        }
    }
}

// ── Engine-wide ────────────────────────────────────────────────────

/// Every tunable, loadable from a partial JSON file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Model context ceiling in tokens.
    pub context_window: usize,
    /// Usage percentage at which compression is needed.
    pub compression_threshold_percent: f64,
    /// Estimator calibration.
    pub chars_per_token: f64,
    pub summary_cache_capacity: usize,
    pub retrieval_top_k: usize,
    /// Model used for summaries when an LLM is available.
    pub summary_model: String,
    /// Section name to share of the ceiling.
    pub budget_proportions: BTreeMap<String, f64>,
    /// Compression target. Defaults to the history section of the budget.
    pub target_tokens: Option<usize>,
    pub min_recent_messages: usize,
    pub max_chunk_turns: usize,
    pub preserve_error_context: bool,
    pub preserve_code_blocks: bool,
    pub small_code_chars: usize,
    pub long_message_chars: usize,
    pub memory_budget_tokens: usize,
    pub strategies: StrategySet,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            context_window: DEFAULT_CONTEXT_WINDOW,
            compression_threshold_percent: DEFAULT_COMPRESSION_THRESHOLD_PERCENT,
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
            summary_cache_capacity: DEFAULT_CACHE_CAPACITY,
            retrieval_top_k: DEFAULT_RECALL_LIMIT,
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            budget_proportions: DEFAULT_PROPORTIONS
                .iter()
                .map(|(name, p)| (name.to_string(), *p))
                .collect(),
            target_tokens: None,
            min_recent_messages: DEFAULT_MIN_RECENT_MESSAGES,
            max_chunk_turns: DEFAULT_MAX_CHUNK_TURNS,
            preserve_error_context: true,
            preserve_code_blocks: true,
            small_code_chars: DEFAULT_SMALL_CODE_CHARS,
            long_message_chars: DEFAULT_LONG_MESSAGE_CHARS,
            memory_budget_tokens: DEFAULT_MEMORY_BUDGET_TOKENS,
            strategies: StrategySet::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file. Missing fields keep their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let t = self.compression_threshold_percent;
        if !(t > 0.0 && t <= 100.0) {
            return Err(ConfigError::ThresholdOutOfRange(t));
        }
        self.allocator()?;
        self.compression_config(None).validate()
    }

    pub fn allocator(&self) -> Result<BudgetAllocator, ConfigError> {
        BudgetAllocator::new(
            self.budget_proportions
                .iter()
                .map(|(name, p)| (name.clone(), *p))
                .collect(),
        )
    }

    /// Allocation of the configured ceiling.
    pub fn budget(&self) -> Result<ContextBudget, ConfigError> {
        Ok(self.allocator()?.allocate(self.context_window))
    }

    pub fn estimator(&self) -> CharRatioEstimator {
        CharRatioEstimator::with_calibration(Some(self.chars_per_token))
    }

    pub fn usage_tracker(&self) -> UsageTracker {
        UsageTracker::new(self.context_window)
            .with_threshold_percent(self.compression_threshold_percent)
            .with_estimator(std::sync::Arc::new(self.estimator()))
    }

    /// Compression target: `target` if given, else the configured target,
    /// else the history section of the budget.
    pub fn resolve_target(&self, target: Option<usize>) -> usize {
        target.or(self.target_tokens).unwrap_or_else(|| {
            self.budget()
                .map(|b| b.section(SECTION_HISTORY))
                .unwrap_or_default()
        })
    }

    /// Per-pass configuration. `target` overrides the configured target.
    pub fn compression_config(&self, target: Option<usize>) -> CompressionConfig {
        CompressionConfig {
            target_tokens: self.resolve_target(target),
            min_recent_messages: self.min_recent_messages,
            max_chunk_turns: self.max_chunk_turns,
            preserve_error_context: self.preserve_error_context,
            preserve_code_blocks: self.preserve_code_blocks,
            small_code_chars: self.small_code_chars,
            long_message_chars: self.long_message_chars,
            memory_budget_tokens: self.memory_budget_tokens,
            strategies: self.strategies,
        }
    }
}
