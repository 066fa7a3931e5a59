//! Context usage tracking: monitors estimated token usage against the active
//! model's ceiling and signals when a compression pass is due.
//!
//! Usage is recomputed from scratch on every [`UsageTracker::record_usage`]
//! call, split into system, conversation and tool-schema subtotals. If the
//! estimator fails the tracker fails closed and reports the context as full:
//! skipping a needed compression risks a hard provider-side overflow later.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::context::estimator::{CharRatioEstimator, TokenEstimator};
use crate::{Message, MessageRole, ToolDef};

/// Default context window size in tokens.
pub const DEFAULT_CONTEXT_WINDOW: usize = 200_000;

/// Default percentage of the ceiling at which compression is requested.
pub const DEFAULT_COMPRESSION_THRESHOLD_PERCENT: f64 = 75.0;

/// Usage above this percentage adds a near-limit warning to [`UsageTracker::summary`].
const WARNING_PERCENT: f64 = 80.0;

/// Width of the usage bar in [`UsageTracker::summary`].
const BAR_WIDTH: usize = 20;

/// Per-section token subtotals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionUsage {
    pub system: usize,
    pub conversation: usize,
    pub tools: usize,
}

/// Snapshot of context usage at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Usage {
    /// Estimated tokens consumed.
    pub total: usize,
    /// Subtotals by section.
    pub sections: SectionUsage,
    /// Ceiling the usage was measured against.
    pub ceiling: usize,
    /// Usage as a percentage of the ceiling (0.0 to 100.0+).
    pub percent_used: f64,
    /// Tokens left before the ceiling.
    pub remaining: usize,
    /// The estimator failed; the snapshot reports a full context.
    pub estimate_failed: bool,
}

impl Usage {
    fn measured(sections: SectionUsage, ceiling: usize) -> Self {
        let total = sections.system + sections.conversation + sections.tools;
        let percent_used = if ceiling > 0 {
            total as f64 / ceiling as f64 * 100.0
        } else {
            100.0
        };
        Self {
            total,
            sections,
            ceiling,
            percent_used,
            remaining: ceiling.saturating_sub(total),
            estimate_failed: false,
        }
    }

    fn failed_closed(ceiling: usize) -> Self {
        Self {
            total: ceiling,
            sections: SectionUsage::default(),
            ceiling,
            percent_used: 100.0,
            remaining: 0,
            estimate_failed: true,
        }
    }

    /// Format as a short log-friendly string.
    pub fn to_log_string(&self) -> String {
        format!(
            "context: ~{} tokens ({:.0}% of {})",
            self.total, self.percent_used, self.ceiling,
        )
    }
}

/// Whether `usage` has crossed `threshold_percent`.
///
/// A failed estimate always needs compression.
pub fn needs_compression(usage: &Usage, threshold_percent: f64) -> bool {
    usage.estimate_failed || usage.percent_used >= threshold_percent
}

/// Tracks context usage for one conversation.
///
/// # Example
///
/// ```ignore
/// let mut tracker = UsageTracker::new(128_000).with_threshold_percent(70.0);
/// tracker.record_usage(&messages, &tool_defs);
/// println!("{}", tracker.summary());
/// if tracker.needs_compression() { /* run a pass */ }
/// ```
pub struct UsageTracker {
    ceiling: usize,
    threshold_percent: f64,
    estimator: Arc<dyn TokenEstimator>,
    last: Option<Usage>,
}

impl std::fmt::Debug for UsageTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsageTracker")
            .field("ceiling", &self.ceiling)
            .field("threshold_percent", &self.threshold_percent)
            .field("estimator", &self.estimator.name())
            .field("last", &self.last)
            .finish()
    }
}

impl Default for UsageTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CONTEXT_WINDOW)
    }
}

impl UsageTracker {
    /// Create a tracker for a model with the given context ceiling.
    pub fn new(ceiling: usize) -> Self {
        Self {
            ceiling,
            threshold_percent: DEFAULT_COMPRESSION_THRESHOLD_PERCENT,
            estimator: Arc::new(CharRatioEstimator::default()),
            last: None,
        }
    }

    /// Override the compression threshold (percentage of the ceiling).
    pub fn with_threshold_percent(mut self, percent: f64) -> Self {
        self.threshold_percent = percent;
        self
    }

    /// Use a different token estimator.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Replace the model ceiling.
    ///
    /// Does not rescale any previously computed
    /// [`ContextBudget`](crate::context::budget::ContextBudget); callers do
    /// that with [`ContextBudget::rescale`](crate::context::budget::ContextBudget::rescale).
    pub fn set_ceiling(&mut self, tokens: usize) {
        debug!("Context ceiling changed: {} -> {}", self.ceiling, tokens);
        self.ceiling = tokens;
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn threshold_percent(&self) -> f64 {
        self.threshold_percent
    }

    /// The most recent snapshot, if any.
    pub fn last_usage(&self) -> Option<&Usage> {
        self.last.as_ref()
    }

    /// Recompute usage for `turns` plus `tool_schema` and remember it.
    pub fn record_usage(&mut self, turns: &[Message], tool_schema: &[ToolDef]) -> Usage {
        let usage = self.measure(turns, tool_schema);
        debug!("{}", usage.to_log_string());
        self.last = Some(usage.clone());
        usage
    }

    fn measure(&self, turns: &[Message], tool_schema: &[ToolDef]) -> Usage {
        let (system, conversation): (Vec<Message>, Vec<Message>) = turns
            .iter()
            .cloned()
            .partition(|t| t.role == MessageRole::System);

        let sections = self
            .estimator
            .estimate(&system, &[])
            .and_then(|system| {
                let conversation = self.estimator.estimate(&conversation, &[])?;
                let tools = self.estimator.estimate(&[], tool_schema)?;
                Ok(SectionUsage {
                    system,
                    conversation,
                    tools,
                })
            });

        match sections {
            Ok(sections) => Usage::measured(sections, self.ceiling),
            Err(e) => {
                warn!("{e}; treating context as full");
                Usage::failed_closed(self.ceiling)
            }
        }
    }

    /// Whether the last recorded usage crossed the compression threshold.
    ///
    /// Returns `false` until [`record_usage`](Self::record_usage) has run.
    pub fn needs_compression(&self) -> bool {
        self.last
            .as_ref()
            .is_some_and(|u| needs_compression(u, self.threshold_percent))
    }

    /// Forget recorded usage (conversation cleared or new session).
    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Fixed-width usage indicator, plus a warning line above 80%.
    pub fn summary(&self) -> String {
        let Some(usage) = &self.last else {
            return format!("context [{}] no usage recorded", "-".repeat(BAR_WIDTH));
        };

        let filled = ((usage.percent_used / 100.0) * BAR_WIDTH as f64).round() as usize;
        let filled = filled.min(BAR_WIDTH);
        let mut line = format!(
            "context [{}{}] {:>3.0}% ~{}/{} tokens (system {}, conversation {}, tools {})",
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            usage.percent_used,
            usage.total,
            usage.ceiling,
            usage.sections.system,
            usage.sections.conversation,
            usage.sections.tools,
        );
        if usage.estimate_failed {
            line.push_str("\nwarning: token estimate unavailable; assuming the context is full");
        } else if usage.percent_used > WARNING_PERCENT {
            line.push_str(&format!(
                "\nwarning: context window nearly full ({:.0}% used, {} tokens left); older turns will be compressed",
                usage.percent_used, usage.remaining,
            ));
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EstimateError;

    struct FailingEstimator;

    impl TokenEstimator for FailingEstimator {
        fn estimate(&self, _: &[Message], _: &[ToolDef]) -> Result<usize, EstimateError> {
            Err(EstimateError("tokenizer offline".into()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn one_token_per_char() -> Arc<dyn TokenEstimator> {
        Arc::new(CharRatioEstimator::with_calibration(Some(1.0)))
    }

    #[test]
    fn low_usage_does_not_need_compression() {
        let mut tracker = UsageTracker::new(1_000).with_estimator(one_token_per_char());
        tracker.record_usage(&[Message::user("hello")], &[]);
        assert!(!tracker.needs_compression());
    }

    #[test]
    fn threshold_is_inclusive() {
        let mut tracker = UsageTracker::new(100).with_estimator(one_token_per_char());
        let usage = tracker.record_usage(&[Message::user("x".repeat(75))], &[]);
        assert_eq!(usage.percent_used, 75.0);
        assert!(tracker.needs_compression());
    }

    #[test]
    fn custom_threshold() {
        let mut tracker = UsageTracker::new(100)
            .with_estimator(one_token_per_char())
            .with_threshold_percent(90.0);
        tracker.record_usage(&[Message::user("x".repeat(80))], &[]);
        assert!(!tracker.needs_compression());
    }

    #[test]
    fn sections_split_system_conversation_tools() {
        let mut tracker = UsageTracker::new(1_000).with_estimator(one_token_per_char());
        let turns = vec![Message::system("sys"), Message::user("hello")];
        let tools = vec![ToolDef::new("t", "d", serde_json::json!({}))];
        let usage = tracker.record_usage(&turns, &tools);
        assert_eq!(usage.sections.system, 3);
        assert_eq!(usage.sections.conversation, 5);
        assert!(usage.sections.tools > 0);
        assert_eq!(
            usage.total,
            usage.sections.system + usage.sections.conversation + usage.sections.tools
        );
        assert_eq!(usage.remaining, 1_000 - usage.total);
    }

    #[test]
    fn estimator_failure_fails_closed() {
        let mut tracker = UsageTracker::new(1_000).with_estimator(Arc::new(FailingEstimator));
        let usage = tracker.record_usage(&[Message::user("hi")], &[]);
        assert!(usage.estimate_failed);
        assert!(tracker.needs_compression());
        assert!(tracker.summary().contains("assuming the context is full"));
    }

    #[test]
    fn nothing_recorded_means_no_compression() {
        let tracker = UsageTracker::new(1_000);
        assert!(!tracker.needs_compression());
        assert!(tracker.summary().contains("no usage recorded"));
    }

    #[test]
    fn set_ceiling_changes_percentage() {
        let mut tracker = UsageTracker::new(1_000).with_estimator(one_token_per_char());
        let turns = vec![Message::user("x".repeat(500))];
        tracker.record_usage(&turns, &[]);
        assert!(!tracker.needs_compression());

        tracker.set_ceiling(600);
        tracker.record_usage(&turns, &[]);
        assert!(tracker.needs_compression());
    }

    #[test]
    fn summary_bar_has_fixed_width() {
        let mut tracker = UsageTracker::new(100).with_estimator(one_token_per_char());
        tracker.record_usage(&[Message::user("x".repeat(50))], &[]);
        let summary = tracker.summary();
        let bar = summary.split('[').nth(1).unwrap().split(']').next().unwrap();
        assert_eq!(bar.chars().count(), BAR_WIDTH);
        assert_eq!(bar.matches('#').count(), 10);
        assert!(!summary.contains("warning"));
    }

    #[test]
    fn summary_warns_near_limit() {
        let mut tracker = UsageTracker::new(100).with_estimator(one_token_per_char());
        tracker.record_usage(&[Message::user("x".repeat(95))], &[]);
        assert!(tracker.summary().contains("nearly full"));

        tracker.record_usage(&[Message::user("x".repeat(80))], &[]);
        assert!(!tracker.summary().contains("nearly full"));
    }

    #[test]
    fn over_ceiling_bar_is_capped() {
        let mut tracker = UsageTracker::new(10).with_estimator(one_token_per_char());
        tracker.record_usage(&[Message::user("x".repeat(50))], &[]);
        let summary = tracker.summary();
        assert!(summary.contains(&"#".repeat(BAR_WIDTH)));
    }

    #[test]
    fn reset_clears_state() {
        let mut tracker = UsageTracker::new(10).with_estimator(one_token_per_char());
        tracker.record_usage(&[Message::user("x".repeat(50))], &[]);
        assert!(tracker.needs_compression());
        tracker.reset();
        assert!(!tracker.needs_compression());
    }
}
