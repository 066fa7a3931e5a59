//! Token estimation.
//!
//! Exact counts need the provider's tokenizer; the engine only needs a
//! consistent estimate. [`TokenEstimator`] is the seam, and
//! [`CharRatioEstimator`] is the default: serialized characters divided by a
//! (possibly calibrated) chars-per-token ratio.

use crate::error::EstimateError;
use crate::{Message, ToolDef};

/// Default characters per token (conservative estimate for English text).
/// Most tokenizers average 3-4 chars per token; we use 3.5 as a middle ground.
pub const DEFAULT_CHARS_PER_TOKEN: f64 = 3.5;

/// Converts turns plus a tool schema into an estimated token count.
pub trait TokenEstimator: Send + Sync {
    /// Estimate tokens for `turns` and the tool definitions sent alongside them.
    fn estimate(&self, turns: &[Message], tool_schema: &[ToolDef]) -> Result<usize, EstimateError>;

    /// Estimator name for logging.
    fn name(&self) -> &str;
}

/// Character-count based estimator.
#[derive(Debug, Clone)]
pub struct CharRatioEstimator {
    chars_per_token: f64,
}

impl Default for CharRatioEstimator {
    fn default() -> Self {
        Self {
            chars_per_token: DEFAULT_CHARS_PER_TOKEN,
        }
    }
}

impl CharRatioEstimator {
    /// Use a calibrated chars-per-token ratio from historical API usage.
    /// Pass `None` to use the default.
    pub fn with_calibration(calibrated_cpt: Option<f64>) -> Self {
        Self {
            chars_per_token: calibrated_cpt
                .filter(|c| c.is_finite() && *c > 0.0)
                .unwrap_or(DEFAULT_CHARS_PER_TOKEN),
        }
    }

    pub fn chars_per_token(&self) -> f64 {
        self.chars_per_token
    }

    /// Estimate tokens for a single piece of text.
    pub fn estimate_text(&self, text: &str) -> usize {
        (text.len() as f64 / self.chars_per_token).ceil() as usize
    }
}

/// Characters a turn contributes: its content plus any tool-call payloads.
pub(crate) fn turn_chars(turn: &Message) -> usize {
    let calls: usize = turn.tool_calls.as_ref().map_or(0, |calls| {
        calls
            .iter()
            .map(|c| c.function.name.len() + c.function.arguments.len())
            .sum()
    });
    turn.text().len() + calls
}

impl TokenEstimator for CharRatioEstimator {
    fn estimate(&self, turns: &[Message], tool_schema: &[ToolDef]) -> Result<usize, EstimateError> {
        let mut total_chars: usize = turns.iter().map(turn_chars).sum();
        if !tool_schema.is_empty() {
            let schema = serde_json::to_string(tool_schema)
                .map_err(|e| EstimateError(format!("failed to serialize tool schema: {e}")))?;
            total_chars += schema.len();
        }
        Ok((total_chars as f64 / self.chars_per_token).ceil() as usize)
    }

    fn name(&self) -> &str {
        "char_ratio"
    }
}
