//! Lossy rewrite strategies applied to the non-recent region of a
//! transcript before it is re-partitioned.
//!
//! Each strategy is toggled on its own and fires only when the input is at
//! least `trigger_ratio` times over the target budget. They run in a fixed
//! order: low-importance removal, code-block signature compression,
//! long-message summarization, then adjacent tool-result merging. A strategy
//! is reported as applied only if it actually changed something.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::context::cache::{SummaryCache, content_key};
use crate::context::classifier::{Classification, Importance};
use crate::context::policy::{Disposition, RetentionPolicy, ToolPairing};
use crate::context::summarizer::{LONG_MESSAGE_PROMPT, Summarizer};
use crate::{Message, MessageRole};

pub const REMOVE_LOW_IMPORTANCE: &str = "remove_low_importance";
pub const COMPRESS_CODE_BLOCKS: &str = "compress_code_blocks";
pub const SUMMARIZE_LONG_MESSAGES: &str = "summarize_long_messages";
pub const MERGE_TOOL_RESULTS: &str = "merge_tool_results";

/// Separator placed between merged tool outputs.
pub const TOOL_RESULT_DELIMITER: &str = "\n\n--- next tool result ---\n\n";

/// Fenced blocks shorter than this many lines are left alone.
const MIN_CODE_BLOCK_LINES: usize = 10;

/// Declarations indented deeper than this are not top-level.
const MAX_DECLARATION_INDENT: usize = 4;

/// Modifiers skipped before looking for a declaration keyword.
const DECLARATION_MODIFIERS: &[&str] = &[
    "pub(crate) ",
    "pub(super) ",
    "pub ",
    "export default ",
    "export ",
    "async ",
    "unsafe ",
    "const ",
    "abstract ",
    "public ",
    "private ",
    "protected ",
    "static ",
];

const DECLARATION_KEYWORDS: &[&str] = &[
    "fn ", "struct ", "enum ", "trait ", "impl ", "impl<", "type ", "mod ", "class ", "def ",
    "function ", "interface ", "func ",
];

/// Toggle plus over-budget trigger for one strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    /// Fires when `original_tokens / target_tokens >= trigger_ratio`.
    pub trigger_ratio: f64,
}

fn enabled_by_default() -> bool {
    true
}

impl StrategyConfig {
    pub fn new(trigger_ratio: f64) -> Self {
        Self {
            enabled: true,
            trigger_ratio,
        }
    }

    pub fn disabled(self) -> Self {
        Self {
            enabled: false,
            ..self
        }
    }

    /// Whether the strategy should run at the given over-budget ratio.
    pub fn fires(&self, overage_ratio: f64) -> bool {
        self.enabled && overage_ratio >= self.trigger_ratio
    }
}

/// Configuration for all four strategies.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategySet {
    pub remove_low_importance: StrategyConfig,
    pub compress_code_blocks: StrategyConfig,
    pub summarize_long_messages: StrategyConfig,
    pub merge_tool_results: StrategyConfig,
}

impl Default for StrategySet {
    fn default() -> Self {
        Self {
            remove_low_importance: StrategyConfig::new(1.5),
            compress_code_blocks: StrategyConfig::new(2.0),
            summarize_long_messages: StrategyConfig::new(2.5),
            merge_tool_results: StrategyConfig::new(1.0),
        }
    }
}

impl StrategySet {
    /// Every strategy switched off.
    pub fn none() -> Self {
        let d = Self::default();
        Self {
            remove_low_importance: d.remove_low_importance.disabled(),
            compress_code_blocks: d.compress_code_blocks.disabled(),
            summarize_long_messages: d.summarize_long_messages.disabled(),
            merge_tool_results: d.merge_tool_results.disabled(),
        }
    }

    pub(crate) fn trigger_ratios(&self) -> [f64; 4] {
        [
            self.remove_low_importance.trigger_ratio,
            self.compress_code_blocks.trigger_ratio,
            self.summarize_long_messages.trigger_ratio,
            self.merge_tool_results.trigger_ratio,
        ]
    }
}

// ── a. Low-importance removal ──────────────────────────────────────

/// Drop noise/low turns that no keep rule protects. Returns the number removed.
///
/// A tool call and its results are protected together: if any of them is
/// kept, none of them is removed.
pub fn remove_low_importance(
    turns: &mut Vec<Message>,
    classifications: &mut Vec<Classification>,
    policy: &RetentionPolicy,
) -> usize {
    let before = turns.len();
    let kept: Vec<bool> = turns
        .iter()
        .zip(classifications.iter())
        .map(|(turn, class)| policy.decide(class, turn).0 == Disposition::Keep)
        .collect();
    let pairing = ToolPairing::scan(turns);
    let protected: Vec<bool> = (0..before)
        .map(|i| {
            kept[i]
                || pairing
                    .group_of(i)
                    .is_some_and(|group| group.iter().any(|&j| kept[j]))
        })
        .collect();

    let mut kept_turns = Vec::with_capacity(before);
    let mut kept_classes = Vec::with_capacity(before);
    for (i, (turn, class)) in turns.drain(..).zip(classifications.drain(..)).enumerate() {
        let removable = class.importance <= Importance::Low && !protected[i];
        if !removable {
            kept_turns.push(turn);
            kept_classes.push(class);
        }
    }
    *turns = kept_turns;
    *classifications = kept_classes;
    before - turns.len()
}

// ── b. Code-block signature compression ────────────────────────────

/// Signature line for a top-level declaration, or `None`.
fn declaration_signature(line: &str) -> Option<String> {
    let indent = line.len() - line.trim_start().len();
    if indent > MAX_DECLARATION_INDENT {
        return None;
    }
    let trimmed = line.trim();
    let mut rest = trimmed;
    loop {
        match DECLARATION_MODIFIERS.iter().find_map(|m| rest.strip_prefix(*m)) {
            Some(stripped) => rest = stripped,
            None => break,
        }
    }
    if !DECLARATION_KEYWORDS.iter().any(|k| rest.starts_with(*k)) {
        return None;
    }
    let signature = trimmed
        .trim_end_matches(['{', ':', ';'])
        .trim_end()
        .to_string();
    Some(signature)
}

/// Replace one fenced block body with its declaration list, if it has any.
fn compress_block(body: &[&str]) -> Option<String> {
    if body.len() < MIN_CODE_BLOCK_LINES {
        return None;
    }
    let declarations: Vec<String> = body
        .iter()
        .filter_map(|line| declaration_signature(line))
        .collect();
    if declarations.is_empty() {
        return None;
    }
    let mut out = format!(
        "[code block: {} declarations, {} lines elided]",
        declarations.len(),
        body.len()
    );
    for declaration in declarations {
        out.push('\n');
        out.push_str(&declaration);
    }
    Some(out)
}

/// Rewrite every large fenced code block in `text` into a declaration list.
///
/// Returns `None` when nothing changed. Unterminated fences are left as-is.
pub fn compress_code_blocks_in(text: &str) -> Option<String> {
    let lines: Vec<&str> = text.lines().collect();
    let mut out: Vec<String> = Vec::with_capacity(lines.len());
    let mut changed = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        if !line.trim_start().starts_with("```") {
            out.push(line.to_string());
            i += 1;
            continue;
        }
        let close = (i + 1..lines.len()).find(|&j| lines[j].trim_start().starts_with("```"));
        let Some(close) = close else {
            out.extend(lines[i..].iter().map(|l| l.to_string()));
            break;
        };
        match compress_block(&lines[i + 1..close]) {
            Some(replacement) => {
                out.push(replacement);
                changed = true;
            }
            None => out.extend(lines[i..=close].iter().map(|l| l.to_string())),
        }
        i = close + 1;
    }

    changed.then(|| out.join("\n"))
}

/// Compress code blocks in turns longer than `min_chars`. Returns turns rewritten.
pub fn compress_code_blocks(turns: &mut [Message], min_chars: usize) -> usize {
    let mut rewritten = 0;
    for turn in turns.iter_mut() {
        if turn.text().len() <= min_chars {
            continue;
        }
        if let Some(compressed) = compress_code_blocks_in(turn.text()) {
            *turn = turn.with_content(compressed);
            rewritten += 1;
        }
    }
    rewritten
}

// ── c. Long-message summarization ──────────────────────────────────

/// What [`summarize_long_messages`] did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LongMessageReport {
    /// Turns replaced by a condensation.
    pub rewritten: usize,
    /// Condensations served from the cache.
    pub cache_hits: usize,
    /// One warning per failed call; those turns kept their original content.
    pub failures: Vec<String>,
}

/// Condense every non-critical turn longer than `threshold_chars`.
///
/// A failed or empty condensation leaves the original content untouched.
pub async fn summarize_long_messages(
    turns: &mut [Message],
    classifications: &[Classification],
    summarizer: &dyn Summarizer,
    cache: &mut SummaryCache,
    threshold_chars: usize,
) -> LongMessageReport {
    let mut report = LongMessageReport::default();
    for (turn, class) in turns.iter_mut().zip(classifications) {
        if turn.text().len() <= threshold_chars
            || class.importance == Importance::Critical
            || turn.role == MessageRole::System
        {
            continue;
        }
        let key = content_key(LONG_MESSAGE_PROMPT, turn.text());
        if let Some(condensed) = cache.get(&key) {
            *turn = turn.with_content(condensed);
            report.rewritten += 1;
            report.cache_hits += 1;
            continue;
        }
        match summarizer.summarize(LONG_MESSAGE_PROMPT, turn.text()).await {
            Ok(condensed) if !condensed.trim().is_empty() => {
                debug!(
                    "Condensed {} turn: {} -> {} chars",
                    turn.role,
                    turn.text().len(),
                    condensed.len()
                );
                cache.put(key, condensed.clone());
                *turn = turn.with_content(condensed);
                report.rewritten += 1;
            }
            Ok(_) => {
                warn!("Long-message summary was empty; keeping original");
                report
                    .failures
                    .push("long-message summary was empty; original kept".to_string());
            }
            Err(e) => {
                warn!("Long-message summary failed: {e}; keeping original");
                report
                    .failures
                    .push(format!("long-message summary failed: {e}; original kept"));
            }
        }
    }
    report
}

// ── d. Adjacent tool-result merging ────────────────────────────────

/// Merge runs of consecutive tool turns into one. Returns the number of
/// turns absorbed into a predecessor.
///
/// The merged turn keeps the first turn's call id and tool name.
pub fn merge_tool_results(turns: &mut Vec<Message>) -> usize {
    let before = turns.len();
    let mut merged: Vec<Message> = Vec::with_capacity(before);
    for turn in turns.drain(..) {
        if turn.role == MessageRole::Tool
            && let Some(last) = merged.last_mut()
            && last.role == MessageRole::Tool
        {
            let joined = format!("{}{TOOL_RESULT_DELIMITER}{}", last.text(), turn.text());
            *last = last.with_content(joined);
            continue;
        }
        merged.push(turn);
    }
    *turns = merged;
    before - turns.len()
}
