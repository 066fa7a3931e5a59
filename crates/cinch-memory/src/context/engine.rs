//! The compression engine.
//!
//! One [`CompressionEngine::compress`] call turns an over-budget transcript
//! into a smaller one:
//!
//! 1. Skip entirely when the transcript already fits the target.
//! 2. Set aside the leading system turn and the output of earlier passes.
//! 3. Classify every remaining turn and protect the recent window.
//! 4. Record structured facts, then run the rewrite strategies the overage
//!    calls for on the older region.
//! 5. Re-classify and partition the older region into keep, archive and
//!    discard, moving tool calls and their results together.
//! 6. Chunk the archive set, summarize each chunk (cached), write it to the
//!    archive store.
//! 7. Assemble system turn, persistent memory, rolling summary and kept
//!    turns.
//!
//! Only configuration errors are returned as `Err`. Estimator, summarizer and
//! store failures degrade and are reported through
//! [`CompressionOutcome::warnings`].

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::archive::recall::{DEFAULT_RECALL_LIMIT, RECALL_TOOL_NAME, recall};
use crate::archive::{ArchiveFacts, ArchiveStore, EntryKind, PendingEntry, generate_session_id};
use crate::config::CompressionConfig;
use crate::context::cache::{SummaryCache, content_key};
use crate::context::chunker::chunk_turns;
use crate::context::classifier::{
    Category, Classification, Classify, HeuristicClassifier, Importance, classify_all,
};
use crate::context::estimator::{CharRatioEstimator, TokenEstimator};
use crate::context::keywords::extract_keywords;
use crate::context::layout::{
    TranscriptLayout, earlier_summary_body, earlier_summary_turn, is_persistent_memory,
    persistent_memory_turn,
};
use crate::context::policy::RetentionPolicy;
use crate::context::strategies::{
    COMPRESS_CODE_BLOCKS, MERGE_TOOL_RESULTS, REMOVE_LOW_IMPORTANCE, SUMMARIZE_LONG_MESSAGES,
    compress_code_blocks, merge_tool_results, remove_low_importance, summarize_long_messages,
};
use crate::context::summarizer::{
    CHUNK_SUMMARY_PROMPT, ROLLING_SUMMARY_PROMPT, Summarizer, build_rolling_request,
    render_transcript, template_summary,
};
use crate::error::CompressError;
use crate::events::{CompressionEvent, EventHandler, NoopHandler};
use crate::{Message, MessageRole, truncate_chars};

/// Prefix of the line closing every rolling summary.
pub const ARCHIVE_POINTER_PREFIX: &str = "Archived so far:";

/// Length cap for task descriptions captured as facts.
const TASK_MAX_CHARS: usize = 160;

// ── Outcome ────────────────────────────────────────────────────────

/// Result of one compression pass.
#[derive(Debug, Clone, PartialEq)]
pub struct CompressionOutcome {
    /// The new transcript.
    pub turns: Vec<Message>,
    pub original_tokens: usize,
    pub compressed_tokens: usize,
    /// Chunks successfully written to the archive store.
    pub archived_chunk_count: usize,
    /// `compressed_tokens / original_tokens`; 1.0 for a no-op.
    pub compression_ratio: f64,
    /// Strategies that changed something, in the order they ran.
    pub strategies_applied: Vec<String>,
    pub injected_persistent_memory: bool,
    /// Some archived material may not have reached durable storage.
    pub archive_failed: bool,
    pub warnings: Vec<String>,
    pub summary_cache_hits: usize,
    /// Turns dropped with no archive record.
    pub discarded_count: usize,
}

impl CompressionOutcome {
    fn unchanged(turns: &[Message], tokens: usize) -> Self {
        Self {
            turns: turns.to_vec(),
            original_tokens: tokens,
            compressed_tokens: tokens,
            archived_chunk_count: 0,
            compression_ratio: 1.0,
            strategies_applied: Vec::new(),
            injected_persistent_memory: false,
            archive_failed: false,
            warnings: Vec::new(),
            summary_cache_hits: 0,
            discarded_count: 0,
        }
    }

    /// Whether the pass left the transcript untouched.
    pub fn is_noop(&self) -> bool {
        self.original_tokens == self.compressed_tokens && self.compression_ratio == 1.0
    }

    /// One-line notice for the user.
    pub fn notice(&self) -> String {
        format!(
            "compressed {}→{} tokens, archived {} chunks",
            self.original_tokens, self.compressed_tokens, self.archived_chunk_count
        )
    }
}

// ── Engine ─────────────────────────────────────────────────────────

/// Runs compression passes and retrieval against one archive store.
///
/// Each engine owns its summary cache; subagents get their own engine.
/// A pass must not be re-entered while one is in flight, which `&mut self`
/// enforces.
pub struct CompressionEngine {
    classifier: Box<dyn Classify>,
    estimator: Arc<dyn TokenEstimator>,
    summarizer: Option<Box<dyn Summarizer>>,
    store: Box<dyn ArchiveStore>,
    cache: SummaryCache,
    session_id: String,
    events: Box<dyn EventHandler>,
    recall_limit: usize,
}

impl CompressionEngine {
    /// An engine with the heuristic classifier, the default estimator and
    /// no summarizer.
    pub fn new(store: Box<dyn ArchiveStore>) -> Self {
        Self {
            classifier: Box::new(HeuristicClassifier::new()),
            estimator: Arc::new(CharRatioEstimator::default()),
            summarizer: None,
            store,
            cache: SummaryCache::default(),
            session_id: generate_session_id(),
            events: Box::new(NoopHandler),
            recall_limit: DEFAULT_RECALL_LIMIT,
        }
    }

    pub fn with_classifier(mut self, classifier: Box<dyn Classify>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn with_summarizer(mut self, summarizer: Box<dyn Summarizer>) -> Self {
        self.summarizer = Some(summarizer);
        self
    }

    pub fn with_event_handler(mut self, events: Box<dyn EventHandler>) -> Self {
        self.events = events;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = SummaryCache::new(capacity);
        self
    }

    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_recall_limit(mut self, limit: usize) -> Self {
        self.recall_limit = limit;
        self
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn store(&self) -> &dyn ArchiveStore {
        self.store.as_ref()
    }

    pub fn store_mut(&mut self) -> &mut dyn ArchiveStore {
        self.store.as_mut()
    }

    /// `(hits, misses, entries)` of the summary cache.
    pub fn cache_stats(&self) -> (u64, u64, usize) {
        self.cache.stats()
    }

    /// Estimate with the configured estimator, falling back to the default
    /// ratio estimator on failure. Returns the count and whether it failed.
    fn estimate(&self, turns: &[Message], warnings: &mut Vec<String>) -> (usize, bool) {
        match self.estimator.estimate(turns, &[]) {
            Ok(tokens) => (tokens, false),
            Err(e) => {
                warn!("{e}; falling back to character estimate");
                warnings.push(format!("{e}; used character-ratio fallback"));
                let tokens = CharRatioEstimator::default()
                    .estimate(turns, &[])
                    .unwrap_or(usize::MAX);
                (tokens, true)
            }
        }
    }

    fn archive_failure(&self, message: String, warnings: &mut Vec<String>) {
        warn!("{message}");
        self.events
            .on_event(&CompressionEvent::ArchiveFailed { error: &message });
        warnings.push(message);
    }

    /// Run one compression pass.
    pub async fn compress(
        &mut self,
        turns: &[Message],
        config: &CompressionConfig,
    ) -> Result<CompressionOutcome, CompressError> {
        config.validate()?;
        if turns.is_empty() {
            return Ok(CompressionOutcome::unchanged(turns, 0));
        }

        let mut warnings = Vec::new();
        let (original_tokens, estimate_failed) = self.estimate(turns, &mut warnings);
        if original_tokens <= config.target_tokens && !estimate_failed {
            debug!(
                "Transcript fits: ~{original_tokens} <= {} tokens; nothing to do",
                config.target_tokens
            );
            return Ok(CompressionOutcome::unchanged(turns, original_tokens));
        }

        self.events.on_event(&CompressionEvent::Started {
            original_tokens,
            target_tokens: config.target_tokens,
            turns: turns.len(),
        });

        // ── Set aside the system turn and earlier pass output ──
        let (system, rest) = match turns.split_first() {
            Some((first, rest)) if first.role == MessageRole::System => (Some(first.clone()), rest),
            _ => (None, turns),
        };
        let mut previous_summaries: Vec<String> = Vec::new();
        let mut working: Vec<Message> = Vec::with_capacity(rest.len());
        for turn in rest {
            if is_persistent_memory(turn) {
                continue;
            }
            if let Some(body) = earlier_summary_body(turn) {
                previous_summaries.push(strip_archive_pointer(body));
                continue;
            }
            working.push(turn.clone());
        }

        // ── Classify and protect the recent window ──
        let classifications = classify_all(self.classifier.as_ref(), &working);
        let window_start = recent_window_start(&working, config.min_recent_messages);
        let recent = working.split_off(window_start);
        let mut older = working;
        let mut older_classes = classifications;
        older_classes.truncate(window_start);
        debug!(
            "Recent window: {} turn(s); older region: {} turn(s)",
            recent.len(),
            older.len()
        );

        let facts = collect_facts(&older, &older_classes);
        if !facts.is_empty()
            && let Err(e) = self.store.record_facts(facts).await
        {
            self.archive_failure(format!("failed to record facts: {e}"), &mut warnings);
        }

        let policy = RetentionPolicy::standard(config.policy_context());

        // ── Rewrite strategies ──
        let overage = original_tokens as f64 / config.target_tokens as f64;
        let strategies = &config.strategies;
        let mut applied: Vec<String> = Vec::new();
        let mut discarded_count = 0;
        let mut summary_cache_hits = 0;

        if strategies.remove_low_importance.fires(overage) {
            let removed = remove_low_importance(&mut older, &mut older_classes, &policy);
            if removed > 0 {
                discarded_count += removed;
                self.record_strategy(&mut applied, REMOVE_LOW_IMPORTANCE, removed);
            }
        }

        if strategies.compress_code_blocks.fires(overage) {
            let mut rewritten = 0;
            for (turn, class) in older.iter_mut().zip(&older_classes) {
                if class.importance < Importance::Critical {
                    rewritten +=
                        compress_code_blocks(std::slice::from_mut(turn), config.small_code_chars);
                }
            }
            if rewritten > 0 {
                self.record_strategy(&mut applied, COMPRESS_CODE_BLOCKS, rewritten);
            }
        }

        if strategies.summarize_long_messages.fires(overage)
            && let Some(summarizer) = self.summarizer.as_deref()
        {
            let report = summarize_long_messages(
                &mut older,
                &older_classes,
                summarizer,
                &mut self.cache,
                config.long_message_chars,
            )
            .await;
            summary_cache_hits += report.cache_hits;
            warnings.extend(report.failures);
            if report.rewritten > 0 {
                self.record_strategy(&mut applied, SUMMARIZE_LONG_MESSAGES, report.rewritten);
            }
        }

        if strategies.merge_tool_results.fires(overage) {
            let merged = merge_tool_results(&mut older);
            if merged > 0 {
                self.record_strategy(&mut applied, MERGE_TOOL_RESULTS, merged);
            }
        }

        // ── Re-partition the rewritten region ──
        let classes = classify_all(self.classifier.as_ref(), &older);
        let mut partition = policy.partition(&older, &classes, 0..older.len());
        let rebound = partition.bind_tool_pairs(&older);
        if rebound > 0 {
            debug!("Moved {rebound} turn(s) to keep tool calls with their results");
        }
        discarded_count += partition.discard.len();
        if !partition.discard.is_empty() {
            debug!("Discarding {} low-value turn(s)", partition.discard.len());
        }

        // ── Chunk, summarize and archive ──
        let archive_classes: Vec<Classification> = partition
            .archive
            .iter()
            .map(|&i| classes[i].clone())
            .collect();
        let chunks = chunk_turns(&archive_classes, config.max_chunk_turns);
        let mut chunk_summaries: Vec<String> = Vec::with_capacity(chunks.len());
        let mut archived_chunk_count = 0;
        let mut archive_failed = false;

        for chunk in &chunks {
            let owned: Vec<Message> = chunk
                .range
                .clone()
                .map(|k| older[partition.archive[k]].clone())
                .collect();
            let member_classes = &archive_classes[chunk.range.clone()];

            let raw_content = render_transcript(&owned);
            let (summary, hit) = self.summarize_chunk(&owned, &raw_content, &mut warnings).await;
            if hit {
                summary_cache_hits += 1;
            }

            let mut related_files: Vec<String> = Vec::new();
            for file in member_classes.iter().flat_map(|c| &c.extracted.files) {
                if !related_files.contains(file) {
                    related_files.push(file.clone());
                }
            }
            let keywords = extract_keywords(owned.iter().map(Message::text), &related_files);
            let importance = member_classes
                .iter()
                .map(|c| c.importance)
                .max()
                .unwrap_or(Importance::Medium);

            let pending = PendingEntry {
                kind: EntryKind::ConversationChunk,
                raw_content,
                summary: summary.clone(),
                keywords,
                related_files,
                timestamp: Utc::now(),
                session_id: self.session_id.clone(),
                importance,
                turn_count: owned.len(),
            };
            match self.store.archive(pending).await {
                Ok(entry) => {
                    archived_chunk_count += 1;
                    self.events.on_event(&CompressionEvent::ChunkArchived {
                        id: &entry.id,
                        turns: entry.turn_count,
                        importance: entry.importance,
                    });
                }
                Err(e) => {
                    archive_failed = true;
                    self.archive_failure(
                        format!("failed to archive a {}-turn chunk: {e}", owned.len()),
                        &mut warnings,
                    );
                }
            }
            chunk_summaries.push(summary);
        }

        // ── Rolling summary and persistent memory ──
        let summary_turn = self
            .rolling_summary(&previous_summaries, &chunk_summaries, &mut warnings)
            .await
            .map(|body| earlier_summary_turn(&body));

        let mut memory_turn = None;
        if config.memory_budget_tokens > 0 {
            match self
                .store
                .build_context_summary(config.memory_budget_tokens)
                .await
            {
                Ok(memory) if !memory.trim().is_empty() => {
                    memory_turn = Some(persistent_memory_turn(&memory));
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to build persistent memory: {e}");
                    warnings.push(format!("failed to build persistent memory: {e}"));
                }
            }
        }
        let injected_persistent_memory = memory_turn.is_some();

        // ── Assemble ──
        let mut kept: Vec<Message> = partition.keep.iter().map(|&i| older[i].clone()).collect();
        kept.extend(recent);
        let layout = TranscriptLayout {
            system,
            memory: memory_turn,
            summary: summary_turn,
            kept,
        };
        if let Ok(breakdown) = layout.breakdown(self.estimator.as_ref()) {
            debug!("{}", breakdown.to_log_string());
        }
        let output = layout.into_turns();

        if let Err(e) = self.store.save().await {
            archive_failed = true;
            self.archive_failure(format!("failed to save archive: {e}"), &mut warnings);
        }

        let (compressed_tokens, _) = self.estimate(&output, &mut warnings);
        let compression_ratio = if original_tokens == 0 {
            1.0
        } else {
            compressed_tokens as f64 / original_tokens as f64
        };

        self.events.on_event(&CompressionEvent::Finished {
            original_tokens,
            compressed_tokens,
            archived_chunks: archived_chunk_count,
            discarded: discarded_count,
        });
        info!(
            "Compression pass: ~{original_tokens} -> ~{compressed_tokens} tokens ({:.0}%), {archived_chunk_count} chunk(s) archived",
            compression_ratio * 100.0
        );

        Ok(CompressionOutcome {
            turns: output,
            original_tokens,
            compressed_tokens,
            archived_chunk_count,
            compression_ratio,
            strategies_applied: applied,
            injected_persistent_memory,
            archive_failed,
            warnings,
            summary_cache_hits,
            discarded_count,
        })
    }

    fn record_strategy(&self, applied: &mut Vec<String>, name: &str, affected: usize) {
        self.events
            .on_event(&CompressionEvent::StrategyApplied { name, affected });
        applied.push(name.to_string());
    }

    /// Summarize one chunk: cache, then LLM, then template. Returns the
    /// summary and whether it came from the cache.
    async fn summarize_chunk(
        &mut self,
        members: &[Message],
        raw_content: &str,
        warnings: &mut Vec<String>,
    ) -> (String, bool) {
        let Some(summarizer) = self.summarizer.as_deref() else {
            return (template_summary(members), false);
        };
        let key = content_key(CHUNK_SUMMARY_PROMPT, raw_content);
        if let Some(cached) = self.cache.get(&key) {
            return (cached, true);
        }
        match summarizer.summarize(CHUNK_SUMMARY_PROMPT, raw_content).await {
            Ok(summary) if !summary.trim().is_empty() => {
                self.cache.put(key, summary.clone());
                (summary, false)
            }
            Ok(_) => {
                warn!("Chunk summary was empty; using template");
                warnings.push("chunk summary was empty; used template".to_string());
                (template_summary(members), false)
            }
            Err(e) => {
                warn!("Chunk summary failed: {e}; using template");
                warnings.push(format!("chunk summary failed: {e}; used template"));
                (template_summary(members), false)
            }
        }
    }

    /// Body of the `[Earlier Conversation Summary]` turn, merging any
    /// summaries from earlier passes. `None` when there is nothing to say.
    async fn rolling_summary(
        &self,
        previous: &[String],
        chunk_summaries: &[String],
        warnings: &mut Vec<String>,
    ) -> Option<String> {
        let previous: Vec<&str> = previous
            .iter()
            .map(String::as_str)
            .filter(|s| !s.is_empty())
            .collect();
        if previous.is_empty() && chunk_summaries.is_empty() {
            return None;
        }
        let existing = (!previous.is_empty()).then(|| previous.join("\n\n"));
        let new_material: String = chunk_summaries
            .iter()
            .map(|s| format!("- {s}\n"))
            .collect();

        let merged = if chunk_summaries.is_empty() {
            existing.clone().unwrap_or_default()
        } else {
            let llm = match self.summarizer.as_deref() {
                Some(summarizer) => {
                    let request = build_rolling_request(existing.as_deref(), &new_material);
                    match summarizer.summarize(ROLLING_SUMMARY_PROMPT, &request).await {
                        Ok(s) if !s.trim().is_empty() => Some(s),
                        Ok(_) => {
                            warnings.push("rolling summary was empty; used chunk summaries".into());
                            None
                        }
                        Err(e) => {
                            warn!("Rolling summary failed: {e}; using chunk summaries");
                            warnings.push(format!(
                                "rolling summary failed: {e}; used chunk summaries"
                            ));
                            None
                        }
                    }
                }
                None => None,
            };
            llm.unwrap_or_else(|| match &existing {
                Some(existing) => format!("{existing}\n{}", new_material.trim_end()),
                None => new_material.trim_end().to_string(),
            })
        };

        let count = self.store.entry_count();
        Some(format!(
            "{}\n\n{ARCHIVE_POINTER_PREFIX} {count} chunk(s). Call {RECALL_TOOL_NAME} with keywords or file paths to retrieve details.",
            merged.trim()
        ))
    }

    /// Search the archive and render the best matches as a
    /// `[Retrieved Context]` block. `None` when nothing matches or the
    /// store fails.
    pub async fn retrieve(&self, query: &str) -> Option<String> {
        self.retrieve_top(query, self.recall_limit).await
    }

    /// [`retrieve`](Self::retrieve) with an explicit result count.
    pub async fn retrieve_top(&self, query: &str, k: usize) -> Option<String> {
        match recall(self.store.as_ref(), query, k).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Archive search failed: {e}");
                None
            }
        }
    }
}

// ── Helpers ────────────────────────────────────────────────────────

/// Start index of the protected recent window: the last `min_recent`
/// turns, extended backwards so it never opens on a tool result.
fn recent_window_start(turns: &[Message], min_recent: usize) -> usize {
    let mut start = turns.len().saturating_sub(min_recent);
    while start > 0 && start < turns.len() && turns[start].role == MessageRole::Tool {
        start -= 1;
    }
    start
}

/// Drop the trailing archive pointer from a previous summary body.
fn strip_archive_pointer(body: &str) -> String {
    body.lines()
        .filter(|line| !line.starts_with(ARCHIVE_POINTER_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// Structured facts from classified turns.
fn collect_facts(turns: &[Message], classes: &[Classification]) -> ArchiveFacts {
    let mut facts = ArchiveFacts::default();
    for (turn, class) in turns.iter().zip(classes) {
        let extracted = &class.extracted;
        if let Some(goal) = &extracted.goal {
            facts.goal = Some(goal.clone());
        }
        if class.has(Category::UserRequest) && turn.role == MessageRole::User {
            let first_line = turn.text().lines().next().unwrap_or_default().trim();
            if !first_line.is_empty() {
                facts.tasks.push(truncate_chars(first_line, TASK_MAX_CHARS));
            }
        }
        facts.preferences.extend(extracted.preference.clone());
        facts.decisions.extend(extracted.decision.clone());
        facts.errors.extend(extracted.error.clone());
    }
    facts
}
