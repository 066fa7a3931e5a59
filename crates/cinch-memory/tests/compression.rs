//! Integration tests for compression passes.
//!
//! These run the full engine with the heuristic classifier against
//! synthetic transcripts, using in-memory stores and scripted summarizers.

use std::sync::{Arc, Mutex};

use cinch_memory::archive::store::JsonArchiveStore;
use cinch_memory::archive::{ArchiveEntry, ArchiveFuture, ArchiveStore, PendingEntry, rank_entries};
use cinch_memory::config::CompressionConfig;
use cinch_memory::context::engine::{ARCHIVE_POINTER_PREFIX, CompressionEngine};
use cinch_memory::context::estimator::TokenEstimator;
use cinch_memory::context::layout::{earlier_summary_body, is_earlier_summary, is_persistent_memory};
use cinch_memory::context::strategies::{SUMMARIZE_LONG_MESSAGES, StrategySet};
use cinch_memory::context::summarizer::{CHUNK_SUMMARY_PROMPT, Summarizer, SummaryFuture};
use cinch_memory::error::{ArchiveError, CompressError, ConfigError, EstimateError, SummarizeError};
use cinch_memory::events::{CompressionEvent, FnEventHandler};
use cinch_memory::{Message, MessageRole, ToolCall, ToolDef};

// ── Fixtures ─────────────────────────────────────────────────────────

const USER_PAD: &str = "Keep the public interface stable for downstream crates and update \
the documentation comments where the behaviour changes. ";

const ASSISTANT_PAD: &str = "The surrounding match arms were left untouched and the \
documentation comment now mentions the extra case. ";

fn user_turn(i: usize) -> Message {
    Message::user(format!(
        "Step {i}: extend the tokenizer in src/lexer.rs so that literal kind {i} is recognised. {}",
        USER_PAD.repeat(4)
    ))
}

fn assistant_turn(i: usize) -> Message {
    Message::assistant_text(format!(
        "Extended the lexer for literal kind {i}; the new branch sits next to the numeric handling. {}",
        ASSISTANT_PAD.repeat(4)
    ))
}

fn pairs(range: std::ops::Range<usize>) -> Vec<Message> {
    range.flat_map(|i| [user_turn(i), assistant_turn(i)]).collect()
}

/// System turn plus 20 conversation turns.
fn twenty_turns() -> Vec<Message> {
    let mut turns = vec![Message::system("You are a careful coding agent.")];
    turns.extend(pairs(0..10));
    turns
}

fn ephemeral_engine() -> CompressionEngine {
    CompressionEngine::new(Box::new(JsonArchiveStore::ephemeral()))
}

// ── Test doubles ─────────────────────────────────────────────────────

/// Records every prompt and answers deterministically.
#[derive(Default, Clone)]
struct ScriptedSummarizer {
    prompts: Arc<Mutex<Vec<String>>>,
}

impl ScriptedSummarizer {
    fn chunk_calls(&self) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.as_str() == CHUNK_SUMMARY_PROMPT)
            .count()
    }
}

impl Summarizer for ScriptedSummarizer {
    fn summarize<'a>(&'a self, prompt: &'a str, _content: &'a str) -> SummaryFuture<'a> {
        let n = {
            let mut prompts = self.prompts.lock().unwrap();
            prompts.push(prompt.to_string());
            prompts.len()
        };
        let reply = if prompt == CHUNK_SUMMARY_PROMPT {
            format!("Chunk summary {n}.")
        } else {
            "Rolling summary of the session.".to_string()
        };
        Box::pin(async move { Ok(reply) })
    }
}

struct FailingSummarizer;

impl Summarizer for FailingSummarizer {
    fn summarize<'a>(&'a self, _prompt: &'a str, _content: &'a str) -> SummaryFuture<'a> {
        Box::pin(async { Err(SummarizeError::Request("provider offline".into())) })
    }
}

struct FailingEstimator;

impl TokenEstimator for FailingEstimator {
    fn estimate(&self, _turns: &[Message], _tools: &[ToolDef]) -> Result<usize, EstimateError> {
        Err(EstimateError("tokenizer unavailable".into()))
    }

    fn name(&self) -> &str {
        "failing"
    }
}

/// Keeps archived entries in a shared vector; can be told to fail.
#[derive(Default)]
struct RecordingStore {
    entries: Arc<Mutex<Vec<ArchiveEntry>>>,
    fail_archive: bool,
    fail_save: bool,
}

impl ArchiveStore for RecordingStore {
    fn archive(&mut self, entry: PendingEntry) -> ArchiveFuture<'_, ArchiveEntry> {
        let result = if self.fail_archive {
            Err(ArchiveError::Unavailable("disk offline".into()))
        } else {
            let mut entries = self.entries.lock().unwrap();
            let entry = entry.into_entry(format!("ar-{:06}", entries.len() + 1));
            entries.push(entry.clone());
            Ok(entry)
        };
        Box::pin(async move { result })
    }

    fn search<'a>(&'a self, query: &'a str, k: usize) -> ArchiveFuture<'a, Vec<ArchiveEntry>> {
        let found = rank_entries(self.entries.lock().unwrap().iter(), query, k);
        Box::pin(async move { Ok(found) })
    }

    fn build_context_summary(&self, _token_budget: usize) -> ArchiveFuture<'_, String> {
        Box::pin(async { Ok(String::new()) })
    }

    fn record_facts(&mut self, _facts: cinch_memory::archive::ArchiveFacts) -> ArchiveFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn save(&mut self) -> ArchiveFuture<'_, ()> {
        let fail = self.fail_save;
        Box::pin(async move {
            if fail {
                Err(ArchiveError::Unavailable("disk offline".into()))
            } else {
                Ok(())
            }
        })
    }

    fn load(&mut self) -> ArchiveFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }

    fn entry_count(&self) -> usize {
        self.entries.lock().unwrap().len()
    }
}

// ── No-op and configuration ──────────────────────────────────────────

#[tokio::test]
async fn under_budget_is_identity() {
    let mut engine = ephemeral_engine();
    let turns = vec![Message::user("hello there, how are you?")];
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(500))
        .await
        .unwrap();
    assert_eq!(outcome.turns, turns);
    assert_eq!(outcome.compression_ratio, 1.0);
    assert!(outcome.strategies_applied.is_empty());
    assert_eq!(outcome.archived_chunk_count, 0);
    assert!(outcome.is_noop());
    assert_eq!(engine.store().entry_count(), 0);
}

#[tokio::test]
async fn empty_transcript_is_noop() {
    let mut engine = ephemeral_engine();
    let outcome = engine
        .compress(&[], &CompressionConfig::new(500))
        .await
        .unwrap();
    assert!(outcome.turns.is_empty());
    assert_eq!(outcome.compression_ratio, 1.0);
}

#[tokio::test]
async fn zero_target_is_a_config_error() {
    let mut engine = ephemeral_engine();
    let err = engine
        .compress(&twenty_turns(), &CompressionConfig::new(0))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CompressError::Config(ConfigError::NonPositiveTarget)
    ));
}

// ── Core scenario ────────────────────────────────────────────────────

#[tokio::test]
async fn twenty_turns_over_budget() {
    let mut engine = ephemeral_engine();
    let turns = twenty_turns();
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(500))
        .await
        .unwrap();

    assert!(outcome.original_tokens > 500);
    assert!(outcome.compressed_tokens < outcome.original_tokens);
    assert!(outcome.compression_ratio < 1.0);
    assert!(outcome.archived_chunk_count >= 1);
    assert!(!outcome.archive_failed);

    let out = &outcome.turns;
    assert_eq!(out[0], turns[0], "system turn first, byte-for-byte");

    let recent = &turns[turns.len() - 8..];
    assert_eq!(&out[out.len() - 8..], recent, "recent window verbatim");

    let summaries: Vec<&Message> = out.iter().filter(|t| is_earlier_summary(t)).collect();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].role, MessageRole::System);
    let body = earlier_summary_body(summaries[0]).unwrap();
    assert!(body.contains(&format!(
        "{ARCHIVE_POINTER_PREFIX} {} chunk(s)",
        outcome.archived_chunk_count
    )));

    assert!(outcome.injected_persistent_memory);
    assert!(out.iter().filter(|t| is_persistent_memory(t)).count() == 1);
    assert!(outcome.notice().starts_with(&format!(
        "compressed {}→{} tokens",
        outcome.original_tokens, outcome.compressed_tokens
    )));
}

#[tokio::test]
async fn recall_after_compression() {
    let mut engine = ephemeral_engine();
    engine
        .compress(&twenty_turns(), &CompressionConfig::new(500))
        .await
        .unwrap();

    let found = engine.retrieve("lexer").await.unwrap();
    assert!(found.starts_with("[Retrieved Context]"));
    assert!(found.contains("src/lexer.rs"));
    assert!(engine.retrieve("quantum chromodynamics").await.is_none());
}

#[tokio::test]
async fn events_bracket_the_pass() {
    let seen = Arc::new(Mutex::new(Vec::<String>::new()));
    let sink = seen.clone();
    let handler = FnEventHandler::new(move |event| {
        let name = match event {
            CompressionEvent::Started { .. } => "started",
            CompressionEvent::StrategyApplied { .. } => "strategy",
            CompressionEvent::ChunkArchived { .. } => "chunk",
            CompressionEvent::ArchiveFailed { .. } => "failed",
            CompressionEvent::Finished { .. } => "finished",
        };
        sink.lock().unwrap().push(name.to_string());
    });
    let mut engine = ephemeral_engine().with_event_handler(Box::new(handler));
    let outcome = engine
        .compress(&twenty_turns(), &CompressionConfig::new(500))
        .await
        .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.first().map(String::as_str), Some("started"));
    assert_eq!(seen.last().map(String::as_str), Some("finished"));
    let chunks = seen.iter().filter(|s| s.as_str() == "chunk").count();
    assert_eq!(chunks, outcome.archived_chunk_count);
}

// ── Invariants ───────────────────────────────────────────────────────

#[tokio::test]
async fn critical_turns_are_never_discarded() {
    let correction = Message::user("No, that's wrong: keep the old name and add an alias instead.");
    let mut turns = vec![
        Message::system("You are a careful coding agent."),
        Message::user("Please rename the config loader in src/config.rs to load_settings."),
        Message::assistant_text("ok"),
        Message::user("thanks"),
        correction.clone(),
        Message::assistant_text("Understood."),
    ];
    turns.extend(pairs(0..4));

    let mut engine = ephemeral_engine();
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(50))
        .await
        .unwrap();

    assert!(outcome.turns.contains(&correction));
    assert!(outcome.discarded_count >= 3);
    assert!(!outcome.turns.iter().any(|t| t.text() == "thanks"));
}

#[tokio::test]
async fn window_never_opens_on_tool_results() {
    let call = Message::assistant_tool_calls(vec![
        ToolCall::function("c1", "read_file", r#"{"path":"src/lexer.rs"}"#),
        ToolCall::function("c2", "read_file", r#"{"path":"src/parser.rs"}"#),
    ]);
    let tail = vec![
        call,
        Message::named_tool_result("c1", "read_file", "pub fn lex() {}"),
        Message::named_tool_result("c2", "read_file", "pub fn parse() {}"),
        Message::assistant_text("Both files read."),
        Message::user("Now wire them together."),
    ];
    let mut turns = vec![Message::system("You are a careful coding agent.")];
    turns.extend(pairs(0..6));
    turns.extend(tail.clone());

    let mut engine = ephemeral_engine();
    let config = CompressionConfig::new(100).with_min_recent_messages(3);
    let outcome = engine.compress(&turns, &config).await.unwrap();

    let out = &outcome.turns;
    assert_eq!(&out[out.len() - tail.len()..], tail.as_slice());
}

#[tokio::test]
async fn chunks_never_exceed_the_cap() {
    let mut turns = vec![Message::system("You are a careful coding agent.")];
    turns.extend((0..28).map(assistant_turn));

    let entries = Arc::new(Mutex::new(Vec::new()));
    let store = RecordingStore {
        entries: entries.clone(),
        ..RecordingStore::default()
    };
    let mut engine = CompressionEngine::new(Box::new(store));
    let config = CompressionConfig::new(100).with_strategies(StrategySet::none());
    let outcome = engine.compress(&turns, &config).await.unwrap();

    let entries = entries.lock().unwrap();
    assert_eq!(outcome.archived_chunk_count, 3);
    let sizes: Vec<usize> = entries.iter().map(|e| e.turn_count).collect();
    assert_eq!(sizes, vec![8, 8, 4]);
    assert!(entries.iter().all(|e| e.turn_count <= 8));
}

#[tokio::test]
async fn chunk_cap_comes_from_config() {
    let mut turns = vec![Message::system("You are a careful coding agent.")];
    turns.extend((0..28).map(assistant_turn));

    let entries = Arc::new(Mutex::new(Vec::new()));
    let store = RecordingStore {
        entries: entries.clone(),
        ..RecordingStore::default()
    };
    let mut engine = CompressionEngine::new(Box::new(store));
    let config = CompressionConfig::new(100)
        .with_strategies(StrategySet::none())
        .with_max_chunk_turns(4);
    engine.compress(&turns, &config).await.unwrap();
    let sizes: Vec<usize> = entries.lock().unwrap().iter().map(|e| e.turn_count).collect();
    assert_eq!(sizes, vec![4; 5]);

    let err = engine
        .compress(&turns, &config.with_max_chunk_turns(20))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CompressError::Config(ConfigError::ChunkCapTooLarge { got: 20, max: 8 })
    ));
    assert_eq!(entries.lock().unwrap().len(), 5);
}

/// Every tool result in `turns` answers a call issued earlier in `turns`,
/// and every issued call is answered.
fn assert_tool_pairs_intact(turns: &[Message]) {
    let mut issued: Vec<&str> = Vec::new();
    let mut answered: Vec<&str> = Vec::new();
    for turn in turns {
        for call in turn.tool_calls.iter().flatten() {
            issued.push(call.id.as_str());
        }
        if let Some(id) = turn.tool_call_id.as_deref() {
            assert!(issued.contains(&id), "tool result {id} has no call");
            answered.push(id);
        }
    }
    for id in issued {
        assert!(answered.contains(&id), "tool call {id} has no result");
    }
}

#[tokio::test]
async fn kept_tool_turns_stay_paired() {
    let failed_build = Message::tool_result("c1", "error: build failed in src/lexer.rs");
    let decided = Message {
        content: Some("Going with a clean rebuild first.".into()),
        ..Message::assistant_tool_calls(vec![ToolCall::function(
            "c2",
            "shell",
            r#"{"cmd":"cargo clean"}"#,
        )])
    };
    let mut turns = vec![
        Message::system("You are a careful coding agent."),
        Message::user("Run the build and show me what breaks."),
        Message::assistant_tool_calls(vec![ToolCall::function(
            "c1",
            "shell",
            r#"{"cmd":"cargo build"}"#,
        )]),
        failed_build.clone(),
        decided.clone(),
        Message::tool_result("c2", "Removed 812 files."),
    ];
    turns.extend(pairs(0..9));

    let mut engine = ephemeral_engine();
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(300))
        .await
        .unwrap();

    assert!(outcome.turns.contains(&failed_build));
    assert!(outcome.turns.contains(&decided));
    assert_tool_pairs_intact(&outcome.turns);
}

// ── Summaries and caching ────────────────────────────────────────────

#[tokio::test]
async fn identical_chunks_hit_the_cache() {
    let summarizer = ScriptedSummarizer::default();
    let mut engine = ephemeral_engine().with_summarizer(Box::new(summarizer.clone()));
    let turns = twenty_turns();
    let config = CompressionConfig::new(500);

    let first = engine.compress(&turns, &config).await.unwrap();
    let calls_after_first = summarizer.chunk_calls();
    assert_eq!(calls_after_first, first.archived_chunk_count);
    assert_eq!(first.summary_cache_hits, 0);

    let second = engine.compress(&turns, &config).await.unwrap();
    assert_eq!(summarizer.chunk_calls(), calls_after_first);
    assert_eq!(second.summary_cache_hits, calls_after_first);

    let summary = second.turns.iter().find(|t| is_earlier_summary(t)).unwrap();
    assert!(summary.text().contains("Rolling summary of the session."));
}

#[tokio::test]
async fn failing_summarizer_degrades_gracefully() {
    let long = format!(
        "Walkthrough of the lexer rewrite. {}",
        ASSISTANT_PAD.repeat(50)
    );
    let mut turns = vec![
        Message::system("You are a careful coding agent."),
        user_turn(0),
        Message::assistant_text(long.clone()),
        user_turn(1),
        assistant_turn(1),
    ];
    turns.extend(pairs(2..6));

    let entries = Arc::new(Mutex::new(Vec::new()));
    let store = RecordingStore {
        entries: entries.clone(),
        ..RecordingStore::default()
    };
    let mut engine =
        CompressionEngine::new(Box::new(store)).with_summarizer(Box::new(FailingSummarizer));
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(200))
        .await
        .unwrap();

    assert!(
        !outcome
            .strategies_applied
            .iter()
            .any(|s| s == SUMMARIZE_LONG_MESSAGES)
    );
    assert!(outcome.turns.iter().all(|t| !t.text().trim().is_empty()));
    assert!(outcome.archived_chunk_count >= 1);
    assert!(!outcome.warnings.is_empty());
    assert!(outcome.turns.iter().any(is_earlier_summary));

    let entries = entries.lock().unwrap();
    assert!(entries.iter().any(|e| e.raw_content.contains(&long)));
    assert!(entries.iter().all(|e| !e.summary.trim().is_empty()));
}

#[tokio::test]
async fn estimator_failure_fails_closed() {
    let turns = vec![
        Message::system("You are a careful coding agent."),
        Message::user("Add a --json flag to the CLI."),
        Message::assistant_text("Added it."),
    ];
    let mut engine = ephemeral_engine().with_estimator(Arc::new(FailingEstimator));
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(10_000))
        .await
        .unwrap();

    assert!(!outcome.warnings.is_empty());
    assert_eq!(outcome.turns, turns);
}

// ── Archive failures ─────────────────────────────────────────────────

#[tokio::test]
async fn archive_write_failure_is_flagged() {
    let store = RecordingStore {
        fail_archive: true,
        ..RecordingStore::default()
    };
    let mut engine = CompressionEngine::new(Box::new(store));
    let turns = twenty_turns();
    let outcome = engine
        .compress(&turns, &CompressionConfig::new(500))
        .await
        .unwrap();

    assert!(outcome.archive_failed);
    assert_eq!(outcome.archived_chunk_count, 0);
    assert!(outcome.warnings.iter().any(|w| w.contains("failed to archive")));
    assert!(outcome.turns.len() < turns.len());
    assert_eq!(&outcome.turns[outcome.turns.len() - 8..], &turns[turns.len() - 8..]);
}

#[tokio::test]
async fn save_failure_is_flagged() {
    let store = RecordingStore {
        fail_save: true,
        ..RecordingStore::default()
    };
    let mut engine = CompressionEngine::new(Box::new(store));
    let outcome = engine
        .compress(&twenty_turns(), &CompressionConfig::new(500))
        .await
        .unwrap();

    assert!(outcome.archive_failed);
    assert!(outcome.archived_chunk_count > 0);
    assert!(outcome.warnings.iter().any(|w| w.contains("failed to save")));
}

// ── Multiple passes ──────────────────────────────────────────────────

#[tokio::test]
async fn second_pass_merges_the_earlier_summary() {
    let mut engine = ephemeral_engine();
    let config = CompressionConfig::new(500);

    let first = engine.compress(&twenty_turns(), &config).await.unwrap();
    let first_body = first
        .turns
        .iter()
        .find_map(earlier_summary_body)
        .unwrap()
        .to_string();
    let carried: String = first_body
        .lines()
        .filter(|l| !l.starts_with(ARCHIVE_POINTER_PREFIX))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    let mut next = first.turns.clone();
    next.extend(pairs(10..15));
    let second = engine.compress(&next, &config).await.unwrap();

    let out = &second.turns;
    assert_eq!(out[0], first.turns[0]);
    assert_eq!(out.iter().filter(|t| is_earlier_summary(t)).count(), 1);
    assert!(out.iter().filter(|t| is_persistent_memory(t)).count() <= 1);

    let body = out.iter().find_map(earlier_summary_body).unwrap();
    assert!(body.contains(&carried));
    assert_eq!(body.matches(ARCHIVE_POINTER_PREFIX).count(), 1);
    let total = first.archived_chunk_count + second.archived_chunk_count;
    assert!(body.contains(&format!("{ARCHIVE_POINTER_PREFIX} {total} chunk(s)")));
    assert_eq!(engine.store().entry_count(), total);
}
