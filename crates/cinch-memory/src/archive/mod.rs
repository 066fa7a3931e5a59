//! Cold storage for turns evicted from the live transcript.
//!
//! The compression engine writes each archived chunk as an [`ArchiveEntry`]
//! and records structured facts ([`ArchiveFacts`]) pulled from classified
//! turns. Both feed back into later passes: facts become the
//! `[Persistent Memory]` turn, and entries are searchable through
//! [`ArchiveStore::search`] for on-demand retrieval.
//!
//! The store is append-only and assumes a single writer.

pub mod recall;
pub mod store;

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::classifier::Importance;
use crate::context::estimator::DEFAULT_CHARS_PER_TOKEN;
use crate::error::ArchiveError;
use crate::truncate_chars;

/// Boxed future returned by [`ArchiveStore`] methods.
pub type ArchiveFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ArchiveError>> + Send + 'a>>;

/// Per-list cap on recorded facts. Oldest entries are dropped first.
pub const MAX_FACTS_PER_LIST: usize = 20;

/// Query terms shorter than this are ignored by search.
const MIN_TERM_CHARS: usize = 3;

/// Generate a unique id for a compression session.
pub fn generate_session_id() -> String {
    let ts = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("ss-{ts:x}-{count:04x}")
}

// ── Entries ────────────────────────────────────────────────────────

/// Kind of archived material.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    ConversationChunk,
}

/// An entry before the store assigns it an id.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingEntry {
    pub kind: EntryKind,
    pub raw_content: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub related_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub importance: Importance,
    pub turn_count: usize,
}

impl PendingEntry {
    /// Attach a store-assigned id.
    pub fn into_entry(self, id: String) -> ArchiveEntry {
        ArchiveEntry {
            id,
            kind: self.kind,
            raw_content: self.raw_content,
            summary: self.summary,
            keywords: self.keywords,
            related_files: self.related_files,
            timestamp: self.timestamp,
            session_id: self.session_id,
            importance: self.importance,
            turn_count: self.turn_count,
        }
    }
}

/// One archived chunk. Never mutated after creation.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ArchiveEntry {
    pub id: String,
    pub kind: EntryKind,
    pub raw_content: String,
    pub summary: String,
    pub keywords: Vec<String>,
    pub related_files: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub importance: Importance,
    #[serde(default)]
    pub turn_count: usize,
}

// ── Facts ──────────────────────────────────────────────────────────

/// Structured facts carried across compression passes.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct ArchiveFacts {
    pub goal: Option<String>,
    pub tasks: Vec<String>,
    pub preferences: Vec<String>,
    pub decisions: Vec<String>,
    pub errors: Vec<String>,
}

fn push_capped(list: &mut Vec<String>, items: Vec<String>) {
    for item in items {
        let item = item.trim().to_string();
        if item.is_empty() || list.contains(&item) {
            continue;
        }
        list.push(item);
        if list.len() > MAX_FACTS_PER_LIST {
            list.remove(0);
        }
    }
}

impl ArchiveFacts {
    pub fn is_empty(&self) -> bool {
        self == &ArchiveFacts::default()
    }

    /// Merge `update` in: a newer goal replaces the old one, list items are
    /// deduplicated and each list keeps its newest [`MAX_FACTS_PER_LIST`].
    pub fn merge(&mut self, update: ArchiveFacts) {
        if let Some(goal) = update.goal.filter(|g| !g.trim().is_empty()) {
            self.goal = Some(goal.trim().to_string());
        }
        push_capped(&mut self.tasks, update.tasks);
        push_capped(&mut self.preferences, update.preferences);
        push_capped(&mut self.decisions, update.decisions);
        push_capped(&mut self.errors, update.errors);
    }

    /// Render as the body of a `[Persistent Memory]` turn.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if let Some(goal) = &self.goal {
            out.push_str(&format!("Goal: {goal}\n"));
        }
        for (heading, items) in [
            ("Tasks", &self.tasks),
            ("Preferences", &self.preferences),
            ("Decisions", &self.decisions),
            ("Errors seen", &self.errors),
        ] {
            if items.is_empty() {
                continue;
            }
            out.push_str(&format!("{heading}:\n"));
            for item in items {
                out.push_str(&format!("- {item}\n"));
            }
        }
        out.trim_end().to_string()
    }
}

/// Truncate `text` to roughly `token_budget` tokens. Zero budget yields "".
pub fn fit_to_budget(text: &str, token_budget: usize) -> String {
    let max_chars = (token_budget as f64 * DEFAULT_CHARS_PER_TOKEN).floor() as usize;
    if max_chars == 0 {
        return String::new();
    }
    truncate_chars(text, max_chars)
}

// ── Search ─────────────────────────────────────────────────────────

/// Lowercased query terms of at least three characters.
pub fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| {
            t.trim_matches(|c: char| !c.is_alphanumeric() && c != '/' && c != '.' && c != '_')
                .to_lowercase()
        })
        .filter(|t| t.chars().count() >= MIN_TERM_CHARS)
        .collect();
    let mut seen = HashSet::new();
    terms.retain(|t| seen.insert(t.clone()));
    terms
}

/// Relevance of `entry` to `terms`.
///
/// 3 per keyword hit, 2 per related-file hit, 1 per summary hit, plus an
/// importance bonus (critical 2, high 1) for entries that matched at all.
pub fn score_entry(entry: &ArchiveEntry, terms: &[String]) -> usize {
    let summary = entry.summary.to_lowercase();
    let mut score = 0;
    for term in terms {
        if entry.keywords.iter().any(|k| k.to_lowercase().contains(term.as_str())) {
            score += 3;
        }
        if entry
            .related_files
            .iter()
            .any(|f| f.to_lowercase().contains(term.as_str()))
        {
            score += 2;
        }
        if summary.contains(term.as_str()) {
            score += 1;
        }
    }
    if score == 0 {
        return 0;
    }
    score
        + match entry.importance {
            Importance::Critical => 2,
            Importance::High => 1,
            _ => 0,
        }
}

/// Top `k` entries for `query`, best first. Ties favor newer entries.
pub fn rank_entries<'a>(
    entries: impl IntoIterator<Item = &'a ArchiveEntry>,
    query: &str,
    k: usize,
) -> Vec<ArchiveEntry> {
    let terms = query_terms(query);
    if terms.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut scored: Vec<(usize, usize, &ArchiveEntry)> = entries
        .into_iter()
        .enumerate()
        .map(|(order, e)| (score_entry(e, &terms), order, e))
        .filter(|(score, _, _)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.0.cmp(&a.0).then(b.1.cmp(&a.1)));
    scored.into_iter().take(k).map(|(_, _, e)| e.clone()).collect()
}

// ── Store trait ────────────────────────────────────────────────────

/// Durable, queryable archive of chunks and facts.
///
/// Every method is fallible. The compression engine treats failures as
/// warnings: an unreachable store never blocks a pass.
pub trait ArchiveStore: Send + Sync {
    /// Append an entry and return it with its assigned id.
    fn archive(&mut self, entry: PendingEntry) -> ArchiveFuture<'_, ArchiveEntry>;

    /// Up to `k` entries relevant to `query`, best first.
    fn search<'a>(&'a self, query: &'a str, k: usize) -> ArchiveFuture<'a, Vec<ArchiveEntry>>;

    /// Render recorded facts within `token_budget` tokens. Empty when there
    /// is nothing to say.
    fn build_context_summary(&self, token_budget: usize) -> ArchiveFuture<'_, String>;

    /// Merge structured facts.
    fn record_facts(&mut self, facts: ArchiveFacts) -> ArchiveFuture<'_, ()>;

    /// Persist everything written so far.
    fn save(&mut self) -> ArchiveFuture<'_, ()>;

    /// Reload from durable storage.
    fn load(&mut self) -> ArchiveFuture<'_, ()>;

    /// Number of archived entries.
    fn entry_count(&self) -> usize;
}
