//! Turn classification: categories, importance tiers, extracted facts and
//! boundary hints.
//!
//! The engine consumes classifications through the [`Classify`] trait so the
//! retention cascade can be driven by deterministic fixtures in tests. The
//! default [`HeuristicClassifier`] works from lexical and structural signals
//! only: correction phrasing, decision language, error markers, code fences,
//! referenced paths, goal statements and backward references.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::context::paths::{FileSection, find_file_section, turn_files};
use crate::{Message, MessageRole, truncate_chars};

/// Maximum length of an extracted snippet.
const EXTRACT_MAX_CHARS: usize = 200;

/// Assistant prose shorter than this with no other signal is low importance.
const SHORT_ASSISTANT_CHARS: usize = 200;

// ── Types ──────────────────────────────────────────────────────────

/// Importance tier. Ordered so that `Critical` is the greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Importance {
    Noise,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Importance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Importance::Noise => "noise",
            Importance::Low => "low",
            Importance::Medium => "medium",
            Importance::High => "high",
            Importance::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Semantic tags a turn can carry. A turn may carry several.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    UserRequest,
    UserCorrection,
    KeyDecision,
    ErrorReport,
    ErrorResolution,
    CodeSnippet,
    FileContent,
    UserPreference,
    GoalStatement,
    BackwardReference,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Category::UserRequest => "user_request",
            Category::UserCorrection => "user_correction",
            Category::KeyDecision => "key_decision",
            Category::ErrorReport => "error_report",
            Category::ErrorResolution => "error_resolution",
            Category::CodeSnippet => "code_snippet",
            Category::FileContent => "file_content",
            Category::UserPreference => "user_preference",
            Category::GoalStatement => "goal_statement",
            Category::BackwardReference => "backward_reference",
        };
        f.write_str(name)
    }
}

/// Structured facts pulled out of a turn. Every field is independent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedInfo {
    pub goal: Option<String>,
    pub fact: Option<String>,
    pub preference: Option<String>,
    pub decision: Option<String>,
    pub files: Vec<String>,
    pub file_section: Option<FileSection>,
    pub error: Option<String>,
    pub backward_reference: Option<String>,
}

impl ExtractedInfo {
    pub fn is_empty(&self) -> bool {
        self == &ExtractedInfo::default()
    }
}

/// Classification of one turn. Computed fresh on every pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub categories: BTreeSet<Category>,
    pub importance: Importance,
    pub extracted: ExtractedInfo,
    /// A new topic starts at this turn.
    pub topic_boundary: bool,
    /// This turn closes a request/response exchange.
    pub exchange_complete: bool,
}

impl Default for Classification {
    /// The structural fallback: medium importance, no tags, no boundaries.
    fn default() -> Self {
        Self {
            categories: BTreeSet::new(),
            importance: Importance::Medium,
            extracted: ExtractedInfo::default(),
            topic_boundary: false,
            exchange_complete: false,
        }
    }
}

impl Classification {
    pub fn has(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    pub fn with_importance(mut self, importance: Importance) -> Self {
        self.importance = importance;
        self
    }

    pub fn with_category(mut self, category: Category) -> Self {
        self.categories.insert(category);
        self
    }
}

/// Assigns a [`Classification`] to a turn given the turns before it.
pub trait Classify: Send + Sync {
    fn classify(&self, turn: &Message, prior: &[Message]) -> Classification;
}

/// Classify every turn, each against the turns that precede it.
///
/// Always returns exactly one classification per turn.
pub fn classify_all(classifier: &dyn Classify, turns: &[Message]) -> Vec<Classification> {
    turns
        .iter()
        .enumerate()
        .map(|(i, turn)| classifier.classify(turn, &turns[..i]))
        .collect()
}

// ── Heuristic classifier ───────────────────────────────────────────

const CORRECTION_MARKERS: &[&str] = &[
    "actually,",
    "no, ",
    "that's wrong",
    "that is wrong",
    "that's not what",
    "not what i asked",
    "not what i meant",
    "i meant",
    "you misunderstood",
    "don't do that",
    "wrong file",
    "revert that",
    "undo that",
    "stop doing",
];

const GOAL_MARKERS: &[&str] = &[
    "my goal is",
    "the goal is",
    "goal:",
    "objective:",
    "the task is",
    "i'm trying to",
    "i am trying to",
    "i want to",
    "we need to",
    "i need you to",
];

const PREFERENCE_MARKERS: &[&str] = &[
    "i prefer",
    "i'd prefer",
    "i'd rather",
    "please always",
    "always use",
    "never use",
    "don't use",
    "do not use",
    "please don't",
    "please do not",
    "make sure to always",
];

const DECISION_MARKERS: &[&str] = &[
    "decided to",
    "decision:",
    "let's go with",
    "we'll go with",
    "going with",
    "i'll use",
    "we'll use",
    "i will use",
    "we will use",
    "chose to",
    "the plan is",
    "switching to",
];

const ERROR_MARKERS: &[&str] = &[
    "error:",
    "error[",
    "panicked",
    "exception",
    "traceback",
    "failed to",
    "build failed",
    "test failed",
    "tests failed",
    "failed:",
    "cannot find",
    "not found",
    "undefined reference",
    "segmentation fault",
    "fatal:",
];

const RESOLUTION_MARKERS: &[&str] = &[
    "fixed",
    "resolved",
    "now passes",
    "tests pass",
    "all tests passed",
    "works now",
    "now works",
    "build succeeded",
    "compiles now",
    "now compiles",
];

const BACKWARD_MARKERS: &[&str] = &[
    "as i mentioned",
    "as mentioned",
    "like i said",
    "as i said",
    "as we discussed",
    "as discussed",
    "remember when",
    "earlier you",
    "you said",
    "go back to",
];

const FILLER: &[&str] = &[
    "ok",
    "okay",
    "k",
    "thanks",
    "thank you",
    "thx",
    "got it",
    "sure",
    "yes",
    "yep",
    "no",
    "cool",
    "great",
    "nice",
    "sounds good",
    "continue",
    "go on",
    "go ahead",
];

/// Tool names whose output is file content.
const FILE_READ_TOOLS: &[&str] = &["read", "cat", "view", "open"];

fn contains_any(lower: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| lower.contains(m))
}

/// First sentence (or line) of `text` containing one of `markers`.
fn sentence_with(text: &str, markers: &[&str]) -> Option<String> {
    text.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .find(|s| contains_any(&s.to_lowercase(), markers))
        .map(|s| truncate_chars(s, EXTRACT_MAX_CHARS))
}

fn is_filler(lower: &str) -> bool {
    let trimmed = lower.trim().trim_end_matches(['!', '.', ',']);
    FILLER.contains(&trimmed)
}

fn has_code_fence(text: &str) -> bool {
    text.contains("```")
}

/// Name of the tool that produced `turn`, from the turn itself or the
/// assistant call that issued it.
fn producing_tool<'a>(turn: &'a Message, prior: &'a [Message]) -> Option<&'a str> {
    if let Some(name) = turn.name.as_deref() {
        return Some(name);
    }
    let call_id = turn.tool_call_id.as_deref()?;
    prior.iter().rev().find_map(|m| {
        m.tool_calls
            .iter()
            .flatten()
            .find(|c| c.id == call_id)
            .map(|c| c.function.name.as_str())
    })
}

/// Default keyword-driven classifier.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicClassifier;

impl HeuristicClassifier {
    pub fn new() -> Self {
        Self
    }

    fn classify_user(&self, text: &str, lower: &str, c: &mut Classification) {
        if text.trim().is_empty() || is_filler(lower) {
            c.importance = Importance::Noise;
            return;
        }
        c.categories.insert(Category::UserRequest);
        c.importance = Importance::High;

        if contains_any(lower, CORRECTION_MARKERS) {
            c.categories.insert(Category::UserCorrection);
            c.importance = Importance::Critical;
        }
        if let Some(goal) = sentence_with(text, GOAL_MARKERS) {
            c.categories.insert(Category::GoalStatement);
            c.extracted.goal = Some(goal);
            c.importance = Importance::Critical;
        }
        if let Some(pref) = sentence_with(text, PREFERENCE_MARKERS) {
            c.categories.insert(Category::UserPreference);
            c.extracted.preference = Some(pref);
            c.importance = Importance::Critical;
        }
        if let Some(decision) = sentence_with(text, DECISION_MARKERS) {
            c.categories.insert(Category::KeyDecision);
            c.extracted.decision = Some(decision);
        }
        if let Some(error) = sentence_with(text, ERROR_MARKERS) {
            c.categories.insert(Category::ErrorReport);
            c.extracted.error = Some(error);
        }
        if has_code_fence(text) {
            c.categories.insert(Category::CodeSnippet);
        }
    }

    fn classify_assistant(&self, turn: &Message, text: &str, lower: &str, c: &mut Classification) {
        if text.trim().is_empty() {
            c.importance = if turn.has_tool_calls() {
                Importance::Low
            } else {
                Importance::Noise
            };
            return;
        }
        c.importance = if is_filler(lower) {
            Importance::Noise
        } else if text.len() < SHORT_ASSISTANT_CHARS {
            Importance::Low
        } else {
            Importance::Medium
        };

        if has_code_fence(text) {
            c.categories.insert(Category::CodeSnippet);
            c.importance = c.importance.max(Importance::Medium);
        }
        if let Some(decision) = sentence_with(text, DECISION_MARKERS) {
            c.categories.insert(Category::KeyDecision);
            c.extracted.decision = Some(decision);
            c.importance = c.importance.max(Importance::High);
        }
        if let Some(resolution) = sentence_with(text, RESOLUTION_MARKERS) {
            c.categories.insert(Category::ErrorResolution);
            c.extracted.fact = Some(resolution);
            c.importance = c.importance.max(Importance::High);
        } else if let Some(error) = sentence_with(text, ERROR_MARKERS) {
            c.categories.insert(Category::ErrorReport);
            c.extracted.error = Some(error);
            c.importance = c.importance.max(Importance::High);
        }
    }

    fn classify_tool(
        &self,
        turn: &Message,
        prior: &[Message],
        text: &str,
        lower: &str,
        c: &mut Classification,
    ) {
        if text.trim().is_empty() {
            c.importance = Importance::Noise;
            return;
        }
        c.importance = Importance::Low;

        let reads_file = producing_tool(turn, prior).is_some_and(|name| {
            let name = name.to_lowercase();
            FILE_READ_TOOLS.iter().any(|t| name.contains(t))
        });
        if reads_file {
            c.categories.insert(Category::FileContent);
            c.importance = Importance::Medium;
        }
        if has_code_fence(text) {
            c.categories.insert(Category::CodeSnippet);
            c.importance = c.importance.max(Importance::Medium);
        }
        if let Some(error) = sentence_with(text, ERROR_MARKERS) {
            c.categories.insert(Category::ErrorReport);
            c.extracted.error = Some(error);
            c.importance = Importance::High;
        } else if contains_any(lower, RESOLUTION_MARKERS) {
            c.categories.insert(Category::ErrorResolution);
            c.importance = c.importance.max(Importance::Medium);
        }
    }

    /// New user ask after a non-user turn, or a hard switch of referenced
    /// files relative to the last turn that referenced any.
    fn topic_boundary(turn: &Message, files: &[String], prior: &[Message]) -> bool {
        let Some(previous) = prior.iter().rev().find(|m| m.role != MessageRole::System) else {
            return false;
        };
        if turn.role == MessageRole::User && previous.role != MessageRole::User {
            return true;
        }
        if files.len() < 2 {
            return false;
        }
        prior
            .iter()
            .rev()
            .map(turn_files)
            .find(|f| !f.is_empty())
            .is_some_and(|last| !files.iter().any(|f| last.contains(f)))
    }
}

impl Classify for HeuristicClassifier {
    fn classify(&self, turn: &Message, prior: &[Message]) -> Classification {
        let mut c = Classification::default();
        if turn.role == MessageRole::System {
            c.importance = Importance::Critical;
            return c;
        }

        let text = turn.text();
        let lower = text.to_lowercase();
        match turn.role {
            MessageRole::User => self.classify_user(text, &lower, &mut c),
            MessageRole::Assistant => self.classify_assistant(turn, text, &lower, &mut c),
            MessageRole::Tool => self.classify_tool(turn, prior, text, &lower, &mut c),
            MessageRole::System => {}
        }

        if let Some(reference) = sentence_with(text, BACKWARD_MARKERS) {
            c.categories.insert(Category::BackwardReference);
            c.extracted.backward_reference = Some(reference);
        }

        c.extracted.files = turn_files(turn);
        c.extracted.file_section = find_file_section(text);
        c.topic_boundary = Self::topic_boundary(turn, &c.extracted.files, prior);
        c.exchange_complete = turn.role == MessageRole::Assistant
            && !turn.has_tool_calls()
            && !text.trim().is_empty();
        c
    }
}
