//! Summarization: the [`Summarizer`] seam, the LLM-backed implementation,
//! the prompts, and the deterministic template used when no LLM is
//! available or a call fails.
//!
//! Rolling summaries are incremental: the previous summary is passed back
//! to the model under an `EXISTING SUMMARY` header and merged, never
//! appended, so each pass produces one standalone summary.

use std::future::Future;
use std::pin::Pin;

use tracing::{debug, warn};

use crate::error::SummarizeError;
use crate::{ChatRequest, DEFAULT_SUMMARY_MODEL, Message, MessageRole, OpenRouterClient};

/// Boxed future returned by [`Summarizer::summarize`].
pub type SummaryFuture<'a> =
    Pin<Box<dyn Future<Output = Result<String, SummarizeError>> + Send + 'a>>;

/// Length of each quoted snippet in a template summary.
const TEMPLATE_SNIPPET_CHARS: usize = 120;

/// Prompt for 2-3 sentence chunk summaries stored with archive entries.
pub const CHUNK_SUMMARY_PROMPT: &str = "\
Summarize the following conversation excerpt from a coding session in 2-3 sentences. \
State what was asked, what was done, and the outcome. Preserve file paths, function \
names and error messages verbatim. Only include facts explicitly stated in the excerpt.";

/// Prompt for condensing one oversized turn.
pub const LONG_MESSAGE_PROMPT: &str = "\
Condense the following message from a coding session to roughly a quarter of its length. \
You MUST preserve verbatim: code snippets that matter, file paths, function and type \
names, commands, error messages and numeric values. Drop repetition, boilerplate and \
restated context. Output only the condensed message.";

/// Prompt for the rolling summary of everything archived so far.
pub const ROLLING_SUMMARY_PROMPT: &str = "\
Summarize the following conversation messages concisely. Focus on:
- What was accomplished (completed subtasks, files modified)
- Key findings and decisions made
- Failed approaches (what was tried and why it failed)
- File paths and function names mentioned
- Current plan state and what remains to be done

Rules:
- Only include facts explicitly stated in the messages. Do not infer or extrapolate.
- Preserve file paths, function names, and error messages verbatim.
- Be concise. Every token must earn its place.
- If there is an existing summary, merge the new information into it to produce a single \
  cohesive summary. Do not simply append: integrate, deduplicate, and update. The result \
  must be a standalone summary that replaces the existing one entirely.";

/// Produces prose summaries. Implementations may fail; callers degrade.
pub trait Summarizer: Send + Sync {
    /// Summarize `content` following the instructions in `prompt`.
    fn summarize<'a>(&'a self, prompt: &'a str, content: &'a str) -> SummaryFuture<'a>;
}

/// Summarizer backed by an OpenRouter chat completion.
pub struct LlmSummarizer {
    client: OpenRouterClient,
    model: String,
    max_tokens: u32,
}

impl LlmSummarizer {
    pub fn new(client: OpenRouterClient) -> Self {
        Self {
            client,
            model: DEFAULT_SUMMARY_MODEL.to_string(),
            max_tokens: 2048,
        }
    }

    /// Use a different (usually cheaper) model for summaries.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl Summarizer for LlmSummarizer {
    fn summarize<'a>(&'a self, prompt: &'a str, content: &'a str) -> SummaryFuture<'a> {
        Box::pin(async move {
            let request = ChatRequest {
                model: Some(self.model.clone()),
                messages: vec![Message::system(prompt), Message::user(content)],
                max_tokens: self.max_tokens,
                temperature: 0.3,
            };
            let completion = self
                .client
                .chat(&request)
                .await
                .map_err(SummarizeError::Request)?;
            if let Some(usage) = &completion.usage {
                debug!(
                    "Summary call used {} prompt / {} completion tokens",
                    usage.prompt_tokens.unwrap_or(0),
                    usage.completion_tokens.unwrap_or(0),
                );
            }
            if completion.was_truncated() {
                warn!(
                    "Summary from {} hit the {}-token limit; keeping the truncated text",
                    self.model, self.max_tokens
                );
            }
            completion
                .content
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .ok_or(SummarizeError::Empty)
        })
    }
}

// ── Request formatting ─────────────────────────────────────────────

/// One-line description of a turn's tool calls, e.g. `called read_file({"path":"a.rs"})`.
fn describe_calls(turn: &Message) -> Option<String> {
    let calls: Vec<String> = turn
        .tool_calls
        .iter()
        .flatten()
        .map(|c| format!("{}({})", c.function.name, c.function.arguments))
        .collect();
    (!calls.is_empty()).then(|| format!("called {}", calls.join(", ")))
}

/// Render turns as `[role]: text` blocks for a summarization request.
pub fn render_transcript(turns: &[Message]) -> String {
    let mut content = String::new();
    for turn in turns {
        let role = &turn.role;
        let text = match (turn.text(), describe_calls(turn)) {
            ("", Some(calls)) => calls,
            ("", None) => "[no content]".to_string(),
            (text, Some(calls)) => format!("{text}\n({calls})"),
            (text, None) => text.to_string(),
        };
        content.push_str(&format!("[{role}]: {text}\n\n"));
    }
    content
}

/// Build the user content for a rolling summary, merging any existing one.
pub fn build_rolling_request(existing: Option<&str>, new_material: &str) -> String {
    let mut content = String::new();
    if let Some(existing) = existing.filter(|s| !s.trim().is_empty()) {
        content.push_str("=== EXISTING SUMMARY ===\n");
        content.push_str(existing);
        content.push_str("\n\n=== NEW MESSAGES TO SUMMARIZE ===\n");
    }
    content.push_str(new_material);
    content
}

// ── Template fallback ──────────────────────────────────────────────

fn snippet(text: &str) -> String {
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    crate::truncate_chars(&collapsed, TEMPLATE_SNIPPET_CHARS)
}

/// Deterministic summary from the first and last turn of each role.
pub fn template_summary(turns: &[Message]) -> String {
    let mut sentences = Vec::new();

    for (role, label) in [
        (MessageRole::User, "The user"),
        (MessageRole::Assistant, "The assistant"),
    ] {
        let texts: Vec<String> = turns
            .iter()
            .filter(|t| t.role == role)
            .filter_map(|t| {
                let text = if t.text().trim().is_empty() {
                    describe_calls(t)?
                } else {
                    t.text().to_string()
                };
                Some(snippet(&text))
            })
            .collect();
        match texts.as_slice() {
            [] => {}
            [only] => sentences.push(format!("{label} said: \"{only}\".")),
            [first, .., last] if first == last => {
                sentences.push(format!("{label} said: \"{first}\"."))
            }
            [first, .., last] => sentences.push(format!(
                "{label} began with \"{first}\" and ended with \"{last}\"."
            )),
        }
    }

    let tool_turns: Vec<&Message> = turns
        .iter()
        .filter(|t| t.role == MessageRole::Tool)
        .collect();
    if !tool_turns.is_empty() {
        let mut names: Vec<&str> = tool_turns.iter().filter_map(|t| t.name.as_deref()).collect();
        names.dedup();
        let from = if names.is_empty() {
            String::new()
        } else {
            format!(" from {}", names.join(", "))
        };
        sentences.push(format!("{} tool result(s){from}.", tool_turns.len()));
    }

    if sentences.is_empty() {
        format!("{} turn(s) with no text content.", turns.len())
    } else {
        sentences.join(" ")
    }
}
