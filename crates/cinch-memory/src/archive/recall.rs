//! Retrieval of archived material back into the conversation.
//!
//! Retrieved entries are rendered into one block prefixed with
//! `[Retrieved Context]` so the agent loop can tell recalled material from
//! live conversation. An agent can also expose retrieval to the model as a
//! function-calling tool via [`recall_tool_definition`].

use schemars::JsonSchema;
use serde::Deserialize;

use super::{ArchiveEntry, ArchiveStore};
use crate::error::ArchiveError;
use crate::{ToolDef, json_schema_for};

/// Marker opening a block of retrieved context.
pub const RETRIEVED_CONTEXT_MARKER: &str = "[Retrieved Context]";

/// Name of the retrieval tool.
pub const RECALL_TOOL_NAME: &str = "recall_archive";

/// Default number of entries returned by a recall.
pub const DEFAULT_RECALL_LIMIT: usize = 3;

/// Arguments of the `recall_archive` tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct RecallArgs {
    /// Keywords, file paths or a short description of what to look up in
    /// earlier, archived parts of the conversation.
    pub query: String,
    /// Maximum number of archived chunks to return (default 3).
    #[serde(default)]
    pub limit: Option<usize>,
}

impl RecallArgs {
    pub fn limit_or_default(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_RECALL_LIMIT)
    }
}

/// Tool definition for `recall_archive`.
pub fn recall_tool_definition() -> ToolDef {
    ToolDef::new(
        RECALL_TOOL_NAME,
        "Search archived earlier parts of this conversation. Use when you need details \
         (code, errors, decisions, file contents) that were summarized away.",
        json_schema_for::<RecallArgs>(),
    )
}

/// Parse `recall_archive` call arguments.
pub fn parse_recall_args(arguments: &str) -> Result<RecallArgs, serde_json::Error> {
    serde_json::from_str(arguments)
}

/// Render entries as a retrieved-context block. `None` when there are none.
pub fn render_retrieved(entries: &[ArchiveEntry]) -> Option<String> {
    if entries.is_empty() {
        return None;
    }
    let mut out = String::from(RETRIEVED_CONTEXT_MARKER);
    for (i, entry) in entries.iter().enumerate() {
        out.push_str(&format!(
            "\n{}. {} ({}, {}): {}",
            i + 1,
            entry.id,
            entry.timestamp.format("%Y-%m-%d %H:%M UTC"),
            entry.importance,
            entry.summary,
        ));
        if !entry.related_files.is_empty() {
            out.push_str(&format!("\n   files: {}", entry.related_files.join(", ")));
        }
    }
    Some(out)
}

/// Search `store` and render the top `k` hits.
pub async fn recall(
    store: &dyn ArchiveStore,
    query: &str,
    k: usize,
) -> Result<Option<String>, ArchiveError> {
    let entries = store.search(query, k).await?;
    Ok(render_retrieved(&entries))
}
