//! Output transcript layout.
//!
//! A compressed transcript has four zones, in this order:
//!
//! 1. **System turn**: the original leading system prompt, byte-for-byte.
//! 2. **Persistent memory**: structured facts from the archive store,
//!    marked `[Persistent Memory]`. Regenerated on every pass.
//! 3. **Earlier conversation summary**: rolling summary of everything
//!    archived, marked `[Earlier Conversation Summary]`. Merged forward
//!    across passes.
//! 4. **Kept turns**: everything retained verbatim, in original order,
//!    ending with the protected recent window.
//!
//! Zones 2 and 3 are system-role turns recognized by their marker prefix so
//! a later pass can tell them apart from real conversation.

use crate::context::estimator::TokenEstimator;
use crate::error::EstimateError;
use crate::{Message, MessageRole};

/// Marker opening the persistent-memory turn.
pub const PERSISTENT_MEMORY_MARKER: &str = "[Persistent Memory]";

/// Marker opening the rolling-summary turn.
pub const EARLIER_SUMMARY_MARKER: &str = "[Earlier Conversation Summary]";

fn marked_turn(marker: &str, body: &str) -> Message {
    Message::system(format!("{marker}\n{}", body.trim()))
}

fn marked_body<'a>(turn: &'a Message, marker: &str) -> Option<&'a str> {
    if turn.role != MessageRole::System {
        return None;
    }
    turn.text().strip_prefix(marker).map(str::trim)
}

/// Build a `[Persistent Memory]` turn.
pub fn persistent_memory_turn(body: &str) -> Message {
    marked_turn(PERSISTENT_MEMORY_MARKER, body)
}

/// Build an `[Earlier Conversation Summary]` turn.
pub fn earlier_summary_turn(body: &str) -> Message {
    marked_turn(EARLIER_SUMMARY_MARKER, body)
}

pub fn is_persistent_memory(turn: &Message) -> bool {
    marked_body(turn, PERSISTENT_MEMORY_MARKER).is_some()
}

pub fn is_earlier_summary(turn: &Message) -> bool {
    marked_body(turn, EARLIER_SUMMARY_MARKER).is_some()
}

/// The summary text of an `[Earlier Conversation Summary]` turn.
pub fn earlier_summary_body(turn: &Message) -> Option<&str> {
    marked_body(turn, EARLIER_SUMMARY_MARKER)
}

/// The assembled zones of a compressed transcript.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TranscriptLayout {
    pub system: Option<Message>,
    pub memory: Option<Message>,
    pub summary: Option<Message>,
    pub kept: Vec<Message>,
}

impl TranscriptLayout {
    /// Flatten the zones into the final turn list.
    pub fn into_turns(self) -> Vec<Message> {
        let mut turns = Vec::with_capacity(self.kept.len() + 3);
        turns.extend(self.system);
        turns.extend(self.memory);
        turns.extend(self.summary);
        turns.extend(self.kept);
        turns
    }

    /// Estimate tokens per zone.
    pub fn breakdown(&self, estimator: &dyn TokenEstimator) -> Result<LayoutBreakdown, EstimateError> {
        let zone = |turn: &Option<Message>| -> Result<usize, EstimateError> {
            match turn {
                Some(t) => estimator.estimate(std::slice::from_ref(t), &[]),
                None => Ok(0),
            }
        };
        let system_tokens = zone(&self.system)?;
        let memory_tokens = zone(&self.memory)?;
        let summary_tokens = zone(&self.summary)?;
        let kept_tokens = estimator.estimate(&self.kept, &[])?;
        Ok(LayoutBreakdown {
            system_tokens,
            memory_tokens,
            summary_tokens,
            kept_tokens,
            total_tokens: system_tokens + memory_tokens + summary_tokens + kept_tokens,
        })
    }
}

/// Per-zone breakdown of estimated token usage.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutBreakdown {
    pub system_tokens: usize,
    pub memory_tokens: usize,
    pub summary_tokens: usize,
    pub kept_tokens: usize,
    pub total_tokens: usize,
}

impl LayoutBreakdown {
    pub fn to_log_string(&self) -> String {
        format!(
            "layout: system ~{}, memory ~{}, summary ~{}, kept ~{} (total ~{})",
            self.system_tokens,
            self.memory_tokens,
            self.summary_tokens,
            self.kept_tokens,
            self.total_tokens,
        )
    }
}
