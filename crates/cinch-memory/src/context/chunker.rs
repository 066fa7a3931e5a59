//! Semantic chunking of archive-bound turns.
//!
//! Archived turns are grouped into contiguous chunks, each summarized and
//! stored as one archive entry. A chunk closes when the classifier signals a
//! topic shift, the referenced files switch wholesale, an error episode has
//! been resolved, or a key decision arrives in an already substantial chunk.
//! Those signals only split chunks of two or more turns. The turn cap always
//! applies, so chunking makes progress even when the classifier reports no
//! boundaries at all.

use std::collections::BTreeSet;
use std::ops::Range;

use crate::context::classifier::{Category, Classification};

/// Default maximum turns per chunk.
pub const DEFAULT_MAX_CHUNK_TURNS: usize = 8;

/// Boundary signals only split chunks holding at least this many turns.
const MIN_TURNS_TO_SPLIT: usize = 2;

/// A key decision opens a new chunk once the current one holds this many turns.
const DECISION_SPLIT_TURNS: usize = 3;

/// Why a chunk was closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkBreak {
    TopicBoundary,
    FileSwitch,
    ErrorResolved,
    KeyDecision,
    TurnCap,
    End,
}

/// A closed chunk: a range over the archive-bound turns and why it closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub range: Range<usize>,
    pub closed_by: ChunkBreak,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.range.len()
    }

    pub fn is_empty(&self) -> bool {
        self.range.is_empty()
    }
}

#[derive(Default)]
struct OpenChunk {
    start: usize,
    len: usize,
    files: BTreeSet<String>,
    has_error: bool,
    resolved: bool,
}

impl OpenChunk {
    fn starting_at(start: usize) -> Self {
        Self {
            start,
            ..Self::default()
        }
    }

    fn push(&mut self, c: &Classification) {
        self.len += 1;
        self.files.extend(c.extracted.files.iter().cloned());
        if c.has(Category::ErrorReport) {
            self.has_error = true;
        }
        if self.has_error && c.has(Category::ErrorResolution) {
            self.resolved = true;
        }
    }

    /// Boundary signal raised by `incoming`, if any.
    fn boundary(&self, incoming: &Classification, max_turns: usize) -> Option<ChunkBreak> {
        if self.len >= max_turns {
            return Some(ChunkBreak::TurnCap);
        }
        if self.len < MIN_TURNS_TO_SPLIT {
            return None;
        }
        if incoming.topic_boundary {
            return Some(ChunkBreak::TopicBoundary);
        }
        let files = &incoming.extracted.files;
        if files.len() >= 2 && !files.iter().any(|f| self.files.contains(f)) {
            return Some(ChunkBreak::FileSwitch);
        }
        if self.resolved {
            return Some(ChunkBreak::ErrorResolved);
        }
        if incoming.has(Category::KeyDecision) && self.len >= DECISION_SPLIT_TURNS {
            return Some(ChunkBreak::KeyDecision);
        }
        None
    }

    fn close(self, end: usize, closed_by: ChunkBreak) -> Chunk {
        Chunk {
            range: self.start..end,
            closed_by,
        }
    }
}

/// Split archive-bound turns (given by their classifications, in original
/// order) into chunks of at most `max_turns` turns.
///
/// `max_turns` below 2 is treated as 2. Every input index lands in exactly
/// one chunk; the last chunk may hold a single turn.
pub fn chunk_turns(classifications: &[Classification], max_turns: usize) -> Vec<Chunk> {
    let max_turns = max_turns.max(MIN_TURNS_TO_SPLIT);
    let mut chunks = Vec::new();
    let mut open = OpenChunk::starting_at(0);

    for (i, class) in classifications.iter().enumerate() {
        if let Some(reason) = open.boundary(class, max_turns) {
            let closed = std::mem::replace(&mut open, OpenChunk::starting_at(i));
            chunks.push(closed.close(i, reason));
        }
        open.push(class);
    }
    if open.len > 0 {
        chunks.push(open.close(classifications.len(), ChunkBreak::End));
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plain() -> Classification {
        Classification::default()
    }

    fn topic() -> Classification {
        Classification {
            topic_boundary: true,
            ..Classification::default()
        }
    }

    fn with_files(files: &[&str]) -> Classification {
        let mut c = Classification::default();
        c.extracted.files = files.iter().map(|f| f.to_string()).collect();
        c
    }

    fn lens(chunks: &[Chunk]) -> Vec<usize> {
        chunks.iter().map(Chunk::len).collect()
    }

    #[test]
    fn degenerate_classifier_uses_turn_cap() {
        let classes = vec![plain(); 20];
        let chunks = chunk_turns(&classes, 8);
        assert_eq!(lens(&chunks), vec![8, 8, 4]);
        assert_eq!(chunks[0].closed_by, ChunkBreak::TurnCap);
        assert_eq!(chunks[2].closed_by, ChunkBreak::End);
    }

    #[test]
    fn topic_boundary_splits_after_two_turns() {
        let classes = vec![plain(), topic(), plain(), topic(), plain()];
        let chunks = chunk_turns(&classes, 8);
        // The boundary at index 1 arrives when the chunk holds one turn.
        assert_eq!(lens(&chunks), vec![3, 2]);
        assert_eq!(chunks[0].closed_by, ChunkBreak::TopicBoundary);
    }

    #[test]
    fn file_switch_splits() {
        let classes = vec![
            with_files(&["src/a.rs"]),
            with_files(&["src/a.rs"]),
            with_files(&["docs/x.md", "docs/y.md"]),
            with_files(&["docs/x.md", "src/b.rs"]),
        ];
        let chunks = chunk_turns(&classes, 8);
        assert_eq!(lens(&chunks), vec![2, 2]);
        assert_eq!(chunks[0].closed_by, ChunkBreak::FileSwitch);
    }

    #[test]
    fn resolved_error_closes_chunk() {
        let classes = vec![
            plain().with_category(Category::ErrorReport),
            plain(),
            plain().with_category(Category::ErrorResolution),
            plain(),
        ];
        let chunks = chunk_turns(&classes, 8);
        assert_eq!(lens(&chunks), vec![3, 1]);
        assert_eq!(chunks[0].closed_by, ChunkBreak::ErrorResolved);
    }

    #[test]
    fn resolution_without_error_does_not_split() {
        let classes = vec![
            plain(),
            plain().with_category(Category::ErrorResolution),
            plain(),
        ];
        assert_eq!(lens(&chunk_turns(&classes, 8)), vec![3]);
    }

    #[test]
    fn decision_splits_after_three_turns() {
        let decision = || plain().with_category(Category::KeyDecision);
        let classes = vec![plain(), plain(), decision(), plain(), decision(), plain()];
        let chunks = chunk_turns(&classes, 8);
        assert_eq!(lens(&chunks), vec![4, 2]);
        assert_eq!(chunks[0].closed_by, ChunkBreak::KeyDecision);
    }

    #[test]
    fn chunks_never_exceed_cap_and_cover_input() {
        let mut classes = Vec::new();
        for i in 0..50 {
            classes.push(if i % 7 == 0 { topic() } else { plain() });
        }
        let chunks = chunk_turns(&classes, 8);
        assert!(chunks.iter().all(|c| c.len() <= 8 && !c.is_empty()));
        let covered: usize = chunks.iter().map(Chunk::len).sum();
        assert_eq!(covered, 50);
        for pair in chunks.windows(2) {
            assert_eq!(pair[0].range.end, pair[1].range.start);
        }
    }

    #[test]
    fn single_turn_and_empty_input() {
        assert_eq!(lens(&chunk_turns(&[plain()], 8)), vec![1]);
        assert!(chunk_turns(&[], 8).is_empty());
    }

    #[test]
    fn tiny_cap_is_raised_to_two() {
        let chunks = chunk_turns(&vec![plain(); 5], 1);
        assert_eq!(lens(&chunks), vec![2, 2, 1]);
    }
}
